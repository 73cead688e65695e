//! This crate turns a stream of kernel sampling events into a symbolicated
//! profile: a map of the profiled process's mapped objects, per-address hit
//! counts and call-graph edges inside each object, and a symbol table
//! resolved from the mapped binaries via [`sprof_symbols`].
//!
//! The event stream carries two record kinds: memory-map notifications,
//! which describe where the kernel placed each file mapping, and samples,
//! which carry the interrupted instruction pointer plus its call-chain.
//! [`Profile::load`] consumes the stream; no event record is ever fatal -
//! malformed samples are counted and skipped, and a truncated stream simply
//! ends ingestion with everything ingested so far intact.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//!
//! use sprof::{Mode, Profile};
//!
//! # fn main() -> Result<(), sprof::Error> {
//! let mut profile = Profile::new();
//! profile.load(File::open("sampled.trace")?, Mode::CallGraph)?;
//! profile.resolve_symbols();
//! profile.fixup_branches();
//! for (range, symbol) in profile.symbols().iter() {
//!     println!("{range:?} {}", symbol.name);
//! }
//! # Ok(())
//! # }
//! ```

mod error;
pub mod perf_event;
mod profile;

pub use error::Error;
pub use profile::{
    BranchStorage, EntryData, EntryStorage, MemoryObjectData, Mode, Profile,
};
pub use sprof_symbols::{Range, ResolverConfig, SymbolData, SymbolTable};
