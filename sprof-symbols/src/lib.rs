//! This crate maps raw code addresses from a profiled process to function
//! symbols, by reading the symbol tables of the ELF objects that were mapped
//! into the process.
//!
//! The main entry point is [`AddressResolver`]: it is constructed once per
//! mapped object and then answers address queries for that object. It works
//! on a "best effort" basis - if the object cannot be opened, or carries no
//! symbol table at all, the resolver still covers the whole mapped extent
//! with synthesized placeholder symbols, so that every sampled address can
//! be attributed to *something*.
//!
//! Symbol extraction handles a few realities of installed Linux binaries:
//!
//!  - Stripped binaries whose `.symtab` was moved to a separate debug file
//!    referenced through `.gnu_debuglink`.
//!  - Prelinked binaries, whose live load base differs from the base the
//!    symbol values were linked against; the pre-prelink base is recovered
//!    from `.gnu.prelink_undo`.
//!  - Assembly labels (symbols of declared size zero), which are extended
//!    to the start of the following symbol.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use sprof_symbols::{AddressResolver, SymbolTable};
//!
//! let resolver = AddressResolver::new(Path::new("/usr/bin/ls"), 0x2_0000);
//! let mut symbols = SymbolTable::new();
//! resolver.resolve([0x5630_0000_4010_u64], 0x5630_0000_0000, &mut symbols);
//! ```

mod elf;
mod error;
mod range;
mod resolver;

pub use error::Error;
pub use range::{Range, RangeMap};
pub use resolver::{AddressResolver, ResolverConfig, SymbolData, SymbolTable};
