use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::debug;

use sprof_symbols::{AddressResolver, Range, RangeMap, ResolverConfig, SymbolTable};

use crate::error::Error;
use crate::perf_event::{
    EventRecord, MmapEvent, RecordReader, SampleEvent, PERF_CONTEXT_MAX, PERF_CONTEXT_USER,
    PERF_MAX_STACK_DEPTH,
};

/// What to accumulate per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Count only the leaf frame of each sample.
    Flat,
    /// Also record caller-to-callee edges from the call-chain.
    CallGraph,
}

/// Outgoing call-graph edges of one entry, keyed by target address.
pub type BranchStorage = BTreeMap<u64, u64>;

/// Per-object sample entries, keyed by code address.
pub type EntryStorage = BTreeMap<u64, EntryData>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryData {
    count: u64,
    branches: BranchStorage,
}

impl EntryData {
    /// Number of samples whose instruction pointer fell on this entry.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn branches(&self) -> &BranchStorage {
        &self.branches
    }

    fn add_count(&mut self, count: u64) {
        self.count += count;
    }

    fn append_branch(&mut self, address: u64, count: u64) {
        *self.branches.entry(address).or_insert(0) += count;
    }
}

/// One file mapping in the profiled process, together with everything
/// sampled inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryObjectData {
    file_name: PathBuf,
    // TODO: decide whether a non-zero page offset should shift symbol
    // resolution for objects not mapped at their first page.
    page_offset: u64,
    entries: EntryStorage,
}

impl MemoryObjectData {
    fn new(file_name: PathBuf, page_offset: u64) -> Self {
        MemoryObjectData {
            file_name,
            page_offset,
            entries: EntryStorage::new(),
        }
    }

    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    pub fn page_offset(&self) -> u64 {
        self.page_offset
    }

    pub fn entries(&self) -> &EntryStorage {
        &self.entries
    }

    pub fn append_entry(&mut self, address: u64, count: u64) -> &mut EntryData {
        let entry = self.entries.entry(address).or_default();
        entry.add_count(count);
        entry
    }

    pub fn append_branch(&mut self, from: u64, to: u64, count: u64) {
        self.append_entry(from, 0).append_branch(to, count);
    }

    /// Snaps every branch target to the start of its containing symbol, so
    /// that edges into the same function coalesce regardless of the exact
    /// return site. Targets without a symbol pass through unchanged.
    pub fn fixup_branches(&mut self, symbols: &SymbolTable) {
        for entry in self.entries.values_mut() {
            if entry.branches.is_empty() {
                continue;
            }
            let mut fixed = BranchStorage::new();
            for (&target, &count) in &entry.branches {
                let target = match symbols.find(target) {
                    Some((range, _)) => range.start,
                    None => target,
                };
                *fixed.entry(target).or_insert(0) += count;
            }
            entry.branches = fixed;
        }
    }
}

/// The aggregated result of one event stream.
///
/// Built in three steps: [`load`](Profile::load) ingests the stream,
/// [`resolve_symbols`](Profile::resolve_symbols) builds the symbol table
/// from the mapped binaries, and
/// [`fixup_branches`](Profile::fixup_branches) rewrites branch targets onto
/// symbol starts.
#[derive(Debug, Default)]
pub struct Profile {
    memory_objects: RangeMap<MemoryObjectData>,
    symbols: SymbolTable,
    mmap_event_count: usize,
    good_samples_count: usize,
    bad_samples_count: usize,
}

impl Profile {
    pub fn new() -> Self {
        Profile::default()
    }

    /// Consumes the event stream until it ends.
    ///
    /// Never leaves the profile unusable: a truncated stream ends ingestion
    /// with everything before the break intact, and an I/O failure is
    /// reported only after the same cleanup.
    pub fn load<R: Read>(&mut self, source: R, mode: Mode) -> Result<(), Error> {
        let mut reader = RecordReader::new(source);
        let result = loop {
            match reader.next_record() {
                Ok(Some(EventRecord::Mmap(event))) => self.process_mmap(event),
                Ok(Some(EventRecord::Sample(event))) => self.process_sample(&event, mode),
                Ok(Some(EventRecord::Unknown { .. })) => {}
                Ok(None) => break Ok(()),
                Err(err) => break Err(Error::Io(err)),
            }
        };

        // Objects that never saw a sample are of no interest downstream.
        self.memory_objects
            .retain(|_, data| !data.entries.is_empty());

        result
    }

    fn process_mmap(&mut self, event: MmapEvent) {
        if event.length == 0 {
            debug!(
                "ignoring empty mapping at {:#x} for {}",
                event.address,
                event.file_name.display()
            );
            self.mmap_event_count += 1;
            return;
        }
        let range = Range::with_len(event.address, event.length);
        let data = MemoryObjectData::new(event.file_name, event.page_offset);
        if let Err((occupied, data)) = self.memory_objects.insert(range, data) {
            debug!(
                "memory object {:?} ({}) not inserted, {:?} is already mapped there",
                range,
                data.file_name.display(),
                occupied
            );
        }
        self.mmap_event_count += 1;
    }

    fn process_sample(&mut self, event: &SampleEvent, mode: Mode) {
        let depth = event.callchain.len() as u64;
        if event.callchain.first() != Some(&PERF_CONTEXT_USER)
            || depth < 2
            || depth > PERF_MAX_STACK_DEPTH
        {
            self.bad_samples_count += 1;
            return;
        }

        match self.memory_objects.find_mut(event.ip) {
            Some((_, data)) => {
                data.append_entry(event.ip, 1);
            }
            None => {
                self.bad_samples_count += 1;
                return;
            }
        }
        self.good_samples_count += 1;

        if mode != Mode::CallGraph {
            return;
        }

        // The first frame above the leaf repeats the sampled ip, so the
        // walk starts one past it.
        let mut skip_frame = false;
        let mut call_to = event.ip;
        for &call_from in &event.callchain[2..] {
            if call_from > PERF_CONTEXT_MAX {
                // Context switch; only user-level frames are kept.
                skip_frame = call_from != PERF_CONTEXT_USER;
                continue;
            }
            if skip_frame || call_from == call_to {
                continue;
            }
            let object = match self.memory_objects.find_mut(call_from) {
                Some((_, data)) => data,
                None => continue,
            };
            object.append_branch(call_from, call_to, 1);
            call_to = call_from;
        }
    }

    /// Builds the symbol table by resolving every sampled address through
    /// the binary backing its memory object.
    pub fn resolve_symbols(&mut self) {
        self.resolve_symbols_with(&ResolverConfig::default());
    }

    pub fn resolve_symbols_with(&mut self, config: &ResolverConfig) {
        for (range, data) in self.memory_objects.iter() {
            let resolver = AddressResolver::with_config(&data.file_name, range.len(), config);
            resolver.resolve(data.entries.keys().copied(), range.start, &mut self.symbols);
        }
    }

    /// Applies [`MemoryObjectData::fixup_branches`] to every memory object.
    pub fn fixup_branches(&mut self) {
        for (_, data) in self.memory_objects.iter_mut() {
            data.fixup_branches(&self.symbols);
        }
    }

    pub fn memory_objects(&self) -> &RangeMap<MemoryObjectData> {
        &self.memory_objects
    }

    pub fn memory_objects_mut(&mut self) -> &mut RangeMap<MemoryObjectData> {
        &mut self.memory_objects
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    pub fn mmap_event_count(&self) -> usize {
        self.mmap_event_count
    }

    pub fn good_samples_count(&self) -> usize {
        self.good_samples_count
    }

    pub fn bad_samples_count(&self) -> usize {
        self.bad_samples_count
    }
}
