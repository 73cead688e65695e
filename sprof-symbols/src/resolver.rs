use std::path::{Path, PathBuf};

use log::debug;

use crate::elf::{ObjectInfo, RawFuncSymbol};
use crate::range::{Range, RangeMap};

/// Smallest hole between two known symbols that gets a synthesized symbol
/// of its own.
const MIN_GAP: u64 = 4;

/// How companion debug files are located.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// System root under which separate debug-info files are installed.
    pub debug_root: PathBuf,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            debug_root: PathBuf::from("/usr/lib/debug"),
        }
    }
}

/// A resolved symbol, as handed to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolData {
    pub name: String,
}

pub type SymbolTable = RangeMap<SymbolData>;

/// Working entry of the resolver's internal table. An empty name marks a
/// synthesized gap filler; it gets its `func_<hex>` name at query time.
#[derive(Debug, Clone)]
struct ArSymbolData {
    /// Declared symbol size; zero marks an assembly label.
    size: u64,
    name: String,
    binding: u8,
}

impl ArSymbolData {
    fn synthetic(size: u64) -> Self {
        ArSymbolData {
            size,
            name: String::new(),
            binding: 0,
        }
    }
}

/// Maps addresses inside one mapped object to function symbols.
///
/// Construction reads the object's symbol table (with the fallbacks
/// described on the crate root) and covers the mapped extent
/// `[base, base + object_size)` completely: holes of [`MIN_GAP`] bytes or
/// more between known symbols are filled with synthesized symbols, so a
/// sample landing between functions still resolves. Construction never
/// fails; an unreadable object yields a table of synthesized symbols only.
///
/// No file handles are kept once the constructor returns.
pub struct AddressResolver {
    base_address: u64,
    symbols: RangeMap<ArSymbolData>,
}

impl AddressResolver {
    pub fn new(path: &Path, object_size: u64) -> Self {
        Self::with_config(path, object_size, &ResolverConfig::default())
    }

    pub fn with_config(path: &Path, object_size: u64, config: &ResolverConfig) -> Self {
        let info = match ObjectInfo::parse(path, &config.debug_root) {
            Ok(info) => Some(info),
            Err(err) => {
                debug!("no symbols for {}: {}", path.display(), err);
                None
            }
        };

        let mut resolver = AddressResolver {
            base_address: info.as_ref().map_or(0, |info| info.base_address),
            symbols: RangeMap::new(),
        };

        if let Some(info) = info {
            let mut symbols = info.symbols;
            if !info.symtab_loaded {
                if let Some(debug_path) = &info.debug_link {
                    // The object itself is stripped; its full symbol table
                    // lives in the companion debug file, if installed.
                    match ObjectInfo::parse(debug_path, &config.debug_root) {
                        Ok(debug_info) if debug_info.symtab_loaded => {
                            symbols = debug_info.symbols;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            debug!("no debug companion for {}: {}", path.display(), err)
                        }
                    }
                }
            }
            for symbol in symbols {
                resolver.insert_symbol(symbol, info.original_base_address);
            }
        }

        resolver.fill_gaps(object_size, path);
        resolver
    }

    /// The load base the symbol table is expressed against. Queries from a
    /// process that mapped the object elsewhere are shifted by the
    /// difference.
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    fn insert_symbol(&mut self, symbol: RawFuncSymbol, original_base: u64) {
        // Prelinking moves the image without rewriting symbol values, so
        // values are relocated from the original base onto the current one.
        let start = symbol
            .value
            .wrapping_sub(original_base)
            .wrapping_add(self.base_address);
        let range = Range::new(start, start.saturating_add(symbol.size.max(1)));
        let data = ArSymbolData {
            size: symbol.size,
            name: symbol.name,
            binding: symbol.binding,
        };

        if let Err((occupied, data)) = self.symbols.insert(range, data) {
            // Sized functions beat assembly labels, stronger binding beats
            // weaker; otherwise the first insertion stands.
            let better = match self.symbols.get(&occupied) {
                Some(old) => (old.size == 0 && data.size != 0) || data.binding > old.binding,
                None => false,
            };
            if better {
                self.symbols.replace(range, data);
            }
        }
    }

    /// Rebuilds the symbol table so that `[base, base + object_size)` is
    /// covered without holes of [`MIN_GAP`] bytes or more, and extends
    /// assembly labels up to the following symbol.
    fn fill_gaps(&mut self, object_size: u64, path: &Path) {
        let base_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let object_end = self.base_address.saturating_add(object_size);

        let mut filled = RangeMap::new();
        let mut prev_end = self.base_address;

        let mut iter = self.symbols.iter().peekable();
        while let Some((&range, data)) = iter.next() {
            if range.start.saturating_sub(prev_end) >= MIN_GAP {
                let _ = filled.insert(
                    Range::new(prev_end, range.start),
                    ArSymbolData::synthetic(range.start - prev_end),
                );
            }

            if data.size == 0 {
                // An assembly label has no declared extent; treat it as
                // running up to the next symbol, or to the end of the
                // object. The basename suffix keeps labels from distinct
                // objects apart.
                let new_end = iter
                    .peek()
                    .map_or(object_end.max(range.start), |(next, _)| next.start);
                if new_end > range.start {
                    let extended = ArSymbolData {
                        size: new_end - range.start,
                        name: format!("{}@{}", data.name, base_name),
                        binding: data.binding,
                    };
                    let _ = filled.insert(Range::new(range.start, new_end), extended);
                }
                prev_end = new_end;
            } else {
                let _ = filled.insert(range, data.clone());
                prev_end = range.end;
            }
        }

        if object_end.saturating_sub(prev_end) >= MIN_GAP {
            let _ = filled.insert(
                Range::new(prev_end, object_end),
                ArSymbolData::synthetic(object_end - prev_end),
            );
        }

        self.symbols = filled;
    }

    /// Resolves an ascending sequence of sample addresses into `symbols`.
    ///
    /// `load_base` is the address the object was actually mapped at, which
    /// differs from the resolver's own base when address-space layout
    /// randomization moved the image; emitted ranges are shifted
    /// accordingly. Each containing symbol is emitted once, and entries
    /// falling into an already-emitted symbol are skipped.
    pub fn resolve<I>(&self, entries: I, load_base: u64, symbols: &mut SymbolTable)
    where
        I: IntoIterator<Item = u64>,
    {
        let adjust = load_base.wrapping_sub(self.base_address);
        let mut current_end: Option<u64> = None;

        for address in entries {
            let unadjusted = address.wrapping_sub(adjust);
            if let Some(end) = current_end {
                if unadjusted < end {
                    continue;
                }
            }

            let (range, data) = match self.symbols.find(unadjusted) {
                Some(found) => found,
                None => {
                    debug!(
                        "cannot resolve symbol for address {:#x}, load base {:#x}",
                        unadjusted, load_base
                    );
                    continue;
                }
            };

            let name = if data.name.is_empty() {
                format!("func_{:x}", range.start)
            } else {
                data.name.clone()
            };
            let _ = symbols.insert(
                Range::new(
                    range.start.wrapping_add(adjust),
                    range.end.wrapping_add(adjust),
                ),
                SymbolData { name },
            );
            current_end = Some(range.end);
        }
    }
}
