use std::fs;
use std::path::{Path, PathBuf};

use object::read::elf::{FileHeader, ProgramHeader};
use object::read::File;
use object::{
    elf, pod, Endianness, Object, ObjectSection, ObjectSegment, ObjectSymbol, ObjectSymbolTable,
    SymbolFlags,
};

use crate::error::Error;

/// A function symbol as recorded in the object file, before relocation
/// against the load base.
pub(crate) struct RawFuncSymbol {
    pub value: u64,
    pub size: u64,
    pub binding: u8,
    pub name: String,
}

/// Everything the resolver needs from one scan of an ELF object.
pub(crate) struct ObjectInfo {
    /// Virtual address of the first loadable segment.
    pub base_address: u64,
    /// Load base before prelinking rewrote it; equals `base_address` when
    /// no `.gnu.prelink_undo` section is present. Symbol values are
    /// expressed against this base.
    pub original_base_address: u64,
    pub symbols: Vec<RawFuncSymbol>,
    /// Whether `symbols` came from `.symtab` (as opposed to `.dynsym`).
    pub symtab_loaded: bool,
    /// Companion debug file implied by `.gnu_debuglink`, if any.
    pub debug_link: Option<PathBuf>,
}

impl ObjectInfo {
    pub fn parse(path: &Path, debug_root: &Path) -> Result<Self, Error> {
        let data = fs::read(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;
        let file =
            File::parse(&*data).map_err(|e| Error::ObjectParse(path.to_owned(), e))?;

        let base_address = file.segments().next().map_or(0, |segment| segment.address());

        let mut original_base_address = base_address;
        if let Some(section) = file.section_by_name(".gnu.prelink_undo") {
            if let Ok(data) = section.data() {
                if let Some(original) = prelink_undo_base(data) {
                    original_base_address = original;
                }
            }
        }

        let (symbols, symtab_loaded) = match file.symbol_table() {
            Some(table) => (collect_function_symbols(table.symbols()), true),
            None => match file.dynamic_symbol_table() {
                Some(table) => (collect_function_symbols(table.symbols()), false),
                None => (Vec::new(), false),
            },
        };

        // The link's declared file name and CRC are ignored; the companion
        // is expected under the debug root at the object's own path.
        let debug_link = file.section_by_name(".gnu_debuglink").map(|_| {
            let mut companion = debug_root.as_os_str().to_os_string();
            companion.push(path.as_os_str());
            companion.push(".debug");
            PathBuf::from(companion)
        });

        Ok(ObjectInfo {
            base_address,
            original_base_address,
            symbols,
            symtab_loaded,
            debug_link,
        })
    }
}

fn collect_function_symbols<'data, S>(symbols: S) -> Vec<RawFuncSymbol>
where
    S: Iterator,
    S::Item: ObjectSymbol<'data>,
{
    let mut out = Vec::new();
    for symbol in symbols {
        let st_info = match symbol.flags() {
            SymbolFlags::Elf { st_info, .. } => st_info,
            _ => continue,
        };
        if st_info & 0xf != elf::STT_FUNC || symbol.is_undefined() {
            continue;
        }
        let name = match symbol.name_bytes() {
            Ok(name) => String::from_utf8_lossy(name).into_owned(),
            Err(_) => String::new(),
        };
        out.push(RawFuncSymbol {
            value: symbol.address(),
            size: symbol.size(),
            binding: st_info >> 4,
            name,
        });
    }
    out
}

/// Decodes the load base recorded in a `.gnu.prelink_undo` section: the
/// pre-prelink file header, followed immediately by its program headers, in
/// the declared class and byte order.
/// Byte offset of the ELF class field within `e_ident` (`Ident::class`).
/// Not exported by the `object` crate as a named constant.
const EI_CLASS: usize = 4;

fn prelink_undo_base(data: &[u8]) -> Option<u64> {
    match *data.get(EI_CLASS)? {
        elf::ELFCLASS32 => prelink_undo_base_for::<elf::FileHeader32<Endianness>>(data),
        elf::ELFCLASS64 => prelink_undo_base_for::<elf::FileHeader64<Endianness>>(data),
        _ => None,
    }
}

fn prelink_undo_base_for<Elf: FileHeader<Endian = Endianness>>(data: &[u8]) -> Option<u64> {
    let (header, phdr_data) = pod::from_bytes::<Elf>(data).ok()?;
    let endian = header.endian().ok()?;
    let phnum = usize::from(header.e_phnum(endian));
    let (phdrs, _) = pod::slice_from_bytes::<Elf::ProgramHeader>(phdr_data, phnum).ok()?;
    phdrs
        .iter()
        .find(|phdr| phdr.p_type(endian) == elf::PT_LOAD)
        .map(|phdr| phdr.p_vaddr(endian).into())
}
