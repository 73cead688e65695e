//! A minimal ELF image builder: one loadable segment plus a symbol table,
//! enough for end-to-end symbolication of a synthetic event stream.

use std::fs;
use std::mem::size_of;
use std::path::Path;

use object::elf;
use object::pod::bytes_of;
use object::{Endianness, U16, U32, U64};

const ENDIAN: Endianness = Endianness::Little;

pub fn write_elf(path: &Path, base: u64, symbols: &[(&str, u64, u64)]) {
    fs::write(path, build_elf(base, symbols)).expect("failed to write ELF fixture");
}

fn build_elf(base: u64, symbols: &[(&str, u64, u64)]) -> Vec<u8> {
    let mut strtab = vec![0u8];
    let mut symtab = vec![0u8; size_of::<elf::Sym64<Endianness>>()];
    for &(name, value, size) in symbols {
        let st_name = strtab.len() as u32;
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);
        symtab.extend_from_slice(bytes_of(&elf::Sym64::<Endianness> {
            st_name: U32::new(ENDIAN, st_name),
            st_info: (elf::STB_GLOBAL << 4) | elf::STT_FUNC,
            st_other: 0,
            st_shndx: U16::new(ENDIAN, 1),
            st_value: U64::new(ENDIAN, value),
            st_size: U64::new(ENDIAN, size),
        }));
    }

    let mut shstrtab = vec![0u8];
    let mut name = |table_name: &str| {
        let offset = shstrtab.len() as u32;
        shstrtab.extend_from_slice(table_name.as_bytes());
        shstrtab.push(0);
        offset
    };
    let text_name = name(".text");
    let symtab_name = name(".symtab");
    let strtab_name = name(".strtab");
    let shstrtab_name = name(".shstrtab");

    let ehsize = size_of::<elf::FileHeader64<Endianness>>() as u64;
    let phsize = size_of::<elf::ProgramHeader64<Endianness>>() as u64;
    let shsize = size_of::<elf::SectionHeader64<Endianness>>() as u64;

    // name, type, flags, addr, link, info, entsize, content
    let text = vec![0u8; 64];
    let sections: Vec<(u32, u32, u64, u64, u32, u32, u64, &[u8])> = vec![
        (
            text_name,
            elf::SHT_PROGBITS,
            u64::from(elf::SHF_ALLOC | elf::SHF_EXECINSTR),
            base,
            0,
            0,
            0,
            &text,
        ),
        (
            symtab_name,
            elf::SHT_SYMTAB,
            0,
            0,
            3,
            1,
            size_of::<elf::Sym64<Endianness>>() as u64,
            &symtab,
        ),
        (strtab_name, elf::SHT_STRTAB, 0, 0, 0, 0, 0, &strtab),
        (shstrtab_name, elf::SHT_STRTAB, 0, 0, 0, 0, 0, &shstrtab),
    ];

    let mut offset = ehsize + phsize;
    let mut offsets = Vec::new();
    for section in &sections {
        offset = (offset + 7) & !7;
        offsets.push(offset);
        offset += section.7.len() as u64;
    }
    let shoff = (offset + 7) & !7;

    let mut out = Vec::new();
    out.extend_from_slice(bytes_of(&elf::FileHeader64::<Endianness> {
        e_ident: elf::Ident {
            magic: elf::ELFMAG,
            class: elf::ELFCLASS64,
            data: elf::ELFDATA2LSB,
            version: elf::EV_CURRENT,
            os_abi: elf::ELFOSABI_NONE,
            abi_version: 0,
            padding: [0; 7],
        },
        e_type: U16::new(ENDIAN, elf::ET_EXEC),
        e_machine: U16::new(ENDIAN, elf::EM_X86_64),
        e_version: U32::new(ENDIAN, elf::EV_CURRENT as u32),
        e_entry: U64::new(ENDIAN, base),
        e_phoff: U64::new(ENDIAN, ehsize),
        e_shoff: U64::new(ENDIAN, shoff),
        e_flags: U32::new(ENDIAN, 0),
        e_ehsize: U16::new(ENDIAN, ehsize as u16),
        e_phentsize: U16::new(ENDIAN, phsize as u16),
        e_phnum: U16::new(ENDIAN, 1),
        e_shentsize: U16::new(ENDIAN, shsize as u16),
        e_shnum: U16::new(ENDIAN, sections.len() as u16 + 1),
        e_shstrndx: U16::new(ENDIAN, sections.len() as u16),
    }));
    out.extend_from_slice(bytes_of(&elf::ProgramHeader64::<Endianness> {
        p_type: U32::new(ENDIAN, elf::PT_LOAD),
        p_flags: U32::new(ENDIAN, elf::PF_R | elf::PF_X),
        p_offset: U64::new(ENDIAN, 0),
        p_vaddr: U64::new(ENDIAN, base),
        p_paddr: U64::new(ENDIAN, base),
        p_filesz: U64::new(ENDIAN, 0x1000),
        p_memsz: U64::new(ENDIAN, 0x1000),
        p_align: U64::new(ENDIAN, 0x1000),
    }));

    for (section, &offset) in sections.iter().zip(&offsets) {
        out.resize(offset as usize, 0);
        out.extend_from_slice(section.7);
    }

    out.resize(shoff as usize, 0);
    out.extend_from_slice(&vec![0u8; shsize as usize]);
    for (&(name, sh_type, sh_flags, sh_addr, sh_link, sh_info, sh_entsize, content), &offset) in
        sections.iter().zip(&offsets)
    {
        out.extend_from_slice(bytes_of(&elf::SectionHeader64::<Endianness> {
            sh_name: U32::new(ENDIAN, name),
            sh_type: U32::new(ENDIAN, sh_type),
            sh_flags: U64::new(ENDIAN, sh_flags),
            sh_addr: U64::new(ENDIAN, sh_addr),
            sh_offset: U64::new(ENDIAN, offset),
            sh_size: U64::new(ENDIAN, content.len() as u64),
            sh_link: U32::new(ENDIAN, sh_link),
            sh_info: U32::new(ENDIAN, sh_info),
            sh_addralign: U64::new(ENDIAN, 8),
            sh_entsize: U64::new(ENDIAN, sh_entsize),
        }));
    }
    out
}
