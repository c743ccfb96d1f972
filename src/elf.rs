//! ELF container parser.
//!
//! Reads a whole object file into memory, validates the identification
//! bytes and widens the class-specific header records into one shared
//! model. Multi-byte fields are decoded according to `EI_DATA`, so both
//! little- and big-endian images parse correctly on any host.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Address, Arch, ArchSpec, Error, Mode};

/// e_ident indices.
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_NIDENT: usize = 16;

/// Class-specific fixed sizes.
const EHDR32_SIZE: usize = 52;
const EHDR64_SIZE: usize = 64;
const PHDR32_SIZE: usize = 32;
const PHDR64_SIZE: usize = 56;
const SHDR32_SIZE: usize = 40;
const SHDR64_SIZE: usize = 64;

/// Native symbol-record sizes, used when `sh_entsize` is zero.
pub const SYM32_SIZE: usize = 16;
pub const SYM64_SIZE: usize = 24;

/// `e_machine` values this crate understands.
pub const EM_386: u16 = 3;
pub const EM_ARM: u16 = 40;
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;

/// Section-header types.
pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_DYNSYM: u32 = 11;

/// File class from `EI_CLASS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

/// Data encoding from `EI_DATA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfData {
    /// Little endian
    Lsb,
    /// Big endian
    Msb,
}

/// Object file type from `e_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    None,
    /// Relocatable object
    Rel,
    /// Executable
    Exec,
    /// Shared object
    Dyn,
    /// Core dump
    Core,
    Other(u16),
}

impl From<u16> for FileType {
    fn from(v: u16) -> Self {
        match v {
            0 => FileType::None,
            1 => FileType::Rel,
            2 => FileType::Exec,
            3 => FileType::Dyn,
            4 => FileType::Core,
            other => FileType::Other(other),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::None => write!(f, "NONE"),
            FileType::Rel => write!(f, "REL"),
            FileType::Exec => write!(f, "EXEC"),
            FileType::Dyn => write!(f, "DYN"),
            FileType::Core => write!(f, "CORE"),
            FileType::Other(v) => write!(f, "0x{v:x}"),
        }
    }
}

/// One program header, widened to 64-bit fields regardless of class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    pub ptype: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}

/// One section header, widened to 64-bit fields regardless of class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Offset of the name into the section-header string table.
    pub name: u32,
    pub stype: u32,
    pub flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entsize: u64,
}

/// One symbol-table entry with its name resolved and owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub value: u64,
    pub size: u64,
    pub info: u8,
    pub other: u8,
    pub shndx: u16,
    /// `info >> 4`
    pub bind: u8,
    /// `info & 0xf`
    pub stype: u8,
}

/// A parsed ELF image. Immutable after `parse`.
#[derive(Debug)]
pub struct Elf {
    pub class: ElfClass,
    pub data: ElfData,
    pub ftype: FileType,
    pub machine: u16,
    pub entry: Address,
    pub phoff: u64,
    pub shoff: u64,
    pub phnum: u16,
    pub shnum: u16,
    pub shstrndx: u16,
    pub phdrs: Vec<ProgramHeader>,
    pub shdrs: Vec<SectionHeader>,
    /// Section-header string table bytes, empty when `shstrndx` is invalid.
    pub shstrtab: Vec<u8>,
    /// Path the image was parsed from.
    pub path: PathBuf,
}

/// Endianness-aware field reader over the raw file bytes.
///
/// Callers bounds-check regions before reading fields out of them.
#[derive(Clone, Copy)]
struct Reader<'a> {
    buf: &'a [u8],
    data: ElfData,
}

impl<'a> Reader<'a> {
    fn u16_at(&self, off: usize) -> u16 {
        let b = [self.buf[off], self.buf[off + 1]];
        match self.data {
            ElfData::Lsb => u16::from_le_bytes(b),
            ElfData::Msb => u16::from_be_bytes(b),
        }
    }

    fn u32_at(&self, off: usize) -> u32 {
        let b = [
            self.buf[off],
            self.buf[off + 1],
            self.buf[off + 2],
            self.buf[off + 3],
        ];
        match self.data {
            ElfData::Lsb => u32::from_le_bytes(b),
            ElfData::Msb => u32::from_be_bytes(b),
        }
    }

    fn u64_at(&self, off: usize) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.buf[off..off + 8]);
        match self.data {
            ElfData::Lsb => u64::from_le_bytes(b),
            ElfData::Msb => u64::from_be_bytes(b),
        }
    }
}

impl Elf {
    /// Parse an ELF image from a file path.
    pub fn parse(path: impl AsRef<Path>) -> Result<Elf, Error> {
        let path = path.as_ref();
        let buf = fs::read(path)?;
        Self::parse_bytes(&buf, path)
    }

    /// Parse an ELF image already read into memory.
    pub fn parse_bytes(buf: &[u8], path: &Path) -> Result<Elf, Error> {
        if buf.len() < EI_NIDENT {
            return Err(Error::TruncatedHeader);
        }
        if buf[..4] != [0x7f, b'E', b'L', b'F'] {
            return Err(Error::BadMagic);
        }

        let class = match buf[EI_CLASS] {
            1 => ElfClass::Elf32,
            2 => ElfClass::Elf64,
            other => return Err(Error::UnsupportedClass(other)),
        };
        let data = match buf[EI_DATA] {
            2 => ElfData::Msb,
            _ => ElfData::Lsb,
        };

        let ehdr_size = match class {
            ElfClass::Elf32 => EHDR32_SIZE,
            ElfClass::Elf64 => EHDR64_SIZE,
        };
        if buf.len() < ehdr_size {
            return Err(Error::TruncatedHeader);
        }

        let r = Reader { buf, data };
        let (entry, phoff, shoff, phnum, shnum, shstrndx) = match class {
            ElfClass::Elf32 => (
                r.u32_at(24) as u64,
                r.u32_at(28) as u64,
                r.u32_at(32) as u64,
                r.u16_at(44),
                r.u16_at(48),
                r.u16_at(50),
            ),
            ElfClass::Elf64 => (
                r.u64_at(24),
                r.u64_at(32),
                r.u64_at(40),
                r.u16_at(56),
                r.u16_at(60),
                r.u16_at(62),
            ),
        };

        let mut elf = Elf {
            class,
            data,
            ftype: FileType::from(r.u16_at(16)),
            machine: r.u16_at(18),
            entry,
            phoff,
            shoff,
            phnum,
            shnum,
            shstrndx,
            phdrs: Vec::new(),
            shdrs: Vec::new(),
            shstrtab: Vec::new(),
            path: path.to_path_buf(),
        };

        // Header tables that run past the file are treated as empty.
        let phentsize = match class {
            ElfClass::Elf32 => PHDR32_SIZE,
            ElfClass::Elf64 => PHDR64_SIZE,
        };
        if elf.phnum > 0 && table_in_bounds(elf.phoff, elf.phnum, phentsize, buf.len()) {
            for i in 0..elf.phnum as usize {
                let off = elf.phoff as usize + i * phentsize;
                elf.phdrs.push(parse_phdr(&r, off, class));
            }
        }

        let shentsize = match class {
            ElfClass::Elf32 => SHDR32_SIZE,
            ElfClass::Elf64 => SHDR64_SIZE,
        };
        if elf.shnum > 0 && table_in_bounds(elf.shoff, elf.shnum, shentsize, buf.len()) {
            for i in 0..elf.shnum as usize {
                let off = elf.shoff as usize + i * shentsize;
                elf.shdrs.push(parse_shdr(&r, off, class));
            }

            // Section-header string table, when shstrndx points at a valid
            // section wholly inside the file.
            if (elf.shstrndx as usize) < elf.shdrs.len() {
                let strtab = elf.shdrs[elf.shstrndx as usize];
                let end = strtab.offset.checked_add(strtab.size);
                if end.is_some_and(|end| end <= buf.len() as u64) {
                    let start = strtab.offset as usize;
                    elf.shstrtab = buf[start..start + strtab.size as usize].to_vec();
                }
            }
        }

        Ok(elf)
    }

    /// Resolve a section header's name against the string table.
    ///
    /// Returns `None` when the name offset is out of range or the table
    /// holds no NUL terminator after it.
    pub fn section_name(&self, shdr: &SectionHeader) -> Option<&str> {
        let start = shdr.name as usize;
        if start >= self.shstrtab.len() {
            return None;
        }
        let rest = &self.shstrtab[start..];
        let nul = rest.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&rest[..nul]).ok()
    }

    /// Find the first section with the given resolved name.
    pub fn find_section(&self, name: &str) -> Option<&SectionHeader> {
        self.shdrs
            .iter()
            .find(|shdr| self.section_name(shdr) == Some(name))
    }

    /// Map `e_machine` to the decoder architecture pair.
    pub fn arch_spec(&self) -> ArchSpec {
        match self.machine {
            EM_386 => ArchSpec::X86_32,
            EM_X86_64 => ArchSpec::X86_64,
            EM_ARM => ArchSpec::ARM,
            EM_AARCH64 => ArchSpec::AARCH64,
            other => {
                log::warn!("unsupported machine type {other}, defaulting to x86_64");
                ArchSpec { arch: Arch::X86, mode: Mode::Bits64 }
            }
        }
    }
}

fn table_in_bounds(offset: u64, count: u16, entsize: usize, file_len: usize) -> bool {
    offset
        .checked_add(count as u64 * entsize as u64)
        .is_some_and(|end| end <= file_len as u64)
}

fn parse_phdr(r: &Reader<'_>, off: usize, class: ElfClass) -> ProgramHeader {
    match class {
        ElfClass::Elf32 => ProgramHeader {
            ptype: r.u32_at(off),
            offset: r.u32_at(off + 4) as u64,
            vaddr: r.u32_at(off + 8) as u64,
            paddr: r.u32_at(off + 12) as u64,
            filesz: r.u32_at(off + 16) as u64,
            memsz: r.u32_at(off + 20) as u64,
            flags: r.u32_at(off + 24),
            align: r.u32_at(off + 28) as u64,
        },
        ElfClass::Elf64 => ProgramHeader {
            ptype: r.u32_at(off),
            flags: r.u32_at(off + 4),
            offset: r.u64_at(off + 8),
            vaddr: r.u64_at(off + 16),
            paddr: r.u64_at(off + 24),
            filesz: r.u64_at(off + 32),
            memsz: r.u64_at(off + 40),
            align: r.u64_at(off + 48),
        },
    }
}

fn parse_shdr(r: &Reader<'_>, off: usize, class: ElfClass) -> SectionHeader {
    match class {
        ElfClass::Elf32 => SectionHeader {
            name: r.u32_at(off),
            stype: r.u32_at(off + 4),
            flags: r.u32_at(off + 8) as u64,
            addr: r.u32_at(off + 12) as u64,
            offset: r.u32_at(off + 16) as u64,
            size: r.u32_at(off + 20) as u64,
            link: r.u32_at(off + 24),
            info: r.u32_at(off + 28),
            addralign: r.u32_at(off + 32) as u64,
            entsize: r.u32_at(off + 36) as u64,
        },
        ElfClass::Elf64 => SectionHeader {
            name: r.u32_at(off),
            stype: r.u32_at(off + 4),
            flags: r.u64_at(off + 8),
            addr: r.u64_at(off + 16),
            offset: r.u64_at(off + 24),
            size: r.u64_at(off + 32),
            link: r.u32_at(off + 40),
            info: r.u32_at(off + 44),
            addralign: r.u64_at(off + 48),
            entsize: r.u64_at(off + 56),
        },
    }
}

/// Decode one symbol-table entry. `None` when the record runs past the
/// table.
pub(crate) fn parse_sym(
    bytes: &[u8],
    off: usize,
    class: ElfClass,
    data: ElfData,
) -> Option<(u32, u64, u64, u8, u8, u16)> {
    let r = Reader { buf: bytes, data };
    match class {
        ElfClass::Elf32 => {
            if off + SYM32_SIZE > bytes.len() {
                return None;
            }
            Some((
                r.u32_at(off),
                r.u32_at(off + 4) as u64,
                r.u32_at(off + 8) as u64,
                bytes[off + 12],
                bytes[off + 13],
                r.u16_at(off + 14),
            ))
        }
        ElfClass::Elf64 => {
            if off + SYM64_SIZE > bytes.len() {
                return None;
            }
            Some((
                r.u32_at(off),
                r.u64_at(off + 8),
                r.u64_at(off + 16),
                bytes[off + 4],
                bytes[off + 5],
                r.u16_at(off + 6),
            ))
        }
    }
}

/// Synthetic-image builders shared by the unit tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub struct SectionSpec {
        pub name: &'static str,
        pub stype: u32,
        pub addr: u64,
        pub data: Vec<u8>,
        pub link: u32,
        pub entsize: u64,
    }

    impl SectionSpec {
        pub fn progbits(name: &'static str, addr: u64, data: Vec<u8>) -> Self {
            SectionSpec { name, stype: SHT_PROGBITS, addr, data, link: 0, entsize: 0 }
        }
    }

    /// Build an ELF64 image. Caller sections get indices `1..=n`; the
    /// section-header string table is appended after them.
    pub fn build_elf64(machine: u16, data: ElfData, sections: &[SectionSpec]) -> Vec<u8> {
        let put16 = |out: &mut Vec<u8>, v: u16| match data {
            ElfData::Lsb => out.extend_from_slice(&v.to_le_bytes()),
            ElfData::Msb => out.extend_from_slice(&v.to_be_bytes()),
        };
        let put32 = |out: &mut Vec<u8>, v: u32| match data {
            ElfData::Lsb => out.extend_from_slice(&v.to_le_bytes()),
            ElfData::Msb => out.extend_from_slice(&v.to_be_bytes()),
        };
        let put64 = |out: &mut Vec<u8>, v: u64| match data {
            ElfData::Lsb => out.extend_from_slice(&v.to_le_bytes()),
            ElfData::Msb => out.extend_from_slice(&v.to_be_bytes()),
        };

        // Section-header string table: "\0" then each name.
        let mut shstrtab = vec![0u8];
        let mut name_offs = Vec::new();
        for s in sections {
            name_offs.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(s.name.as_bytes());
            shstrtab.push(0);
        }
        let shstrtab_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab");
        shstrtab.push(0);

        // Layout: ehdr | section datas | shstrtab | shdr table.
        let mut data_offs = Vec::new();
        let mut cursor = 64u64;
        for s in sections {
            data_offs.push(cursor);
            cursor += s.data.len() as u64;
        }
        let shstrtab_off = cursor;
        cursor += shstrtab.len() as u64;
        let shoff = cursor;
        let shnum = sections.len() as u16 + 2;
        let shstrndx = shnum - 1;

        let mut out = Vec::new();
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
        out.push(2); // ELFCLASS64
        out.push(match data {
            ElfData::Lsb => 1,
            ElfData::Msb => 2,
        });
        out.push(1); // EV_CURRENT
        out.extend_from_slice(&[0u8; 9]);
        put16(&mut out, 2); // ET_EXEC
        put16(&mut out, machine);
        put32(&mut out, 1);
        put64(&mut out, sections.first().map(|s| s.addr).unwrap_or(0));
        put64(&mut out, 0); // phoff
        put64(&mut out, shoff);
        put32(&mut out, 0);
        put16(&mut out, 64); // ehsize
        put16(&mut out, 56); // phentsize
        put16(&mut out, 0); // phnum
        put16(&mut out, 64); // shentsize
        put16(&mut out, shnum);
        put16(&mut out, shstrndx);

        for s in sections {
            out.extend_from_slice(&s.data);
        }
        out.extend_from_slice(&shstrtab);

        let mut shdr = |name: u32, stype: u32, addr: u64, off: u64, size: u64, link: u32, entsize: u64| {
            put32(&mut out, name);
            put32(&mut out, stype);
            put64(&mut out, 0); // flags
            put64(&mut out, addr);
            put64(&mut out, off);
            put64(&mut out, size);
            put32(&mut out, link);
            put32(&mut out, 0); // info
            put64(&mut out, 0); // addralign
            put64(&mut out, entsize);
        };

        shdr(0, 0, 0, 0, 0, 0, 0);
        for (i, s) in sections.iter().enumerate() {
            shdr(
                name_offs[i],
                s.stype,
                s.addr,
                data_offs[i],
                s.data.len() as u64,
                s.link,
                s.entsize,
            );
        }
        shdr(
            shstrtab_name,
            SHT_STRTAB,
            0,
            shstrtab_off,
            shstrtab.len() as u64,
            0,
            0,
        );
        out
    }

    /// Pack a symbol-table entry in the ELF64 layout.
    pub fn sym64(data: ElfData, name: u32, info: u8, shndx: u16, value: u64, size: u64) -> Vec<u8> {
        let mut out = Vec::new();
        let put = |out: &mut Vec<u8>, b: &[u8]| out.extend_from_slice(b);
        match data {
            ElfData::Lsb => {
                put(&mut out, &name.to_le_bytes());
                out.push(info);
                out.push(0);
                put(&mut out, &shndx.to_le_bytes());
                put(&mut out, &value.to_le_bytes());
                put(&mut out, &size.to_le_bytes());
            }
            ElfData::Msb => {
                put(&mut out, &name.to_be_bytes());
                out.push(info);
                out.push(0);
                put(&mut out, &shndx.to_be_bytes());
                put(&mut out, &value.to_be_bytes());
                put(&mut out, &size.to_be_bytes());
            }
        }
        out
    }
}
