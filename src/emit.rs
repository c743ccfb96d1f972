//! Emitter: owns a loaded image and drives the disassembly pipeline.
//!
//! Loading parses the ELF, resolves the decoder architecture and copies the
//! `.text` bytes out of the file. Scanning carves the copy into code
//! ranges; posting turns ranges (or windows of them) into decode jobs.
//! String and symbol extraction read their sections straight from the file,
//! skipping sections that fail.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::decode;
use crate::elf::{self, Elf, ElfClass, SectionHeader, Symbol, SHT_STRTAB};
use crate::pool::WorkerPool;
use crate::scan::{scan_ranges, CodeRange};
use crate::{Address, ArchSpec, Error, PublishFn};

/// Sections scanned for printable string literals.
const STRING_SECTIONS: [&str; 4] = [".rodata", ".data", ".dynstr", ".strtab"];

/// Sections holding symbol tables.
const SYMBOL_SECTIONS: [&str; 2] = [".symtab", ".dynsym"];

/// Coordinator owning the parsed ELF and the `.text` byte copy.
#[derive(Debug)]
pub struct Emitter {
    elf: Elf,
    spec: ArchSpec,
    text: Vec<u8>,
    text_vaddr: Address,
    ranges: Vec<CodeRange>,
}

impl Emitter {
    /// Parse `path` and prepare it for disassembly.
    ///
    /// `spec` overrides the architecture; `None` detects it from the ELF
    /// header. Fails when the image has no `.text` section.
    pub fn load(path: impl AsRef<Path>, spec: Option<ArchSpec>) -> Result<Emitter, Error> {
        let elf = Elf::parse(path)?;
        let spec = spec.unwrap_or_else(|| elf.arch_spec());

        let text_shdr = *elf.find_section(".text").ok_or(Error::NoTextSection)?;
        let text = read_section(&elf.path, &text_shdr)?;

        Ok(Emitter {
            elf,
            spec,
            text,
            text_vaddr: text_shdr.addr,
            ranges: Vec::new(),
        })
    }

    pub fn elf(&self) -> &Elf {
        &self.elf
    }

    pub fn spec(&self) -> ArchSpec {
        self.spec
    }

    pub fn text_vaddr(&self) -> Address {
        self.text_vaddr
    }

    pub fn ranges(&self) -> &[CodeRange] {
        &self.ranges
    }

    /// Walk the `.text` copy and (re)build the code-range list.
    pub fn scan(&mut self) {
        self.ranges = scan_ranges(&self.text, self.text_vaddr);
    }

    /// Post one decode job per code range.
    pub fn post_all(&self, pool: &WorkerPool, publish: PublishFn) -> Result<(), Error> {
        for range in &self.ranges {
            let window = &self.text[range.offset..range.offset + range.length];
            decode::post_window(pool, self.spec, window, range.vaddr, publish.clone())?;
        }
        Ok(())
    }

    /// Post decode jobs for the part of each code range that intersects
    /// `[vstart, vend)`. Posting nothing is an error; whether that was a
    /// miss or a post failure shows up in the logs only.
    pub fn post_range(
        &self,
        pool: &WorkerPool,
        vstart: Address,
        vend: Address,
        publish: PublishFn,
    ) -> Result<(), Error> {
        let mut posted = 0usize;
        for range in &self.ranges {
            let range_end = range.vaddr + range.length as Address;
            if range.vaddr >= vend || range_end <= vstart {
                continue;
            }

            let job_vaddr = range.vaddr.max(vstart);
            let job_end = range_end.min(vend);
            let offset = (job_vaddr - self.text_vaddr) as usize;
            let length = (job_end - job_vaddr) as usize;
            decode::post_window(
                pool,
                self.spec,
                &self.text[offset..offset + length],
                job_vaddr,
                publish.clone(),
            )?;
            posted += 1;
        }

        if posted == 0 {
            log::debug!("no code range intersects 0x{vstart:x}..0x{vend:x}");
            return Err(Error::PostFailure);
        }
        Ok(())
    }

    /// Extract printable string literals of at least `min_len` bytes from
    /// the data and string sections.
    pub fn extract_strings(&self, min_len: usize) -> Vec<String> {
        let mut strings = Vec::new();

        for shdr in &self.elf.shdrs {
            let name = match self.elf.section_name(shdr) {
                Some(name) if STRING_SECTIONS.contains(&name) => name,
                _ => continue,
            };
            if shdr.size == 0 {
                continue;
            }
            let data = match read_section(&self.elf.path, shdr) {
                Ok(data) => data,
                Err(err) => {
                    log::warn!("skipping strings in {name}: {err}");
                    continue;
                }
            };

            let mut start = None;
            for (i, &byte) in data.iter().enumerate() {
                if is_printable(byte) {
                    start.get_or_insert(i);
                } else if let Some(s) = start.take() {
                    push_candidate(&mut strings, &data[s..i], min_len);
                }
            }
            if let Some(s) = start.take() {
                push_candidate(&mut strings, &data[s..], min_len);
            }
        }
        strings
    }

    /// Extract symbol records from `.symtab` and `.dynsym`.
    pub fn extract_symbols(&self) -> Vec<Symbol> {
        let mut symbols = Vec::new();

        for shdr in &self.elf.shdrs {
            let name = match self.elf.section_name(shdr) {
                Some(name) if SYMBOL_SECTIONS.contains(&name) => name,
                _ => continue,
            };
            if shdr.size == 0 {
                continue;
            }

            // The associated string table comes from sh_link and must be a
            // nonzero STRTAB.
            let strhdr = match self.elf.shdrs.get(shdr.link as usize) {
                Some(h) if h.stype == SHT_STRTAB && h.size != 0 => *h,
                _ => continue,
            };

            let sym_data = match read_section(&self.elf.path, shdr) {
                Ok(data) => data,
                Err(err) => {
                    log::warn!("skipping symbols in {name}: {err}");
                    continue;
                }
            };
            let str_data = match read_section(&self.elf.path, &strhdr) {
                Ok(data) => data,
                Err(err) => {
                    log::warn!("skipping symbols in {name}: {err}");
                    continue;
                }
            };

            let native = match self.elf.class {
                ElfClass::Elf32 => elf::SYM32_SIZE,
                ElfClass::Elf64 => elf::SYM64_SIZE,
            };
            let entsize = if shdr.entsize != 0 {
                shdr.entsize as usize
            } else {
                native
            };
            let count = sym_data.len() / entsize;

            for i in 0..count {
                let parsed =
                    elf::parse_sym(&sym_data, i * entsize, self.elf.class, self.elf.data);
                let (name_off, value, size, info, other, shndx) = match parsed {
                    Some(fields) => fields,
                    None => break,
                };
                if name_off == 0 {
                    continue;
                }
                let name = match strtab_name(&str_data, name_off) {
                    Some(name) if !name.is_empty() => name,
                    _ => continue,
                };

                symbols.push(Symbol {
                    name,
                    value,
                    size,
                    info,
                    other,
                    shndx,
                    bind: info >> 4,
                    stype: info & 0x0f,
                });
            }
        }
        symbols
    }
}

/// Read a section's bytes out of the file it was parsed from.
fn read_section(path: &Path, shdr: &SectionHeader) -> Result<Vec<u8>, Error> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(shdr.offset))?;
    let mut data = vec![0u8; shdr.size as usize];
    file.read_exact(&mut data)?;
    Ok(data)
}

/// Look a name up in a string-table, requiring a NUL within bounds.
fn strtab_name(strtab: &[u8], off: u32) -> Option<String> {
    let start = off as usize;
    if start >= strtab.len() {
        return None;
    }
    let rest = &strtab[start..];
    let nul = rest.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&rest[..nul]).into_owned())
}

fn is_printable(byte: u8) -> bool {
    (0x20..=0x7e).contains(&byte)
}

/// Keep a printable run when it is long enough, at least half
/// alphanumeric, and not made of spaces alone.
fn push_candidate(out: &mut Vec<String>, run: &[u8], min_len: usize) {
    if run.len() < min_len {
        return;
    }
    let alnum = run.iter().filter(|b| b.is_ascii_alphanumeric()).count();
    let spaces = run.iter().filter(|&&b| b == b' ').count();
    if alnum * 2 >= run.len() && spaces < run.len() {
        out.push(String::from_utf8_lossy(run).into_owned());
    }
}
