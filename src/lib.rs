//! Core types and pipeline for the elfscope disassembly explorer.
//!
//! This library parses ELF objects, carves their `.text` section into
//! contiguous code ranges, disassembles those ranges on a worker pool and
//! publishes the decoded instructions into a shared presentation model that
//! the terminal front-end renders.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use elfscope::{Batch, PublishFn};
//! use elfscope::emit::Emitter;
//! use elfscope::model::ViewModel;
//! use elfscope::pool::WorkerPool;
//!
//! let model = Arc::new(ViewModel::new("elfscope", ""));
//! let pool = WorkerPool::new(4).unwrap();
//!
//! // Workers hand finished batches straight to the model.
//! let publish: PublishFn = {
//!     let model = Arc::clone(&model);
//!     Arc::new(move |batch: Batch| model.add_instructions(batch.insns))
//! };
//!
//! let mut emitter = Emitter::load("path/to/binary", None).unwrap();
//! emitter.scan();
//! emitter.post_all(&pool, publish).unwrap();
//! pool.drain();
//! ```

pub mod cmd;
pub mod decode;
pub mod elf;
pub mod emit;
pub mod model;
pub mod pool;
pub mod proc;
pub mod scan;
pub mod ui;

use std::fmt;
use std::sync::Arc;

/// A virtual address inside the loaded image.
pub type Address = u64;

/// Largest encoding any supported decoder produces, in bytes.
pub const MAX_INSTRUCTION_SIZE: usize = 16;

/// Longest mnemonic kept on a decoded instruction.
pub const MAX_MNEMONIC_LEN: usize = 31;

/// Longest operand string kept on a decoded instruction.
pub const MAX_OPERANDS_LEN: usize = 127;

/// One decoded instruction, as workers publish it to the instructions
/// view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insn {
    /// Virtual address the instruction was decoded at.
    pub addr: Address,
    /// Encoded length, never more than [`MAX_INSTRUCTION_SIZE`].
    pub size: u8,
    /// Mnemonic text, at most [`MAX_MNEMONIC_LEN`] bytes.
    pub mnemonic: String,
    /// Operand text, at most [`MAX_OPERANDS_LEN`] bytes.
    pub operands: String,
    /// Encoding buffer; only the first `size` bytes are meaningful.
    pub bytes: [u8; MAX_INSTRUCTION_SIZE],
}

impl Insn {
    /// The encoding without the unused tail of the buffer.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.size as usize]
    }
}

/// Supported architecture families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// x86 (either bitness)
    X86,
    /// ARM (32-bit)
    Arm,
    /// AArch64 (ARM 64-bit)
    AArch64,
}

/// Decoder mode within an architecture family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// 32-bit
    Bits32,
    /// 64-bit
    Bits64,
    /// ARM mode (A32 / A64)
    Arm,
}

/// The (architecture, mode) pair the decoder is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchSpec {
    pub arch: Arch,
    pub mode: Mode,
}

impl ArchSpec {
    pub const X86_32: ArchSpec = ArchSpec { arch: Arch::X86, mode: Mode::Bits32 };
    pub const X86_64: ArchSpec = ArchSpec { arch: Arch::X86, mode: Mode::Bits64 };
    pub const ARM: ArchSpec = ArchSpec { arch: Arch::Arm, mode: Mode::Arm };
    pub const AARCH64: ArchSpec = ArchSpec { arch: Arch::AArch64, mode: Mode::Arm };

    /// Capstone `(Arch, Mode)` for this spec.
    pub fn capstone(self) -> (capstone::Arch, capstone::Mode) {
        match self.arch {
            Arch::X86 => match self.mode {
                Mode::Bits32 => (capstone::Arch::X86, capstone::Mode::Mode32),
                _ => (capstone::Arch::X86, capstone::Mode::Mode64),
            },
            Arch::Arm => (capstone::Arch::ARM, capstone::Mode::Arm),
            Arch::AArch64 => (capstone::Arch::ARM64, capstone::Mode::Arm),
        }
    }
}

impl fmt::Display for ArchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.arch, self.mode) {
            (Arch::X86, Mode::Bits32) => write!(f, "x86"),
            (Arch::X86, _) => write!(f, "x86_64"),
            (Arch::Arm, _) => write!(f, "arm"),
            (Arch::AArch64, _) => write!(f, "aarch64"),
        }
    }
}

/// One worker's decoded output for a single byte window.
///
/// Moving a batch into the publish callback transfers ownership of the
/// decoded instructions; the wrapper itself is dropped after publication.
#[derive(Debug)]
pub struct Batch {
    /// Virtual address of the first byte of the window.
    pub base: Address,
    /// Window length in bytes.
    pub length: usize,
    /// Bytes actually handed to the decoder.
    pub read: usize,
    /// Originating process, when the window came from live memory.
    pub pid: Option<i32>,
    /// Decoded instructions, non-decreasing by address.
    pub insns: Vec<Insn>,
}

/// Callback the pipeline invokes from worker context to hand off a batch.
pub type PublishFn = Arc<dyn Fn(Batch) + Send + Sync>;

/// Error type for all fallible operations in the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File could not be opened or read
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not start with the ELF magic
    #[error("not an elf image (bad magic)")]
    BadMagic,

    /// The file ends before the class-specific header does
    #[error("truncated elf header")]
    TruncatedHeader,

    /// `EI_CLASS` is neither ELFCLASS32 nor ELFCLASS64
    #[error("unsupported elf class {0}")]
    UnsupportedClass(u8),

    /// The image has no section named `.text`
    #[error("no .text section")]
    NoTextSection,

    /// Capstone failed to open or decode
    #[error("decoder error: {0}")]
    Decoder(#[from] capstone::Error),

    /// The worker pool rejected a job
    #[error("job submission rejected")]
    PostFailure,

    /// A user command was malformed or not applicable
    #[error("{0}")]
    Command(String),
}
