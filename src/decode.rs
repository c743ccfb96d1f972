//! Disassembly job runner.
//!
//! Each worker keeps one Capstone handle in thread-local storage, keyed by
//! the architecture pair it was opened for; a job carrying a different pair
//! drops the old handle and opens a fresh one. Decoded windows are wrapped
//! in a [`Batch`] and handed to the publish callback.

use std::cell::RefCell;

use capstone::{Capstone, NO_EXTRA_MODE};

use crate::pool::WorkerPool;
use crate::{
    Address, ArchSpec, Batch, Error, Insn, PublishFn, MAX_INSTRUCTION_SIZE, MAX_MNEMONIC_LEN,
    MAX_OPERANDS_LEN,
};

thread_local! {
    static DECODER: RefCell<Option<(ArchSpec, Capstone)>> = const { RefCell::new(None) };
}

/// Run `f` with this thread's Capstone handle for `spec`, opening or
/// replacing the cached handle as needed.
fn with_decoder<R>(
    spec: ArchSpec,
    f: impl FnOnce(&Capstone) -> R,
) -> Result<R, capstone::Error> {
    DECODER.with(|cell| {
        let mut slot = cell.borrow_mut();
        let stale = match slot.as_ref() {
            Some((cached, _)) => *cached != spec,
            None => true,
        };
        if stale {
            let (arch, mode) = spec.capstone();
            let cs = Capstone::new_raw(arch, mode, NO_EXTRA_MODE, None)?;
            *slot = Some((spec, cs));
        }
        match slot.as_ref() {
            Some((_, cs)) => Ok(f(cs)),
            None => unreachable!("decoder slot filled above"),
        }
    })
}

/// Bound a decoded text field to `max` bytes, backing off to the nearest
/// char boundary.
fn clipped(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Decode one byte window from `vaddr`, producing owned instruction
/// records in address order.
pub fn decode_window(
    spec: ArchSpec,
    data: &[u8],
    vaddr: Address,
) -> Result<Vec<Insn>, capstone::Error> {
    with_decoder(spec, |cs| {
        let decoded = cs.disasm_all(data, vaddr)?;
        let mut insns = Vec::with_capacity(decoded.len());
        for raw in decoded.iter() {
            let size = raw.bytes().len().min(MAX_INSTRUCTION_SIZE);
            let mut bytes = [0u8; MAX_INSTRUCTION_SIZE];
            bytes[..size].copy_from_slice(&raw.bytes()[..size]);
            insns.push(Insn {
                addr: raw.address(),
                size: size as u8,
                mnemonic: clipped(raw.mnemonic().unwrap_or(""), MAX_MNEMONIC_LEN),
                operands: clipped(raw.op_str().unwrap_or(""), MAX_OPERANDS_LEN),
                bytes,
            });
        }
        Ok(insns)
    })?
}

/// Job body: decode the window and publish the resulting batch.
///
/// A decoder-open failure aborts the single job; nothing is published.
fn run_window(spec: ArchSpec, data: Vec<u8>, vaddr: Address, publish: &PublishFn) {
    let insns = match decode_window(spec, &data, vaddr) {
        Ok(insns) => insns,
        Err(err) => {
            log::warn!("decode of {} bytes at 0x{vaddr:x} failed: {err}", data.len());
            return;
        }
    };

    publish(Batch {
        base: vaddr,
        length: data.len(),
        read: data.len(),
        pid: None,
        insns,
    });
}

/// Copy `data` and post one decode job for it.
pub fn post_window(
    pool: &WorkerPool,
    spec: ArchSpec,
    data: &[u8],
    vaddr: Address,
    publish: PublishFn,
) -> Result<(), Error> {
    if data.is_empty() {
        return Err(Error::PostFailure);
    }
    let copy = data.to_vec();
    pool.post(move || run_window(spec, copy, vaddr, &publish))
}
