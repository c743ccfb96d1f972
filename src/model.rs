//! Shared presentation model for the terminal views.
//!
//! Workers publish decoded batches into the model while the foreground
//! renders it, so every mutation and every read of the inner sequences
//! happens under the model mutex.

use std::sync::{Mutex, MutexGuard};

use crate::elf::Symbol;
use crate::{Insn, MAX_INSTRUCTION_SIZE};

/// Upper bound for the command and status line buffers.
pub const LINE_MAX: usize = 256;

/// Which sequence the list window shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Instructions,
    Strings,
    Symbols,
}

impl ViewMode {
    pub fn label(self) -> &'static str {
        match self {
            ViewMode::Instructions => "instructions",
            ViewMode::Strings => "strings",
            ViewMode::Symbols => "symbols",
        }
    }
}

/// A decoded instruction plus the display line attached at publication.
#[derive(Debug, Clone)]
pub struct InsnRow {
    pub insn: Insn,
    pub line: String,
}

/// Everything the renderer reads, guarded by [`ViewModel`]'s mutex.
#[derive(Debug)]
pub struct ViewState {
    pub title: String,
    pub subtitle: String,
    pub instructions: Vec<InsnRow>,
    pub strings: Vec<String>,
    pub symbols: Vec<String>,
    pub view: ViewMode,
    pub selected: usize,
    pub scroll: usize,
    pub cmd: String,
    pub status: String,
}

impl ViewState {
    /// Length of the sequence behind the active view.
    pub fn active_len(&self) -> usize {
        match self.view {
            ViewMode::Instructions => self.instructions.len(),
            ViewMode::Strings => self.strings.len(),
            ViewMode::Symbols => self.symbols.len(),
        }
    }

    /// Display line for row `idx` of the active view.
    pub fn active_line(&self, idx: usize) -> Option<&str> {
        match self.view {
            ViewMode::Instructions => self.instructions.get(idx).map(|row| row.line.as_str()),
            ViewMode::Strings => self.strings.get(idx).map(String::as_str),
            ViewMode::Symbols => self.symbols.get(idx).map(String::as_str),
        }
    }

    /// Keep `selected` inside the active view (both indices zero when the
    /// view is empty).
    pub fn clamp_selection(&mut self) {
        let len = self.active_len();
        if len == 0 {
            self.selected = 0;
            self.scroll = 0;
        } else if self.selected >= len {
            self.selected = len - 1;
        }
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        let mut status = status.into();
        if status.len() > LINE_MAX {
            let mut end = LINE_MAX;
            while !status.is_char_boundary(end) {
                end -= 1;
            }
            status.truncate(end);
        }
        self.status = status;
    }
}

/// Thread-safe bag of decoded instructions, extracted strings and symbol
/// lines.
pub struct ViewModel {
    state: Mutex<ViewState>,
}

impl ViewModel {
    pub fn new(title: impl Into<String>, subtitle: impl Into<String>) -> ViewModel {
        ViewModel {
            state: Mutex::new(ViewState {
                title: title.into(),
                subtitle: subtitle.into(),
                instructions: Vec::new(),
                strings: Vec::new(),
                symbols: Vec::new(),
                view: ViewMode::Instructions,
                selected: 0,
                scroll: 0,
                cmd: String::new(),
                status: String::new(),
            }),
        }
    }

    /// Lock the model for rendering or command handling.
    pub fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap()
    }

    /// Attach display lines to `insns` and append them to the
    /// instructions view.
    pub fn add_instructions(&self, insns: Vec<Insn>) {
        let mut state = self.lock();
        for insn in insns {
            let line = format_insn_line(&insn);
            state.instructions.push(InsnRow { insn, line });
        }
    }

    /// Drop all decoded instructions and reset the selection.
    pub fn clear_instructions(&self) {
        let mut state = self.lock();
        state.instructions.clear();
        state.selected = 0;
        state.scroll = 0;
    }

    /// Drop everything a loaded image contributed.
    pub fn clear_all(&self) {
        let mut state = self.lock();
        state.instructions.clear();
        state.strings.clear();
        state.symbols.clear();
        state.selected = 0;
        state.scroll = 0;
    }

    pub fn add_strings(&self, strings: Vec<String>) {
        let mut state = self.lock();
        state.strings.extend(strings);
    }

    /// Format symbol records into display lines and append them.
    pub fn add_symbols(&self, symbols: Vec<Symbol>) {
        let mut state = self.lock();
        for sym in symbols {
            let line = if sym.value != 0 {
                format!("0x{:x}:\t{}", sym.value, sym.name)
            } else {
                format!("(lib./ext.):\t{}", sym.name)
            };
            state.symbols.push(line);
        }
    }

    /// Switch the active view, resetting the selection.
    pub fn set_view(&self, view: ViewMode) {
        let mut state = self.lock();
        state.view = view;
        state.selected = 0;
        state.scroll = 0;
        state.set_status(format!("switched to {} view", view.label()));
    }

    pub fn set_subtitle(&self, subtitle: impl Into<String>) {
        self.lock().subtitle = subtitle.into();
    }

    pub fn set_status(&self, status: impl Into<String>) {
        self.lock().set_status(status);
    }
}

/// `0xADDR:  BB BB …16 byte slots…  MNEM OPERANDS`
fn format_insn_line(insn: &Insn) -> String {
    let mut line = format!("0x{:08x}:  ", insn.addr);
    for i in 0..MAX_INSTRUCTION_SIZE {
        if i < insn.size as usize {
            line.push_str(&format!("{:02x} ", insn.bytes[i]));
        } else {
            line.push_str("   ");
        }
    }
    line.push(' ');
    line.push_str(&insn.mnemonic);
    if !insn.operands.is_empty() {
        line.push(' ');
        line.push_str(&insn.operands);
    }
    line
}
