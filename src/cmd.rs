//! Command interpreter and key handling.
//!
//! Commands are matched on exact whitespace-delimited tokens, so
//! `view strings` parses and `view stringsXYZ` does not. Rejected commands
//! only ever touch the status line; loaded data is never disturbed by a
//! failed command.

use std::fs::File;
use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent};

use crate::emit::Emitter;
use crate::model::{ViewMode, ViewModel, LINE_MAX};
use crate::pool::WorkerPool;
use crate::{Address, ArchSpec, Error, PublishFn};

/// Rows a page-up / page-down jump moves the selection by.
const PAGE_STEP: isize = 16;

/// What the UI loop should do after a key or command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    /// Redraw without other side effects.
    Refresh,
    /// Leave the event loop.
    Quit,
}

/// Foreground-side command state: the model, the pool jobs are posted to,
/// and the currently loaded image.
pub struct Commander {
    model: Arc<ViewModel>,
    pool: Arc<WorkerPool>,
    publish: PublishFn,
    /// CLI-level architecture override, `None` for ELF auto-detection.
    arch: Option<ArchSpec>,
    emitter: Option<Emitter>,
}

impl Commander {
    pub fn new(
        model: Arc<ViewModel>,
        pool: Arc<WorkerPool>,
        publish: PublishFn,
        arch: Option<ArchSpec>,
    ) -> Commander {
        Commander { model, pool, publish, arch, emitter: None }
    }

    /// The currently loaded image, if any.
    pub fn emitter(&self) -> Option<&Emitter> {
        self.emitter.as_ref()
    }

    /// Dispatch one key press.
    pub fn handle_key(&mut self, key: KeyEvent) -> Action {
        match key.code {
            KeyCode::Up => self.move_selection(-1),
            KeyCode::Down => self.move_selection(1),
            KeyCode::PageUp => self.move_selection(-PAGE_STEP),
            KeyCode::PageDown => self.move_selection(PAGE_STEP),
            KeyCode::Backspace => {
                self.model.lock().cmd.pop();
                Action::None
            }
            KeyCode::Esc => {
                self.model.lock().cmd.clear();
                Action::None
            }
            KeyCode::Enter => {
                let line = std::mem::take(&mut self.model.lock().cmd);
                self.execute(&line)
            }
            KeyCode::Char(c) if (' '..='~').contains(&c) => {
                let mut state = self.model.lock();
                if state.cmd.len() < LINE_MAX {
                    state.cmd.push(c);
                }
                Action::None
            }
            _ => Action::None,
        }
    }

    /// Parse and run one command line.
    pub fn execute(&mut self, line: &str) -> Action {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [] => Action::None,
            ["quit"] => Action::Quit,
            ["refresh"] => Action::Refresh,
            ["view", "instructions"] => {
                self.model.set_view(ViewMode::Instructions);
                Action::None
            }
            ["view", "strings"] => {
                self.model.set_view(ViewMode::Strings);
                Action::None
            }
            ["view", "symbols"] => {
                self.model.set_view(ViewMode::Symbols);
                Action::None
            }
            ["goto", addr] => self.goto(addr),
            ["open", path] => {
                if let Err(err) = self.open_image(path) {
                    self.model.set_status(format!("open failed: {err}"));
                }
                Action::None
            }
            _ => {
                self.model.set_status(format!("unknown command: {line}"));
                Action::None
            }
        }
    }

    fn move_selection(&self, delta: isize) -> Action {
        let mut state = self.model.lock();
        let len = state.active_len();
        if len == 0 {
            return Action::None;
        }
        let target = (state.selected as isize + delta).clamp(0, len as isize - 1);
        state.selected = target as usize;
        Action::None
    }

    /// Jump to the first instruction at or past an address.
    fn goto(&self, token: &str) -> Action {
        let parsed = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
            Address::from_str_radix(hex, 16)
        } else {
            token.parse::<Address>()
        };
        let addr = match parsed {
            Ok(addr) => addr,
            Err(_) => {
                self.model.set_status(format!("invalid address: {token}"));
                return Action::None;
            }
        };

        let mut state = self.model.lock();
        if state.view != ViewMode::Instructions {
            state.set_status("goto works in the instructions view");
            return Action::None;
        }
        let (first, last) = match (state.instructions.first(), state.instructions.last()) {
            (Some(first), Some(last)) => (first.insn.addr, last.insn.addr),
            _ => {
                state.set_status("no instructions loaded");
                return Action::None;
            }
        };
        if addr < first || addr > last {
            state.set_status(format!("address 0x{addr:x} out of range"));
            return Action::None;
        }

        let idx = state
            .instructions
            .partition_point(|row| row.insn.addr < addr);
        state.selected = idx;
        state.scroll = idx;
        let landed = state.instructions[idx].insn.addr;
        state.set_status(format!("jumped to 0x{landed:08x}"));
        Action::None
    }

    /// Load an image: clear the model, disassemble everything, extract
    /// strings and symbols.
    ///
    /// An unopenable path fails before the model is touched; later
    /// failures leave the model cleared.
    pub fn open_image(&mut self, path: &str) -> Result<(), Error> {
        File::open(path)?;

        self.emitter = None;
        self.model.clear_all();

        let mut emitter = Emitter::load(path, self.arch)?;
        emitter.scan();
        emitter.post_all(&self.pool, self.publish.clone())?;

        self.model.add_strings(emitter.extract_strings(4));
        self.model.add_symbols(emitter.extract_symbols());
        self.model
            .set_subtitle(format!("{path} | {}", emitter.spec()));
        self.model.set_status(format!(
            "loaded {path} ({} code ranges)",
            emitter.ranges().len()
        ));
        self.emitter = Some(emitter);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Insn, MAX_INSTRUCTION_SIZE};
    use crossterm::event::KeyModifiers;

    fn commander() -> (Commander, Arc<ViewModel>) {
        let model = Arc::new(ViewModel::new("t", "s"));
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        let publish: PublishFn = {
            let model = Arc::clone(&model);
            Arc::new(move |batch: crate::Batch| model.add_instructions(batch.insns))
        };
        (
            Commander::new(Arc::clone(&model), pool, publish, None),
            model,
        )
    }

    fn insn(addr: u64) -> Insn {
        Insn {
            addr,
            size: 1,
            mnemonic: "nop".to_string(),
            operands: String::new(),
            bytes: [0x90; MAX_INSTRUCTION_SIZE],
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_quit_and_refresh_actions() {
        let (mut cmd, _model) = commander();
        assert_eq!(cmd.execute("quit"), Action::Quit);
        assert_eq!(cmd.execute("refresh"), Action::Refresh);
        assert_eq!(cmd.execute(""), Action::None);
    }

    #[test]
    fn test_goto_selects_first_address_at_or_past_target() {
        let (mut cmd, model) = commander();
        model.add_instructions(vec![
            insn(0x1000),
            insn(0x1003),
            insn(0x100a),
            insn(0x1012),
        ]);

        cmd.execute("goto 0x1005");
        assert_eq!(model.lock().selected, 2);

        cmd.execute("goto 0x1012");
        assert_eq!(model.lock().selected, 3);

        // Decimal addresses parse too: 4102 == 0x1006.
        cmd.execute("goto 4102");
        assert_eq!(model.lock().selected, 2);
    }

    #[test]
    fn test_goto_outside_range_is_rejected() {
        let (mut cmd, model) = commander();
        model.add_instructions(vec![insn(0x1000), insn(0x1003)]);
        {
            let mut state = model.lock();
            state.selected = 1;
        }

        cmd.execute("goto 0x0fff");
        let state = model.lock();
        assert_eq!(state.selected, 1);
        assert!(state.status.contains("out of range"));
    }

    #[test]
    fn test_goto_needs_instructions_view_with_data() {
        let (mut cmd, model) = commander();
        cmd.execute("goto 0x1000");
        assert!(model.lock().status.contains("no instructions"));

        model.add_instructions(vec![insn(0x1000)]);
        model.set_view(ViewMode::Strings);
        cmd.execute("goto 0x1000");
        assert!(model.lock().status.contains("instructions view"));
    }

    #[test]
    fn test_goto_invariant_holds_after_jump() {
        let (mut cmd, model) = commander();
        let addrs = [0x1000u64, 0x1004, 0x1008, 0x1010, 0x1020];
        model.add_instructions(addrs.iter().map(|&a| insn(a)).collect());

        cmd.execute("goto 0x1009");
        let state = model.lock();
        let sel = state.selected;
        assert!(state.instructions[sel].insn.addr >= 0x1009);
        assert!(sel == 0 || state.instructions[sel - 1].insn.addr < 0x1009);
    }

    #[test]
    fn test_view_command_requires_exact_tokens() {
        let (mut cmd, model) = commander();
        cmd.execute("view symbols");
        assert_eq!(model.lock().view, ViewMode::Symbols);

        cmd.execute("view stringsXYZ");
        let state = model.lock();
        assert_eq!(state.view, ViewMode::Symbols);
        assert!(state.status.contains("unknown command"));
    }

    #[test]
    fn test_unknown_command_sets_status_only() {
        let (mut cmd, model) = commander();
        model.add_strings(vec!["keepme".into()]);
        cmd.execute("frobnicate");

        let state = model.lock();
        assert!(state.status.contains("unknown command: frobnicate"));
        assert_eq!(state.strings.len(), 1);
    }

    #[test]
    fn test_open_missing_file_reports_status() {
        let (mut cmd, model) = commander();
        cmd.execute("open /no/such/file");
        assert!(model.lock().status.contains("open failed"));
    }

    #[test]
    fn test_typed_characters_build_the_command_line() {
        let (mut cmd, model) = commander();
        for c in "view strings".chars() {
            cmd.handle_key(key(KeyCode::Char(c)));
        }
        assert_eq!(model.lock().cmd, "view strings");

        cmd.handle_key(key(KeyCode::Backspace));
        assert_eq!(model.lock().cmd, "view string");

        // Enter submits and always clears the buffer.
        cmd.handle_key(key(KeyCode::Enter));
        let state = model.lock();
        assert!(state.cmd.is_empty());
        assert!(state.status.contains("unknown command"));
    }

    #[test]
    fn test_command_buffer_is_bounded() {
        let (mut cmd, model) = commander();
        for _ in 0..(LINE_MAX + 50) {
            cmd.handle_key(key(KeyCode::Char('a')));
        }
        assert_eq!(model.lock().cmd.len(), LINE_MAX);
    }

    #[test]
    fn test_navigation_clamps_to_view_bounds() {
        let (mut cmd, model) = commander();
        model.add_instructions((0..5).map(|i| insn(0x1000 + i)).collect());

        cmd.handle_key(key(KeyCode::Up));
        assert_eq!(model.lock().selected, 0);

        cmd.handle_key(key(KeyCode::PageDown));
        assert_eq!(model.lock().selected, 4);

        cmd.handle_key(key(KeyCode::Down));
        assert_eq!(model.lock().selected, 4);

        cmd.handle_key(key(KeyCode::PageUp));
        assert_eq!(model.lock().selected, 0);
    }

    #[test]
    fn test_open_loads_disassembles_and_extracts() {
        use crate::elf::fixtures::{build_elf64, SectionSpec};
        use crate::elf::{ElfData, EM_X86_64};

        let bytes = build_elf64(
            EM_X86_64,
            ElfData::Lsb,
            &[
                SectionSpec::progbits(".text", 0x1000, vec![0x55, 0x48, 0x89, 0xe5, 0xc3]),
                SectionSpec::progbits(".rodata", 0x2000, b"hello world str\0".to_vec()),
            ],
        );
        let path = std::env::temp_dir().join(format!(
            "elfscope-cmd-open-{}.elf",
            std::process::id()
        ));
        std::fs::write(&path, &bytes).unwrap();

        let (mut cmd, model) = commander();
        let action = cmd.execute(&format!("open {}", path.display()));
        assert_eq!(action, Action::None);
        cmd.pool.drain();

        assert!(cmd.emitter().is_some());
        let state = model.lock();
        assert!(state.subtitle.ends_with("| x86_64"));
        assert!(!state.instructions.is_empty());
        assert_eq!(state.instructions[0].insn.addr, 0x1000);
        assert_eq!(state.strings, vec!["hello world str".to_string()]);
        assert!(state.status.contains("loaded"));
    }
}
