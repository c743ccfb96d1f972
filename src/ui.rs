//! Terminal front-end: raw-mode lifecycle and the three-pane layout
//! (header, list, footer) over the shared view model.

use std::io::{self, stdout, Stdout};
use std::panic;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Position, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
    Frame, Terminal,
};

use crate::cmd::{Action, Commander};
use crate::model::{ViewModel, ViewState};

const DEFAULT_HINT: &str =
    "'open ./binary'  quit  refresh  arrows=move  'view strings'";

/// Set up a panic hook that restores the terminal before printing.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(stdout(), LeaveAlternateScreen);
        original_hook(panic_info);
    }));
}

/// Enter raw mode and the alternate screen.
pub fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restore the terminal to normal mode.
pub fn restore_terminal() -> io::Result<()> {
    disable_raw_mode()?;
    execute!(stdout(), LeaveAlternateScreen)?;
    Ok(())
}

/// Event loop: render, poll, dispatch keys. Returns on `quit`.
///
/// The short poll interval keeps batches published by workers appearing
/// without waiting for a keypress.
pub fn run(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    model: &ViewModel,
    commander: &mut Commander,
) -> io::Result<()> {
    loop {
        terminal.draw(|frame| {
            let mut state = model.lock();
            draw(frame, &mut state);
        })?;

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if commander.handle_key(key) == Action::Quit {
                    return Ok(());
                }
            }
            // Resizes are picked up by the next draw.
            _ => {}
        }
    }
}

/// Render one frame. Takes the locked state so selection clamping and
/// scroll-follow happen atomically with the draw.
pub fn draw(frame: &mut Frame, state: &mut ViewState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(4),
        ])
        .split(frame.area());

    draw_header(frame, chunks[0], state);
    draw_list(frame, chunks[1], state);
    draw_footer(frame, chunks[2], state);
}

fn draw_header(frame: &mut Frame, area: Rect, state: &ViewState) {
    let title = Span::styled(
        format!(" {} ", state.title),
        Style::default().add_modifier(Modifier::BOLD),
    );
    let header = Paragraph::new(state.subtitle.as_str())
        .block(Block::default().borders(Borders::ALL).title(title));
    frame.render_widget(header, area);
}

fn draw_list(frame: &mut Frame, area: Rect, state: &mut ViewState) {
    let inner_h = area.height.saturating_sub(2) as usize;
    let count = state.active_len();

    // Keep the selection in bounds and visible.
    state.clamp_selection();
    let max_scroll = count.saturating_sub(inner_h);
    state.scroll = state.scroll.min(max_scroll);
    if state.selected < state.scroll {
        state.scroll = state.selected;
    }
    if inner_h > 0 && state.selected >= state.scroll + inner_h {
        state.scroll = state.selected - inner_h + 1;
    }

    let mut lines = Vec::with_capacity(inner_h);
    for row in 0..inner_h {
        let idx = state.scroll + row;
        let Some(text) = state.active_line(idx) else {
            break;
        };
        let style = if idx == state.selected {
            Style::default().add_modifier(Modifier::REVERSED)
        } else {
            Style::default()
        };
        lines.push(Line::styled(format!(" {text}"), style));
    }

    let label = format!(" {} ({count}) ", state.view.label());
    let list = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(label));
    frame.render_widget(list, area);

    if count > inner_h {
        let mut sb_state = ScrollbarState::new(max_scroll).position(state.scroll);
        frame.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight),
            area,
            &mut sb_state,
        );
    }
}

fn draw_footer(frame: &mut Frame, area: Rect, state: &ViewState) {
    let status = if state.status.is_empty() {
        DEFAULT_HINT
    } else {
        state.status.as_str()
    };
    let lines = vec![
        Line::from(status),
        Line::styled(
            format!(":{}", state.cmd),
            Style::default().add_modifier(Modifier::BOLD),
        ),
    ];
    let footer = Paragraph::new(lines).block(Block::default().borders(Borders::ALL));
    frame.render_widget(footer, area);

    // Cursor sits at the end of the command line.
    let x = (area.x + 2 + state.cmd.len() as u16).min(area.x + area.width.saturating_sub(2));
    frame.set_cursor_position(Position::new(x, area.y + 2));
}
