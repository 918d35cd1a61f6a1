//! Terminal display surface using ratatui-image.
//!
//! Picks the best graphics protocol the terminal supports:
//! - Sixel (Windows Terminal, xterm, foot, WezTerm, etc.)
//! - Kitty graphics protocol (Kitty, WezTerm, Ghostty)
//! - iTerm2 inline images (iTerm2, WezTerm)
//! - Halfblocks fallback (any terminal with 24-bit color)
//!
//! Keys `w` `u` `r` `+` `-` steer the producer; `q` or Esc quits.

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame, Terminal,
};
use ratatui_image::picker::{Picker, ProtocolType};
use ratatui_image::protocol::StatefulProtocol;
use ratatui_image::StatefulImage;
use std::io;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Screen;
use crate::protocol::Command;

/// Input poll period; also bounds how stale the picture can get.
const POLL: Duration = Duration::from_millis(16);

/// Create a Picker by querying terminal capabilities.
///
/// `force_protocol` skips detection. Must run before raw mode / alternate screen.
pub fn create_picker(force_protocol: Option<&str>) -> Picker {
    if let Some(name) = force_protocol {
        match parse_protocol(name) {
            Some(proto) => {
                let mut picker = Picker::halfblocks();
                picker.set_protocol_type(proto);
                info!(?proto, "graphics protocol forced");
                return picker;
            }
            None => warn!(protocol = name, "unknown graphics protocol, using auto-detect"),
        }
    }
    auto_detect_picker()
}

fn parse_protocol(name: &str) -> Option<ProtocolType> {
    match name.to_lowercase().as_str() {
        "sixel" => Some(ProtocolType::Sixel),
        "kitty" => Some(ProtocolType::Kitty),
        "iterm2" | "iterm" => Some(ProtocolType::Iterm2),
        "halfblocks" | "half" | "text" => Some(ProtocolType::Halfblocks),
        _ => None,
    }
}

fn auto_detect_picker() -> Picker {
    match Picker::from_query_stdio() {
        Ok(picker) => {
            info!(proto = ?picker.protocol_type(), "graphics protocol detected");
            picker
        }
        Err(e) => {
            debug!("terminal query failed: {}", e);
            let picker = env_heuristic_picker();
            info!(proto = ?picker.protocol_type(), "graphics protocol from environment");
            picker
        }
    }
}

/// WezTerm, Kitty, iTerm2, Ghostty and Windows Terminal all set identifiable env vars.
fn env_heuristic_picker() -> Picker {
    let term_program = std::env::var("TERM_PROGRAM").unwrap_or_default();
    let term = std::env::var("TERM").unwrap_or_default();
    let windows_terminal = std::env::var_os("WT_SESSION").is_some();

    let proto = protocol_for_env(&term_program, &term, windows_terminal);
    let mut picker = Picker::halfblocks();
    if proto != ProtocolType::Halfblocks {
        picker.set_protocol_type(proto);
    }
    picker
}

fn protocol_for_env(term_program: &str, term: &str, windows_terminal: bool) -> ProtocolType {
    if term_program.contains("WezTerm") {
        ProtocolType::Sixel
    } else if term_program.contains("iTerm") {
        ProtocolType::Iterm2
    } else if term.contains("xterm-kitty") || term_program.contains("kitty") {
        ProtocolType::Kitty
    } else if term_program.to_lowercase().contains("ghostty") {
        ProtocolType::Kitty
    } else if windows_terminal {
        ProtocolType::Sixel
    } else {
        ProtocolType::Halfblocks
    }
}

pub struct TerminalPresenter {
    picker: Picker,
    screen: watch::Receiver<Screen>,
    commands: mpsc::UnboundedSender<Command>,
    current: Screen,
    protocol: Option<StatefulProtocol>,
    last_sent: Option<Command>,
}

impl TerminalPresenter {
    pub fn new(picker: Picker, screen: watch::Receiver<Screen>, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            picker,
            screen,
            commands,
            current: Screen::default(),
            protocol: None,
            last_sent: None,
        }
    }

    /// Own the terminal until the user quits or `cancel` fires. Blocking; run it
    /// on its own thread. Cancels `cancel` on the way out.
    pub fn run(mut self, cancel: CancellationToken) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_loop(&mut terminal, &cancel);

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        cancel.cancel();
        result
    }

    fn run_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
        cancel: &CancellationToken,
    ) -> io::Result<()> {
        while !cancel.is_cancelled() {
            self.refresh();
            terminal.draw(|f| self.render(f))?;

            if !event::poll(POLL)? {
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Esc | KeyCode::Char('q') => break,
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
                KeyCode::Char(c) => {
                    if let Some(cmd) = Command::from_key(c) {
                        // The receiver is gone once the server stops; quitting follows.
                        let _ = self.commands.send(cmd);
                        self.last_sent = Some(cmd);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Pull the latest screen state; rebuild the image protocol only for a new frame.
    fn refresh(&mut self) {
        if !self.screen.has_changed().unwrap_or(false) {
            return;
        }
        let next = self.screen.borrow_and_update().clone();
        let new_frame = next.frames != self.current.frames || next.peer != self.current.peer;
        if new_frame {
            self.protocol = next
                .frame
                .as_ref()
                .map(|frame| self.picker.new_resize_protocol(frame.image.clone()));
        }
        self.current = next;
    }

    fn render(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(f.area());

        // Drawn straight into the area: a bordered block would clear it every frame
        // and flicker with Sixel/Kitty.
        match self.protocol.as_mut() {
            Some(protocol) => f.render_stateful_widget(StatefulImage::default(), chunks[0], protocol),
            None => {
                let text = if self.current.has_signal() {
                    "waiting for the first frame..."
                } else {
                    "NO SIGNAL"
                };
                let waiting = Paragraph::new(text)
                    .style(Style::default().fg(Color::DarkGray))
                    .alignment(Alignment::Center);
                f.render_widget(waiting, chunks[0]);
            }
        }

        f.render_widget(Paragraph::new(self.status_line()), chunks[1]);
    }

    fn status_line(&self) -> Line<'static> {
        let screen = &self.current;
        let mut spans = match screen.peer {
            Some(peer) => vec![
                Span::styled(" ● ", Style::default().fg(Color::Green)),
                Span::raw(peer.to_string()),
            ],
            None => vec![Span::styled(
                " NO SIGNAL ",
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            )],
        };
        if let Some((w, h)) = screen.resolution() {
            spans.push(Span::raw(format!("  {w}x{h}  {} fps", screen.fps)));
        }
        if let Some(cmd) = self.last_sent {
            spans.push(Span::styled(
                format!("  sent {}", cmd.as_byte() as char),
                Style::default().fg(Color::Yellow),
            ));
        }
        spans.push(Span::styled(
            "  w wide · u ultra · r rotate · +/- zoom · q quit",
            Style::default().fg(Color::DarkGray),
        ));
        Line::from(spans)
    }
}
