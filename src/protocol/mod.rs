//! Wire protocol carried on the single duplex connection.
//!
//! ```text
//! producer ──► viewer   [u32 BE length][JPEG bytes] [u32 BE length][JPEG bytes] ...
//! viewer   ──► producer 'W' 'R' 'U' '+' ...   (one byte per command, no framing)
//! ```

pub mod framing;

pub use framing::{encode_packet, encode_packet_into, read_packet, read_packet_async, LENGTH_PREFIX_LEN};

/// Control instruction sent from the viewer to the producer.
///
/// Each command is a single self-delimiting byte. Re-sending a byte re-applies the
/// same action, so duplicates are harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `W`: select the wide lens.
    SelectWide,
    /// `U`: select the ultra-wide lens.
    SelectUltraWide,
    /// `R`: rotate the output orientation by 90°.
    Rotate,
    /// `+`: zoom in by one step.
    ZoomIn,
    /// `-`: zoom out by one step.
    ZoomOut,
}

/// Zoom change applied by one `+` / `-` command.
pub const ZOOM_STEP: f32 = 0.5;

impl Command {
    pub const ALL: [Command; 5] = [
        Command::SelectWide,
        Command::SelectUltraWide,
        Command::Rotate,
        Command::ZoomIn,
        Command::ZoomOut,
    ];

    /// Decode a control byte. Bytes outside the alphabet yield `None`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'W' => Some(Command::SelectWide),
            b'U' => Some(Command::SelectUltraWide),
            b'R' => Some(Command::Rotate),
            b'+' => Some(Command::ZoomIn),
            b'-' => Some(Command::ZoomOut),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Command::SelectWide => b'W',
            Command::SelectUltraWide => b'U',
            Command::Rotate => b'R',
            Command::ZoomIn => b'+',
            Command::ZoomOut => b'-',
        }
    }

    /// Keyboard binding used by both binaries. Case-insensitive; `=` and `_` stand in
    /// for `+` and `-` so the shift key is optional.
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'w' => Some(Command::SelectWide),
            'u' => Some(Command::SelectUltraWide),
            'r' => Some(Command::Rotate),
            '+' | '=' => Some(Command::ZoomIn),
            '-' | '_' => Some(Command::ZoomOut),
            _ => None,
        }
    }
}
