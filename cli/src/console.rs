//! Colored terminal output.
//!
//! The menu owns stdout; everything else in the process logs to a file.
//! Output failures are swallowed: a broken pipe should end the program via
//! stdin, not via a narration panic.

use std::io::{Write as _, stdout};

use crossterm::execute;
use crossterm::style::{Color, ResetColor, SetForegroundColor};
use edify_engine::Progress;
use edify_types::Hint;

/// Writes `text` in `color` and restores the default afterwards.
pub fn paint(text: &str, color: Color) {
    let mut out = stdout();
    let _ = execute!(out, SetForegroundColor(color));
    let _ = out.write_all(text.as_bytes());
    let _ = execute!(out, ResetColor);
    let _ = out.flush();
}

/// Narrates cycle progress straight to the terminal, one color per hint.
pub struct ConsoleSink;

impl Progress for ConsoleSink {
    fn write(&self, text: &str, hint: Hint) {
        emit(text, hint, false);
    }

    fn line(&self, text: &str, hint: Hint) {
        emit(text, hint, true);
    }
}

fn emit(text: &str, hint: Hint, newline: bool) {
    let mut out = stdout();
    if let Some(color) = color_for(hint) {
        let _ = execute!(out, SetForegroundColor(color));
    }
    let _ = out.write_all(text.as_bytes());
    if newline {
        let _ = out.write_all(b"\n");
    }
    let _ = execute!(out, ResetColor);
    // Flushed per call so the token stream appears live.
    let _ = out.flush();
}

fn color_for(hint: Hint) -> Option<Color> {
    match hint {
        Hint::Plain => None,
        Hint::Stream => Some(Color::Grey),
        Hint::Note => Some(Color::DarkGrey),
        Hint::Success => Some(Color::Green),
        Hint::Warning => Some(Color::Yellow),
        Hint::Error => Some(Color::Red),
    }
}
