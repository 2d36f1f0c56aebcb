//! Line assembly for the decoded fragment stream.

use std::borrow::Cow;
use std::sync::OnceLock;

use edify_types::CandidateLine;
use regex::Regex;

/// Leading list decoration: `"1. "` or `"- "`, optionally followed by a
/// bold label with a colon (`"1. **Topic**: "`).
const LIST_MARKER_PATTERN: &str = r"^(\d+\.|-)\s*(\*\*.*\*\*:\s+)?";

fn list_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(LIST_MARKER_PATTERN).expect("valid list marker pattern"))
}

/// Strips one leading list marker. Applied once, anchored, so a line that
/// legitimately begins with a dash after its marker keeps it.
#[must_use]
pub fn strip_list_markers(text: &str) -> Cow<'_, str> {
    list_marker_regex().replace(text, "")
}

/// Accumulates decoded fragments and emits completed candidate lines.
///
/// Fragments are appended raw; the unterminated tail stays buffered so the
/// thinking tracker can inspect it between fragments. Draining finalizes
/// every newline-terminated segment: trimmed, marker-stripped, and length
/// checked, in arrival order. Nothing after a newline is ever dropped.
#[derive(Debug, Default)]
pub struct StreamSegmenter {
    buffer: String,
}

impl StreamSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, fragment: &str) {
        self.buffer.push_str(fragment);
    }

    /// Text accumulated since the last completed line.
    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Discards the buffered tail (sentinel and marker recovery paths).
    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Finalizes every newline-terminated segment in the buffer. The text
    /// after the last newline becomes the new buffer.
    pub fn drain_complete(&mut self) -> Vec<CandidateLine> {
        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let tail = self.buffer.split_off(last_newline + 1);
        let completed = std::mem::replace(&mut self.buffer, tail);

        completed
            .split('\n')
            .filter_map(|segment| Self::finalize(segment))
            .collect()
    }

    /// Flushes the residual buffer as a last candidate. Generation is done
    /// at this point, so no trailing newline is coming.
    pub fn flush(&mut self) -> Option<CandidateLine> {
        let residual = std::mem::take(&mut self.buffer);
        Self::finalize(&residual)
    }

    fn finalize(segment: &str) -> Option<CandidateLine> {
        let trimmed = segment.trim();
        if trimmed.is_empty() {
            return None;
        }
        let stripped = strip_list_markers(trimmed);
        CandidateLine::new(stripped.into_owned()).ok()
    }
}
