//! Progress narration targets.
//!
//! Cycles narrate what they are doing: the raw token stream, phase notes,
//! served facts. Where that narration lands depends on who is watching: a
//! foreground cycle talks to the console, a background cycle appends to a
//! log file, and a handoff swaps one for the other mid-flight through
//! [`RedirectableSink`].

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use anyhow::{Context, Result};
use edify_types::Hint;

/// A narration target.
///
/// Purely informational: implementations never influence control flow, and
/// write failures are logged, not surfaced.
pub trait Progress: Send + Sync {
    /// Appends text without a newline.
    fn write(&self, text: &str, hint: Hint);

    /// Appends text followed by a newline.
    fn line(&self, text: &str, hint: Hint);
}

fn recover<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Appends narration to a durable log file. Hints are dropped; the file
/// carries plain text.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    /// Opens `path` for appending, creating it and its parent directory if
    /// needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open progress log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, text: &str) {
        let mut file = recover(&self.file);
        if let Err(err) = file.write_all(text.as_bytes()) {
            tracing::warn!(path = %self.path.display(), "progress log write failed: {err}");
        }
    }
}

impl Progress for FileSink {
    fn write(&self, text: &str, _hint: Hint) {
        self.append(text);
    }

    fn line(&self, text: &str, _hint: Hint) {
        self.append(text);
        self.append("\n");
    }
}

/// Collects narration in memory. Test double and prompt-dump target.
#[derive(Default)]
pub struct MemorySink {
    buffer: Mutex<String>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contents(&self) -> String {
        recover(&self.buffer).clone()
    }
}

impl Progress for MemorySink {
    fn write(&self, text: &str, _hint: Hint) {
        recover(&self.buffer).push_str(text);
    }

    fn line(&self, text: &str, _hint: Hint) {
        let mut buffer = recover(&self.buffer);
        buffer.push_str(text);
        buffer.push('\n');
    }
}

/// A sink whose target can be swapped while a cycle is running.
///
/// Background cycles start pointed at a [`FileSink`]; when the interactive
/// surface decides to wait for the running cycle instead of starting its
/// own, it redirects the narration to the console and the user watches the
/// cycle finish live.
#[derive(Clone)]
pub struct RedirectableSink {
    target: Arc<RwLock<Arc<dyn Progress>>>,
}

impl RedirectableSink {
    #[must_use]
    pub fn new(initial: Arc<dyn Progress>) -> Self {
        Self {
            target: Arc::new(RwLock::new(initial)),
        }
    }

    /// Points all subsequent narration at `to`.
    pub fn redirect(&self, to: Arc<dyn Progress>) {
        let mut target = match self.target.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *target = to;
    }

    fn current(&self) -> Arc<dyn Progress> {
        let target = match self.target.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(&target)
    }
}

impl Progress for RedirectableSink {
    fn write(&self, text: &str, hint: Hint) {
        self.current().write(text, hint);
    }

    fn line(&self, text: &str, hint: Hint) {
        self.current().line(text, hint);
    }
}
