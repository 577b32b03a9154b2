pub mod parse;

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Default source: the kernel's virtual memory counters.
pub const DEFAULT_SOURCE_PATH: &str = "/proc/vmstat";

/// A line-oriented key/value source that can be re-read from the start.
///
/// Discovery and every sampling pass call `rewind()` and then pull lines in
/// order. Implementations must present the freshest content available at
/// the time of `rewind()`. Lines are raw bytes; decoding is up to the
/// parser, so a malformed line never hides the lines before it.
pub trait LineSource: Send {
    /// Human-readable identity for logs and errors.
    fn describe(&self) -> &str;

    /// Reset to the beginning of the source, refreshing its content.
    fn rewind(&mut self) -> io::Result<()>;

    /// Return the next line without its trailing newline, or `None` at end of input.
    fn next_line(&mut self) -> Option<&[u8]>;
}

/// A file re-opened by path on every `rewind()`.
///
/// The read buffer is kept across passes so steady-state sampling does not
/// allocate.
pub struct FileSource {
    path: PathBuf,
    display: String,
    buf: Vec<u8>,
    pos: usize,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let display = path.display().to_string();

        Self {
            path,
            display,
            buf: Vec::with_capacity(8 * 1024),
            pos: 0,
        }
    }
}

impl LineSource for FileSource {
    fn describe(&self) -> &str {
        &self.display
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.buf.clear();
        self.pos = 0;

        let mut file = File::open(&self.path)?;
        file.read_to_end(&mut self.buf)?;

        Ok(())
    }

    fn next_line(&mut self) -> Option<&[u8]> {
        next_line_in(&self.buf, &mut self.pos)
    }
}

/// In-memory text source, mainly for embedding and tests.
pub struct MemorySource {
    text: String,
    pos: usize,
}

impl MemorySource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            pos: 0,
        }
    }

    /// Replace the content seen by the next `rewind()`.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.pos = self.text.len();
    }
}

impl LineSource for MemorySource {
    fn describe(&self) -> &str {
        "memory"
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn next_line(&mut self) -> Option<&[u8]> {
        next_line_in(self.text.as_bytes(), &mut self.pos)
    }
}

fn next_line_in<'a>(text: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let rest = text.get(*pos..)?;
    if rest.is_empty() {
        return None;
    }

    match rest.iter().position(|&b| b == b'\n') {
        Some(end) => {
            *pos += end + 1;
            rest.get(..end)
        }
        None => {
            *pos = text.len();
            Some(rest)
        }
    }
}
