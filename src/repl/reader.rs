//! Line-reading drivers.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    /// Ctrl-C at the prompt.
    #[error("interrupted")]
    Interrupted,
    #[error("end of input")]
    Eof,
    #[error(transparent)]
    Readline(ReadlineError),
}

impl From<ReadlineError> for ReadError {
    fn from(err: ReadlineError) -> Self {
        match err {
            ReadlineError::Interrupted => ReadError::Interrupted,
            ReadlineError::Eof => ReadError::Eof,
            other => ReadError::Readline(other),
        }
    }
}

/// Source of physical input lines for the dispatch loop.
pub trait LineReader {
    /// Next physical line, without its newline.
    fn readline(&mut self) -> Result<String, ReadError>;

    fn set_prompt(&mut self, prompt: &str);

    /// Where diagnostics for this reader's user go.
    fn stderr(&self) -> Box<dyn Write + Send>;

    fn close(&mut self) {}
}

/// Interactive terminal reader with history.
pub struct EditorReader {
    editor: DefaultEditor,
    prompt: String,
    history: Option<PathBuf>,
}

impl EditorReader {
    pub fn new(history: Option<PathBuf>) -> Result<Self, ReadError> {
        let mut editor = DefaultEditor::new()?;
        if let Some(path) = &history
            && let Err(e) = editor.load_history(path)
        {
            debug!("no history loaded from {}: {e}", path.display());
        }
        Ok(Self {
            editor,
            prompt: String::new(),
            history,
        })
    }
}

impl LineReader for EditorReader {
    fn readline(&mut self) -> Result<String, ReadError> {
        let line = self.editor.readline(&self.prompt)?;
        if !line.trim().is_empty() {
            let _ = self.editor.add_history_entry(line.as_str());
        }
        Ok(line)
    }

    fn set_prompt(&mut self, prompt: &str) {
        self.prompt = prompt.to_string();
    }

    fn stderr(&self) -> Box<dyn Write + Send> {
        Box::new(io::stderr())
    }

    fn close(&mut self) {
        let Some(path) = &self.history else {
            return;
        };
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        if let Err(e) = self.editor.save_history(path) {
            warn!("could not save history to {}: {e}", path.display());
        }
    }
}

/// Reader over a fixed list of lines; records the prompts it was given.
#[derive(Debug, Default)]
pub struct ScriptedReader {
    lines: VecDeque<String>,
    prompt: String,
    prompts: Vec<String>,
    stderr: SharedBuffer,
}

impl ScriptedReader {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Prompt shown before each line that was read.
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    /// Everything written to [`LineReader::stderr`].
    pub fn diagnostics(&self) -> String {
        self.stderr.contents()
    }
}

impl LineReader for ScriptedReader {
    fn readline(&mut self) -> Result<String, ReadError> {
        let line = self.lines.pop_front().ok_or(ReadError::Eof)?;
        self.prompts.push(self.prompt.clone());
        Ok(line)
    }

    fn set_prompt(&mut self, prompt: &str) {
        self.prompt = prompt.to_string();
    }

    fn stderr(&self) -> Box<dyn Write + Send> {
        Box::new(self.stderr.clone())
    }
}

/// Cloneable in-memory writer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let bytes = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_reader_records_prompts() {
        let mut reader = ScriptedReader::new(["a", "b"]);
        reader.set_prompt("> ");
        assert_eq!(reader.readline().unwrap(), "a");
        reader.set_prompt(".. ");
        assert_eq!(reader.readline().unwrap(), "b");
        assert!(matches!(reader.readline(), Err(ReadError::Eof)));
        assert_eq!(reader.prompts(), ["> ", ".. "]);
    }

    #[test]
    fn shared_buffer_clones_share_contents() {
        let buffer = SharedBuffer::new();
        let mut writer = buffer.clone();
        write!(writer, "hello").unwrap();
        assert_eq!(buffer.contents(), "hello");
        buffer.clear();
        assert_eq!(buffer.contents(), "");
    }
}
