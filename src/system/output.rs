// src/system/output.rs

//! The output target: console or a `-O` file.

use colored::Colorize;
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

/// Where user-facing results go: the console, or the `-O` file.
///
/// Nested runs share the caller's `Output`, so one build writes one stream.
pub struct Output {
    writer: Box<dyn Write>,
    path: Option<PathBuf>,
    console: bool,
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("path", &self.path)
            .field("console", &self.console)
            .finish()
    }
}

impl Output {
    /// Writes to stdout and stderr.
    pub fn console() -> Self {
        Self {
            writer: Box::new(io::stdout()),
            path: None,
            console: true,
        }
    }

    /// Creates (or truncates) `path` and writes there.
    pub fn file(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: Box::new(BufWriter::new(file)),
            path: Some(path.to_path_buf()),
            console: false,
        })
    }

    /// The console, or `path` when given.
    pub fn open(path: Option<&Path>) -> io::Result<Self> {
        match path {
            Some(path) => Self::file(path),
            None => Ok(Self::console()),
        }
    }

    /// Wraps any writer. Used to capture output.
    pub fn from_writer(writer: Box<dyn Write>) -> Self {
        Self {
            writer,
            path: None,
            console: false,
        }
    }

    /// The `-O` file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Writes `text` and a newline.
    pub fn line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.writer, "{}", text)
    }

    /// Writes `text` as is, adding a newline only when it lacks one.
    pub fn text(&mut self, text: &str) -> io::Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.writer.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            self.writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Reports a failure to the output target. Red on the console.
    pub fn error(&mut self, message: &str) -> io::Result<()> {
        if self.console {
            writeln!(self.writer, "{} {}", "Error:".red().bold(), message)
        } else {
            writeln!(self.writer, "Error: {}", message)
        }
    }

    /// Flushes buffered output.
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_output_writes_and_flushes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.txt");
        {
            let mut output = Output::open(Some(&path)).unwrap();
            output.line("first").unwrap();
            output.text("second").unwrap();
            output.error("broken").unwrap();
            assert_eq!(output.path(), Some(path.as_path()));
        }
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "first\nsecond\nError: broken\n");
    }
}
