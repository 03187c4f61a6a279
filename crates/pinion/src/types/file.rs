//! File objects backing the builtin `open`.

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};

use crate::exception::{ExcType, RunResult};

#[derive(Debug)]
pub(crate) enum FileState {
    Read(BufReader<fs::File>),
    Write(fs::File),
    Closed,
}

#[derive(Debug)]
pub(crate) struct FileObject {
    pub path: Box<str>,
    pub state: FileState,
}

impl FileObject {
    pub fn open(path: &str, mode: &str) -> RunResult<Self> {
        let state = match mode {
            "r" => {
                let f = fs::File::open(path)
                    .map_err(|e| ExcType::os_error(format!("cannot open '{path}': {e}")))?;
                FileState::Read(BufReader::new(f))
            }
            "w" => {
                let f = fs::File::create(path)
                    .map_err(|e| ExcType::os_error(format!("cannot open '{path}': {e}")))?;
                FileState::Write(f)
            }
            "a" => {
                let f = fs::OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)
                    .map_err(|e| ExcType::os_error(format!("cannot open '{path}': {e}")))?;
                FileState::Write(f)
            }
            other => return Err(ExcType::value_error(format!("invalid mode: '{other}'"))),
        };
        Ok(Self {
            path: Box::from(path),
            state,
        })
    }

    /// Reads the remaining contents.
    pub fn read_all(&mut self) -> RunResult<String> {
        match &mut self.state {
            FileState::Read(reader) => {
                let mut buf = String::new();
                reader
                    .read_to_string(&mut buf)
                    .map_err(|e| ExcType::os_error(e))?;
                Ok(buf)
            }
            FileState::Write(_) => Err(ExcType::os_error("file not open for reading")),
            FileState::Closed => Err(ExcType::value_error("I/O operation on closed file")),
        }
    }

    /// Reads one line including its newline; `None` at end of file.
    pub fn read_line(&mut self) -> RunResult<Option<String>> {
        match &mut self.state {
            FileState::Read(reader) => {
                let mut line = String::new();
                let n = reader
                    .read_line(&mut line)
                    .map_err(|e| ExcType::os_error(e))?;
                if n == 0 { Ok(None) } else { Ok(Some(line)) }
            }
            FileState::Write(_) => Err(ExcType::os_error("file not open for reading")),
            FileState::Closed => Err(ExcType::value_error("I/O operation on closed file")),
        }
    }

    pub fn write_str(&mut self, text: &str) -> RunResult<()> {
        match &mut self.state {
            FileState::Write(f) => f
                .write_all(text.as_bytes())
                .map_err(|e| ExcType::os_error(e)),
            FileState::Read(_) => Err(ExcType::os_error("file not open for writing")),
            FileState::Closed => Err(ExcType::value_error("I/O operation on closed file")),
        }
    }

    pub fn close(&mut self) {
        self.state = FileState::Closed;
    }
}
