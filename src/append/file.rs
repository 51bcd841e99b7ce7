// Copyright 2024 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::Error;
use crate::append::Append;
use crate::layout::Layout;
use crate::record::Record;

/// An appender that writes every record as one line to a single file.
///
/// The file is opened in append mode; a record is written as soon as it is appended.
#[derive(Debug)]
pub struct File {
    path: PathBuf,
    writer: Mutex<Option<fs::File>>,
    layout: Arc<dyn Layout>,
}

impl File {
    /// Identity of this kind of sink.
    pub const NAME: &'static str = "file";

    /// Open `path` for appending, creating the file if it does not exist.
    ///
    /// The parent directory must already exist; see [`SinkFactory`](crate::append::SinkFactory)
    /// for a constructor that creates it.
    ///
    /// # Errors
    ///
    /// Return an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, layout: Arc<dyn Layout>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|err| {
                Error::new("failed to create log file")
                    .with_context("path", path.display())
                    .with_source(err)
            })?;

        Ok(Self {
            path,
            writer: Mutex::new(Some(file)),
            layout,
        })
    }

    /// The path this appender writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&self) -> MutexGuard<'_, Option<fs::File>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn closed(&self) -> Error {
        Error::new("log file is closed")
            .with_context("sink", Self::NAME)
            .with_context("path", self.path.display())
    }
}

impl Append for File {
    fn append(&self, record: &Record) -> Result<(), Error> {
        let mut bytes = self.layout.format(record)?;
        bytes.push(b'\n');
        let mut writer = self.writer();
        let file = writer.as_mut().ok_or_else(|| self.closed())?;
        file.write_all(&bytes).map_err(Error::from_io_error)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), Error> {
        if let Some(file) = self.writer().as_mut() {
            file.flush().map_err(Error::from_io_error)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<(), Error> {
        // dropping the handle releases it; a second close finds nothing
        if let Some(mut file) = self.writer().take() {
            file.flush().map_err(Error::from_io_error)?;
        }
        Ok(())
    }
}

impl Drop for File {
    fn drop(&mut self) {
        let writer = self.writer.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = writer.as_mut() {
            let _ = file.flush();
        }
    }
}
