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

use std::borrow::Cow;
use std::panic::Location;
use std::path::Path;
use std::sync::Arc;

use crate::Error;
use crate::Level;
use crate::append::Append;
use crate::append::File;
use crate::append::TimedRotating;
use crate::record::Record;
use crate::trap::Trap;

mod builder;

pub use self::builder::RotatingBuilder;
pub use self::builder::SimpleBuilder;
pub use self::builder::buffered_rotating;
pub use self::builder::rotating;
pub use self::builder::simple;

/// A logger writing to time-suffixed files, optionally through a buffer.
pub type RotatingLogger = Logger<TimedRotating>;

/// A logger writing every record to one file.
pub type SimpleLogger = Logger<File>;

/// A leveled logger: records below the logger level are dropped, the others are dispatched to
/// the appender.
///
/// This struct implements [`log::Log`], so it can also be installed as the global logger of the
/// [`log`] crate with [`apply`](Logger::apply).
#[derive(Debug)]
pub struct Logger<A: Append> {
    name: String,
    level: Level,
    append: A,
    trap: Arc<dyn Trap>,
}

impl<A: Append> Logger<A> {
    pub(crate) fn new(name: String, level: Level, append: A, trap: Arc<dyn Trap>) -> Self {
        Self {
            name,
            level,
            append,
            trap,
        }
    }

    /// The name given at construction; defaults to the log file path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The minimum level of records this logger dispatches.
    pub fn level(&self) -> Level {
        self.level
    }

    /// The appender records are dispatched to.
    pub fn append(&self) -> &A {
        &self.append
    }

    /// Whether a record at `level` would be dispatched.
    pub fn enabled(&self, level: Level) -> bool {
        level >= self.level
    }

    /// Dispatch a record, unless its level is below the logger level.
    ///
    /// # Errors
    ///
    /// Return an error if the appender cannot accept records at all, for example when the last
    /// rotation of a rotating logger failed.
    pub fn log(&self, record: &Record) -> Result<(), Error> {
        if !self.enabled(record.level()) {
            return Ok(());
        }
        self.append.append(record)
    }

    /// Log `message` at `level`, recording the caller's file and line.
    ///
    /// The module of the record is the stem of the caller's file name.
    ///
    /// # Examples
    ///
    /// ```
    /// use logroll::Level;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let logger = logroll::simple(dir.path().join("app.log")).build().unwrap();
    /// logger.write(Level::Error, "something failed").unwrap();
    /// ```
    #[track_caller]
    pub fn write(&self, level: Level, message: impl Into<Cow<'static, str>>) -> Result<(), Error> {
        if !self.enabled(level) {
            return Ok(());
        }

        let location = Location::caller();
        // the caller's file stem stands in for a module name
        let module = Path::new(location.file())
            .file_stem()
            .and_then(|stem| stem.to_str());
        let record = Record::builder()
            .level(level)
            .target(self.name.clone())
            .module_path(module)
            .file_static(location.file())
            .line(Some(location.line()))
            .payload(message)
            .build();
        self.append.append(&record)
    }

    /// Flush the appender; a buffered appender hands all pending records to its flusher.
    pub fn flush(&self) -> Result<(), Error> {
        self.append.flush()
    }

    /// Close the appender, writing out pending records and releasing file handles.
    pub fn close(&self) -> Result<(), Error> {
        self.append.close()
    }

    pub(crate) fn trap(&self) -> &dyn Trap {
        self.trap.as_ref()
    }
}
