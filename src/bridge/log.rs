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

use crate::Error;
use crate::Level;
use crate::Logger;
use crate::append::Append;
use crate::record::RecordBuilder;

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Level::Error,
            log::Level::Warn => Level::Warning,
            log::Level::Info => Level::Info,
            log::Level::Debug | log::Level::Trace => Level::Debug,
        }
    }
}

impl Level {
    /// The most verbose `log` crate filter that still reaches records at this level.
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            // trace records are mapped to debug
            Level::Debug => log::LevelFilter::Trace,
            Level::Info => log::LevelFilter::Info,
            Level::Warning => log::LevelFilter::Warn,
            Level::Error | Level::Critical => log::LevelFilter::Error,
        }
    }
}

impl<A: Append> Logger<A> {
    /// Set up this logger as the global logger of the `log` crate.
    ///
    /// The global maximum level is set to match the logger level.
    ///
    /// # Errors
    ///
    /// Return an error if the log crate global logger has already been set.
    pub fn try_apply(self) -> Result<(), log::SetLoggerError> {
        let max_level = self.level().to_level_filter();
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max_level);
        Ok(())
    }

    /// Set up this logger as the global logger of the `log` crate.
    ///
    /// # Panics
    ///
    /// Panic if the log crate global logger has already been set.
    ///
    /// # Examples
    ///
    /// ```
    /// let dir = tempfile::tempdir().unwrap();
    /// logroll::rotating(dir.path().join("app.log"))
    ///     .build()
    ///     .unwrap()
    ///     .apply();
    ///
    /// log::info!("This is an info message.");
    /// ```
    pub fn apply(self) {
        self.try_apply()
            .expect("Logger::apply must be called before the log crate global logger initialized")
    }
}

impl<A: Append> log::Log for Logger<A> {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        Logger::enabled(self, metadata.level().into())
    }

    fn log(&self, record: &log::Record) {
        if !log::Log::enabled(self, record.metadata()) {
            return;
        }

        let mut builder = RecordBuilder::default()
            .args(*record.args())
            .level(record.level().into())
            .target(record.target().to_string())
            .line(record.line());

        builder = if let Some(module_path) = record.module_path_static() {
            builder.module_path_static(module_path)
        } else {
            builder.module_path(record.module_path())
        };
        builder = if let Some(file) = record.file_static() {
            builder.file_static(file)
        } else {
            builder.file(record.file())
        };

        if let Err(err) = Logger::log(self, &builder.build()) {
            let err = Error::new("failed to log record from the log crate").with_source(err);
            self.trap().trap(&err);
        }
    }

    fn flush(&self) {
        if let Err(err) = Logger::flush(self) {
            let err = Error::new("failed to flush logger").with_source(err);
            self.trap().trap(&err);
        }
    }
}
