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

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::Error;
use crate::Level;
use crate::append::File;
use crate::append::SinkFactory;
use crate::append::TimedRotating;
use crate::clock::Clock;
use crate::layout::Layout;
use crate::layout::PatternLayout;
use crate::logger::Logger;
use crate::logger::RotatingLogger;
use crate::logger::SimpleLogger;
use crate::trap::DefaultTrap;
use crate::trap::Trap;

const DEFAULT_SUFFIX_PATTERN: &str = "%Y-%m-%d";
const DEFAULT_BUFFERED_CAPACITY: usize = 100;

/// Create a builder for a logger that rotates `<base_path>.<suffix>` files and writes each
/// record directly.
///
/// # Examples
///
/// ```
/// let dir = tempfile::tempdir().unwrap();
/// let logger = logroll::rotating(dir.path().join("app.log"))
///     .level(logroll::Level::Debug)
///     .build()
///     .unwrap();
///
/// logger.write(logroll::Level::Info, "started").unwrap();
/// ```
pub fn rotating(base_path: impl Into<PathBuf>) -> RotatingBuilder {
    RotatingBuilder::new(base_path)
}

/// Create a builder for a rotating logger whose per-file sink buffers records and writes them
/// in the background.
///
/// The capacity defaults to 100 records; a capacity of zero is replaced by that default.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// let dir = tempfile::tempdir().unwrap();
/// let logger = logroll::buffered_rotating(dir.path().join("app.log"))
///     .capacity(500)
///     .flush_interval(Duration::from_secs(30))
///     .flush_level(logroll::Level::Warning)
///     .build()
///     .unwrap();
///
/// logger.write(logroll::Level::Info, "buffered").unwrap();
/// logger.flush().unwrap();
/// ```
pub fn buffered_rotating(base_path: impl Into<PathBuf>) -> RotatingBuilder {
    let mut builder = RotatingBuilder::new(base_path);
    builder.buffered = true;
    builder.capacity = DEFAULT_BUFFERED_CAPACITY;
    builder
}

/// Create a builder for a logger that writes every record to one file, without rotation.
pub fn simple(path: impl Into<PathBuf>) -> SimpleBuilder {
    SimpleBuilder {
        path: path.into(),
        name: None,
        level: Level::Debug,
        layout: LayoutOption::Default,
        trap: Arc::new(DefaultTrap::default()),
    }
}

#[derive(Debug)]
enum LayoutOption {
    Default,
    Format(String),
    Layout(Arc<dyn Layout>),
}

impl LayoutOption {
    fn build(self) -> Result<Arc<dyn Layout>, Error> {
        Ok(match self {
            LayoutOption::Default => Arc::new(PatternLayout::default()),
            LayoutOption::Format(format) => Arc::new(PatternLayout::new(&format)?),
            LayoutOption::Layout(layout) => layout,
        })
    }
}

/// A builder to configure and create a [`RotatingLogger`].
#[must_use = "call `build` to construct the logger"]
#[derive(Debug)]
pub struct RotatingBuilder {
    base_path: PathBuf,
    name: Option<String>,
    level: Level,
    suffix_pattern: String,
    layout: LayoutOption,
    buffered: bool,
    capacity: usize,
    flush_interval: Duration,
    flush_level: Level,
    trap: Arc<dyn Trap>,
    clock: Clock,
}

impl RotatingBuilder {
    /// Create a builder for a rotating logger writing to `<base_path>.<suffix>`.
    ///
    /// Records are written directly unless [`capacity`](RotatingBuilder::capacity) is above one.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            name: None,
            level: Level::Info,
            suffix_pattern: DEFAULT_SUFFIX_PATTERN.to_string(),
            layout: LayoutOption::Default,
            buffered: false,
            capacity: 1,
            flush_interval: Duration::from_secs(120),
            flush_level: Level::Error,
            trap: Arc::new(DefaultTrap::default()),
            clock: Clock::DefaultClock,
        }
    }

    /// Set the logger name. Default to the absolute base path.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the minimum level of dispatched records. Default to [`Level::Info`].
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the strftime pattern producing the file suffix. Default to `%Y-%m-%d`, which rotates
    /// daily at local midnight.
    pub fn suffix_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.suffix_pattern = pattern.into();
        self
    }

    /// Set the line template of the default [`PatternLayout`].
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.layout = LayoutOption::Format(format.into());
        self
    }

    /// Set the layout. Overrides [`format`](RotatingBuilder::format).
    pub fn layout(mut self, layout: impl Layout) -> Self {
        self.layout = LayoutOption::Layout(Arc::new(layout));
        self
    }

    /// Buffer up to `capacity` records per file. Values above one enable buffering.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Flush the buffer when more than `interval` passed since the last flush.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Flush the buffer as soon as a record at or above `level` arrives.
    pub fn flush_level(mut self, level: Level) -> Self {
        self.flush_level = level;
        self
    }

    /// Set the trap receiving errors that are not returned to the caller.
    pub fn trap(mut self, trap: impl Trap) -> Self {
        self.trap = Arc::new(trap);
        self
    }

    #[cfg(test)]
    pub(crate) fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Build the logger and open the file for the current suffix.
    ///
    /// # Errors
    ///
    /// Return an error if either:
    ///
    /// * The base path is empty.
    /// * The suffix pattern or the format is malformed.
    /// * The log directory or file cannot be created.
    pub fn build(self) -> Result<RotatingLogger, Error> {
        let Self {
            base_path,
            name,
            level,
            suffix_pattern,
            layout,
            buffered,
            capacity,
            flush_interval,
            flush_level,
            trap,
            clock,
        } = self;

        let base_path = absolute_path(&base_path)?;
        if suffix_pattern.is_empty() {
            return Err(Error::new("suffix pattern must not be empty"));
        }
        let capacity = if buffered && capacity == 0 {
            DEFAULT_BUFFERED_CAPACITY
        } else {
            capacity
        };

        let factory = SinkFactory::new(layout.build()?)
            .capacity(capacity)
            .flush_interval(flush_interval)
            .flush_level(flush_level)
            .trap(trap.clone())
            .clock(clock.clone());

        let name = name.unwrap_or_else(|| base_path.display().to_string());
        let rotating = TimedRotating::new(base_path, suffix_pattern, factory, trap.clone(), clock)?;
        Ok(Logger::new(name, level, rotating, trap))
    }
}

/// A builder to configure and create a [`SimpleLogger`].
#[must_use = "call `build` to construct the logger"]
#[derive(Debug)]
pub struct SimpleBuilder {
    path: PathBuf,
    name: Option<String>,
    level: Level,
    layout: LayoutOption,
    trap: Arc<dyn Trap>,
}

impl SimpleBuilder {
    /// Set the logger name. Default to the absolute file path.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the minimum level of dispatched records. Default to [`Level::Debug`].
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the line template of the default [`PatternLayout`].
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.layout = LayoutOption::Format(format.into());
        self
    }

    /// Set the layout. Overrides [`format`](SimpleBuilder::format).
    pub fn layout(mut self, layout: impl Layout) -> Self {
        self.layout = LayoutOption::Layout(Arc::new(layout));
        self
    }

    /// Set the trap receiving errors of the `log` crate bridge.
    pub fn trap(mut self, trap: impl Trap) -> Self {
        self.trap = Arc::new(trap);
        self
    }

    /// Build the logger and open its file.
    ///
    /// # Errors
    ///
    /// Return an error if the format is malformed or the file cannot be created.
    pub fn build(self) -> Result<SimpleLogger, Error> {
        let Self {
            path,
            name,
            level,
            layout,
            trap,
        } = self;

        let path = absolute_path(&path)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|err| {
                Error::new("failed to create log directory")
                    .with_context("path", dir.display())
                    .with_source(err)
            })?;
        }
        let file = File::open(&path, layout.build()?)?;
        let name = name.unwrap_or_else(|| path.display().to_string());
        Ok(Logger::new(name, level, file, trap))
    }
}

fn absolute_path(path: &Path) -> Result<PathBuf, Error> {
    if path.as_os_str().is_empty() {
        return Err(Error::new("log path must not be empty"));
    }
    std::path::absolute(path).map_err(|err| {
        Error::new("failed to resolve log path")
            .with_context("path", path.display())
            .with_source(err)
    })
}
