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
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::Error;
use crate::Level;
use crate::append::Append;
use crate::append::BufferedBuilder;
use crate::append::File;
use crate::clock::Clock;
use crate::layout::Layout;
use crate::trap::DefaultTrap;
use crate::trap::Trap;

/// Creates the sink a path is written through.
///
/// With a capacity of one or less, the sink is a [`File`]. With a larger capacity, it is a
/// [`Buffered`](crate::append::Buffered) appender whose target is such a [`File`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use logroll::append::SinkFactory;
/// use logroll::layout::PatternLayout;
///
/// let dir = tempfile::tempdir().unwrap();
/// let factory = SinkFactory::new(Arc::new(PatternLayout::default())).capacity(100);
/// let sink = factory.create(dir.path().join("logs/app.log")).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct SinkFactory {
    capacity: usize,
    layout: Arc<dyn Layout>,
    flush_interval: Duration,
    flush_level: Level,
    trap: Arc<dyn Trap>,
    clock: Clock,
}

impl SinkFactory {
    /// Create a factory for unbuffered sinks formatting records with `layout`.
    pub fn new(layout: Arc<dyn Layout>) -> Self {
        Self {
            capacity: 1,
            layout,
            flush_interval: Duration::from_secs(120),
            flush_level: Level::Error,
            trap: Arc::new(DefaultTrap::default()),
            clock: Clock::DefaultClock,
        }
    }

    /// Buffer up to `capacity` records per sink. Values above one enable buffering.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// See [`BufferedBuilder::flush_interval`].
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// See [`BufferedBuilder::flush_level`].
    pub fn flush_level(mut self, level: Level) -> Self {
        self.flush_level = level;
        self
    }

    /// Set the trap given to buffered sinks.
    pub fn trap(mut self, trap: Arc<dyn Trap>) -> Self {
        self.trap = trap;
        self
    }

    pub(crate) fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Whether created sinks buffer records.
    pub fn is_buffered(&self) -> bool {
        self.capacity > 1
    }

    /// Create a sink writing to `path`.
    ///
    /// The parent directories of `path` are created if missing.
    ///
    /// # Errors
    ///
    /// Return an error if the directory or the file cannot be created. Such a failure is a
    /// misconfiguration and is not retried.
    pub fn create(&self, path: impl AsRef<Path>) -> Result<Box<dyn Append>, Error> {
        let path = path.as_ref();

        if self.is_buffered() {
            let direct = SinkFactory {
                capacity: 1,
                ..self.clone()
            };
            let target = direct.create(path)?;
            let buffered = BufferedBuilder::new(target)
                .capacity(self.capacity)
                .flush_interval(self.flush_interval)
                .flush_level(self.flush_level)
                .shared_trap(self.trap.clone())
                .clock(self.clock.clone())
                .build();
            return Ok(Box::new(buffered));
        }

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|err| {
                Error::new("failed to create log directory")
                    .with_context("path", dir.display())
                    .with_source(err)
            })?;
        }
        Ok(Box::new(File::open(path, self.layout.clone())?))
    }
}
