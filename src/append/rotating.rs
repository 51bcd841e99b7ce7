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
use std::sync::Mutex;
use std::sync::MutexGuard;
#[cfg(test)]
use std::sync::atomic::AtomicUsize;
#[cfg(test)]
use std::sync::atomic::Ordering;

use arc_swap::ArcSwap;
use jiff::Zoned;

use crate::Error;
use crate::append::Append;
use crate::append::SinkFactory;
use crate::clock::Clock;
use crate::record::Record;
use crate::trap::Trap;

/// An appender that keeps one sink bound to `<base_path>.<suffix>`, where the suffix is the
/// current time formatted with a strftime pattern.
///
/// Whenever an appended record observes a suffix different from the cached one, a new sink is
/// created through the [`SinkFactory`] and the old sink is closed (which flushes a buffered
/// sink). With the pattern `%Y-%m-%d`, this rotates the file once per day.
///
/// Records observing the cached suffix load a snapshot of the active sink without locking.
/// Rotation is serialized by a mutex and reads the clock again once it holds it, so each
/// suffix transition rotates exactly once even when many threads cross the boundary together.
/// A rotated-out sink is closed only after the appends still holding its snapshot are done.
#[derive(Debug)]
pub struct TimedRotating {
    base_path: PathBuf,
    suffix_pattern: String,
    factory: SinkFactory,
    trap: Arc<dyn Trap>,
    clock: Clock,
    active: ArcSwap<Active>,
    rotation: Mutex<()>,
    #[cfg(test)]
    rotations: AtomicUsize,
}

#[derive(Debug)]
struct Active {
    suffix: String,
    // at most one sink; empty only after a failed rotation or close
    sinks: Vec<Box<dyn Append>>,
}

impl TimedRotating {
    /// Identity of this kind of sink.
    pub const NAME: &'static str = "timed-rotating";

    pub(crate) fn new(
        base_path: PathBuf,
        suffix_pattern: String,
        factory: SinkFactory,
        trap: Arc<dyn Trap>,
        clock: Clock,
    ) -> Result<Self, Error> {
        let suffix = format_suffix(&suffix_pattern, &clock.now())?;
        let rotating = Self {
            base_path,
            suffix_pattern,
            factory,
            trap,
            clock,
            active: ArcSwap::from_pointee(Active {
                suffix: suffix.clone(),
                sinks: vec![],
            }),
            rotation: Mutex::new(()),
            #[cfg(test)]
            rotations: AtomicUsize::new(0),
        };

        {
            let _rotation = rotating.lock();
            rotating.rotate(suffix)?;
        }
        Ok(rotating)
    }

    /// The base path that suffixes are appended to.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// The path currently written to, or `None` if no sink is attached.
    pub fn current_path(&self) -> Option<PathBuf> {
        let active = self.active.load_full();
        if active.sinks.is_empty() {
            None
        } else {
            Some(self.path_for(&active.suffix))
        }
    }

    #[cfg(test)]
    pub(crate) fn rotations(&self) -> usize {
        self.rotations.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.rotation.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn path_for(&self, suffix: &str) -> PathBuf {
        let mut path = self.base_path.clone().into_os_string();
        path.push(".");
        path.push(suffix);
        PathBuf::from(path)
    }

    /// Attach a new sink for `suffix` and close the old ones.
    ///
    /// Must be called with the rotation lock held.
    fn rotate(&self, suffix: String) -> Result<(), Error> {
        #[cfg(test)]
        self.rotations.fetch_add(1, Ordering::SeqCst);

        let path = self.path_for(&suffix);
        let created = self.factory.create(&path).map_err(|err| {
            Error::new("failed to rotate log file")
                .with_context("sink", Self::NAME)
                .with_context("path", path.display())
                .with_source(err)
        });

        let (sinks, result) = match created {
            Ok(sink) => (vec![sink], Ok(())),
            Err(err) => (vec![], Err(err)),
        };
        let old = self.active.swap(Arc::new(Active { suffix, sinks }));

        for sink in retire(old) {
            if let Err(err) = sink.close() {
                let err = Error::new("failed to close rotated-out sink").with_source(err);
                self.trap.trap(&err);
            }
        }
        result
    }

    fn dispatch(&self, active: &Active, record: &Record) -> Result<(), Error> {
        if active.sinks.is_empty() {
            return Err(Error::new("no sink attached to rotating logger")
                .with_context("sink", Self::NAME)
                .with_context("path", self.path_for(&active.suffix).display()));
        }

        for sink in &active.sinks {
            if let Err(err) = sink.append(record) {
                let err = Error::new("failed to append record").with_source(err);
                self.trap.trap(&err);
            }
        }
        Ok(())
    }
}

/// Wait until no append holds the swapped-out snapshot, then hand over its sinks.
fn retire(old: Arc<Active>) -> Vec<Box<dyn Append>> {
    let mut old = old;
    loop {
        match Arc::try_unwrap(old) {
            Ok(active) => return active.sinks,
            Err(shared) => {
                old = shared;
                std::thread::yield_now();
            }
        }
    }
}

impl Append for TimedRotating {
    fn append(&self, record: &Record) -> Result<(), Error> {
        let suffix = format_suffix(&self.suffix_pattern, &self.clock.now())?;

        {
            let active = self.active.load_full();
            if active.suffix == suffix {
                return self.dispatch(&active, record);
            }
        }

        let _rotation = self.lock();
        // another thread may have rotated while we waited for the lock, and the suffix read
        // before waiting may already be outdated
        let suffix = format_suffix(&self.suffix_pattern, &self.clock.now())?;
        if self.active.load().suffix != suffix {
            self.rotate(suffix)?;
        }
        let active = self.active.load_full();
        self.dispatch(&active, record)
    }

    fn flush(&self) -> Result<(), Error> {
        let active = self.active.load_full();
        let mut result = Ok(());
        for sink in &active.sinks {
            if let Err(err) = sink.flush() {
                result = result.and(Err(err));
            }
        }
        result
    }

    fn close(&self) -> Result<(), Error> {
        let _rotation = self.lock();
        let suffix = self.active.load().suffix.clone();
        let old = self.active.swap(Arc::new(Active {
            suffix,
            sinks: vec![],
        }));

        let mut result = Ok(());
        for sink in retire(old) {
            if let Err(err) = sink.close() {
                result = result.and(Err(err));
            }
        }
        result
    }
}

pub(crate) fn format_suffix(pattern: &str, now: &Zoned) -> Result<String, Error> {
    jiff::fmt::strtime::format(pattern, now).map_err(|err| {
        Error::new("malformed suffix pattern")
            .with_context("pattern", pattern)
            .with_source(err)
    })
}
