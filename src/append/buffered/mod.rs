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

//! An appender that buffers records in memory and writes them in the background.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use jiff::SignedDuration;
use jiff::Timestamp;

use crate::Error;
use crate::Level;
use crate::append::Append;
use crate::clock::Clock;
use crate::record::Record;
use crate::trap::DefaultTrap;
use crate::trap::Trap;

mod worker;

use self::worker::Batch;
#[cfg(test)]
use self::worker::Fault;
use self::worker::Worker;

const DEFAULT_CAPACITY: usize = 100;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(120);
const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(1);

/// A builder to configure and create a [`Buffered`] appender.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use logroll::Level;
/// use logroll::append::BufferedBuilder;
/// use logroll::append::File;
/// use logroll::layout::PatternLayout;
///
/// let dir = tempfile::tempdir().unwrap();
/// let file = File::open(dir.path().join("app.log"), Arc::new(PatternLayout::default())).unwrap();
/// let buffered = BufferedBuilder::new(file)
///     .capacity(64)
///     .flush_interval(Duration::from_secs(30))
///     .flush_level(Level::Warning)
///     .build();
/// ```
#[derive(Debug)]
pub struct BufferedBuilder {
    target: Box<dyn Append>,
    capacity: usize,
    flush_interval: Duration,
    flush_level: Level,
    trap: Arc<dyn Trap>,
    clock: Clock,
}

impl BufferedBuilder {
    /// Create a builder that buffers records for `target`.
    pub fn new(target: impl Into<Box<dyn Append>>) -> Self {
        Self {
            target: target.into(),
            capacity: DEFAULT_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_level: Level::Error,
            trap: Arc::new(DefaultTrap::default()),
            clock: Clock::DefaultClock,
        }
    }

    /// Flush once this many records are buffered.
    ///
    /// Default to 100. A capacity of zero is treated as one.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Flush when more than `interval` has passed since the last flush completed.
    ///
    /// The check happens when a record is appended. Default to 120 seconds.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Flush immediately when a record at or above `level` is appended.
    ///
    /// Default to [`Level::Error`].
    pub fn flush_level(mut self, level: Level) -> Self {
        self.flush_level = level;
        self
    }

    /// Set the trap receiving errors of background writes.
    ///
    /// Default to [`DefaultTrap`].
    pub fn trap(mut self, trap: impl Trap) -> Self {
        self.trap = Arc::new(trap);
        self
    }

    pub(crate) fn shared_trap(mut self, trap: Arc<dyn Trap>) -> Self {
        self.trap = trap;
        self
    }

    pub(crate) fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Build the [`Buffered`] appender.
    pub fn build(self) -> Buffered {
        let Self {
            target,
            capacity,
            flush_interval,
            flush_level,
            trap,
            clock,
        } = self;

        let last_flush = Mutex::new(clock.now().timestamp());
        let shared = Arc::new(Shared {
            target,
            last_flush,
            trap,
            clock,
            #[cfg(test)]
            fault: Mutex::new(None),
        });

        Buffered {
            capacity,
            flush_interval: SignedDuration::try_from(flush_interval)
                .unwrap_or(SignedDuration::MAX),
            flush_level,
            shared,
            state: Mutex::new(State {
                buffer: Vec::with_capacity(capacity),
                flusher: None,
                closed: false,
            }),
        }
    }
}

/// An appender that accumulates records and hands them to a background flusher.
///
/// A flush is triggered when a record is appended and any of the following holds:
///
/// * the buffer holds `capacity` records or more;
/// * more than `flush_interval` has elapsed since the last flush completed;
/// * the record's level is at or above `flush_level`.
///
/// Each flush swaps the buffer for an empty one and launches a short-lived thread that writes
/// the swapped-out records to the target. The caller only waits (at most one second) until that
/// thread has taken its batch, never for the write itself. Batches are written in order: a
/// flusher waits for its predecessor before it touches the target.
///
/// Background write failures are sent to the trap and never reach the caller. Closing the
/// appender (or dropping it) flushes what is left and waits for all flushers to finish.
#[derive(Debug)]
pub struct Buffered {
    capacity: usize,
    flush_interval: SignedDuration,
    flush_level: Level,
    shared: Arc<Shared>,
    state: Mutex<State>,
}

/// What a flusher needs after the handoff.
#[derive(Debug)]
struct Shared {
    target: Box<dyn Append>,
    last_flush: Mutex<Timestamp>,
    trap: Arc<dyn Trap>,
    clock: Clock,
    #[cfg(test)]
    fault: Mutex<Option<Fault>>,
}

#[derive(Debug)]
struct State {
    // records received since the last flush began
    buffer: Vec<Record>,
    // the most recently launched flusher
    flusher: Option<JoinHandle<()>>,
    closed: bool,
}

impl Buffered {
    /// Identity of this kind of sink.
    pub const NAME: &'static str = "buffered";

    /// Number of records waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.state().buffer.len()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn should_flush(&self, buffered: usize, record: &Record) -> bool {
        buffered >= self.capacity || record.level() >= self.flush_level || self.is_stale()
    }

    fn is_stale(&self) -> bool {
        let last_flush = *self.shared.last_flush();
        let now = self.shared.clock.now().timestamp();
        now.duration_since(last_flush) > self.flush_interval
    }

    /// Swap out the buffer and launch a flusher for it.
    ///
    /// Must be called with the state lock held, so that appends racing with the swap land either
    /// in the batch or in the fresh buffer. Returns the start marker of the launched flusher.
    fn handoff(&self, state: &mut State) -> Option<Receiver<()>> {
        if state.buffer.is_empty() {
            return None;
        }

        let batch = Batch {
            records: std::mem::take(&mut state.buffer),
            previous: state.flusher.take(),
        };

        match Worker::spawn(self.shared.clone(), batch) {
            Ok((handle, started)) => {
                state.flusher = Some(handle);
                Some(started)
            }
            Err((batch, err)) => {
                // buffering is best effort; keep the records for the next attempt
                state.buffer = batch.records;
                state.flusher = batch.previous;
                self.shared.trap.trap(&err);
                None
            }
        }
    }

    fn wait_started(&self, started: Receiver<()>) {
        match started.recv_timeout(RENDEZVOUS_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                let err = Error::new("buffered flusher exited before taking its batch")
                    .with_context("sink", Self::NAME);
                self.shared.trap.trap(&err);
            }
        }
    }
}

impl Shared {
    fn last_flush(&self) -> MutexGuard<'_, Timestamp> {
        self.last_flush.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn fault(&self) -> Option<Fault> {
        *self.fault.lock().unwrap()
    }

    #[cfg(test)]
    fn set_fault(&self, fault: Option<Fault>) {
        *self.fault.lock().unwrap() = fault;
    }
}

impl Append for Buffered {
    fn append(&self, record: &Record) -> Result<(), Error> {
        let started = {
            let mut state = self.state();
            if state.closed {
                return Err(Error::new("buffered appender is closed").with_context("sink", Self::NAME));
            }
            state.buffer.push(record.clone());
            if self.should_flush(state.buffer.len(), record) {
                self.handoff(&mut state)
            } else {
                None
            }
        };

        if let Some(started) = started {
            self.wait_started(started);
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), Error> {
        let started = self.handoff(&mut self.state());
        if let Some(started) = started {
            self.wait_started(started);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), Error> {
        let flusher = {
            let mut state = self.state();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            // the start marker is irrelevant, we join the flusher below
            let _ = self.handoff(&mut state);
            state.flusher.take()
        };

        // a flusher joins its predecessor first, so the last one finishes after all others
        if let Some(flusher) = flusher {
            flusher
                .join()
                .map_err(|_| Error::new("buffered flusher panicked").with_context("sink", Self::NAME))?;
        }

        let mut state = self.state();
        if !state.buffer.is_empty() {
            // the final handoff failed, write the rest on this thread
            let records = std::mem::take(&mut state.buffer);
            drop(state);
            for record in &records {
                if let Err(err) = self.shared.target.append(record) {
                    let err = Error::new("failed to write buffered record").with_source(err);
                    self.shared.trap.trap(&err);
                }
            }
        }

        self.shared.target.close()
    }
}

impl Drop for Buffered {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            self.shared.trap.trap(&err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;

    use jiff::Span;
    use jiff::Zoned;

    use super::*;
    use crate::clock::ManualClock;

    /// Records what reaches the target and how it was grouped into batches.
    #[derive(Debug, Clone, Default)]
    struct Recording {
        inner: Arc<RecordingInner>,
    }

    #[derive(Debug, Default)]
    struct RecordingInner {
        lines: Mutex<Vec<String>>,
        pending: Mutex<usize>,
        batches: Mutex<Vec<usize>>,
        fail_on: Mutex<Option<String>>,
        closed: AtomicBool,
    }

    impl Recording {
        fn lines(&self) -> Vec<String> {
            self.inner.lines.lock().unwrap().clone()
        }

        fn batches(&self) -> Vec<usize> {
            self.inner.batches.lock().unwrap().clone()
        }

        fn fail_on(&self, payload: &str) {
            *self.inner.fail_on.lock().unwrap() = Some(payload.to_string());
        }

        fn wait_for_lines(&self, n: usize) {
            for _ in 0..500 {
                if self.lines().len() >= n {
                    return;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            panic!("expected {n} lines, got {:?}", self.lines());
        }
    }

    impl Append for Recording {
        fn append(&self, record: &Record) -> Result<(), Error> {
            if self.inner.fail_on.lock().unwrap().as_deref() == Some(record.payload()) {
                return Err(Error::new("disk full"));
            }
            self.inner.lines.lock().unwrap().push(record.payload().to_string());
            *self.inner.pending.lock().unwrap() += 1;
            Ok(())
        }

        fn flush(&self) -> Result<(), Error> {
            let mut pending = self.inner.pending.lock().unwrap();
            if *pending > 0 {
                self.inner.batches.lock().unwrap().push(*pending);
                *pending = 0;
            }
            Ok(())
        }

        fn close(&self) -> Result<(), Error> {
            self.flush()?;
            self.inner.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug, Clone, Default)]
    struct CountingTrap(Arc<Mutex<Vec<String>>>);

    impl Trap for CountingTrap {
        fn trap(&self, err: &Error) {
            self.0.lock().unwrap().push(err.to_string());
        }
    }

    fn record(level: Level, payload: &'static str) -> Record {
        Record::builder().level(level).payload(payload).build()
    }

    #[test]
    fn test_capacity_trigger() {
        let target = Recording::default();
        let buffered = BufferedBuilder::new(target.clone()).capacity(3).build();

        buffered.append(&record(Level::Info, "a")).unwrap();
        buffered.append(&record(Level::Info, "b")).unwrap();
        assert_eq!(buffered.buffered(), 2);
        assert!(target.lines().is_empty());

        buffered.append(&record(Level::Info, "c")).unwrap();
        assert_eq!(buffered.buffered(), 0);
        target.wait_for_lines(3);
        assert_eq!(target.lines(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_buffer_never_exceeds_capacity() {
        let target = Recording::default();
        let buffered = BufferedBuilder::new(target.clone()).capacity(4).build();

        for _ in 0..25 {
            buffered.append(&record(Level::Debug, "x")).unwrap();
            assert!(buffered.buffered() < 4);
        }
    }

    #[test]
    fn test_severity_trigger() {
        let target = Recording::default();
        let buffered = BufferedBuilder::new(target.clone())
            .capacity(3)
            .flush_level(Level::Error)
            .build();

        buffered.append(&record(Level::Info, "one")).unwrap();
        buffered.append(&record(Level::Info, "two")).unwrap();
        assert_eq!(buffered.buffered(), 2);

        buffered.append(&record(Level::Error, "boom")).unwrap();
        assert_eq!(buffered.buffered(), 0);
        target.wait_for_lines(3);

        buffered.append(&record(Level::Info, "after")).unwrap();
        assert_eq!(buffered.buffered(), 1);

        buffered.close().unwrap();
        assert_eq!(target.lines(), vec!["one", "two", "boom", "after"]);
        assert_eq!(target.batches(), vec![3, 1]);
    }

    #[test]
    fn test_staleness_trigger() {
        let start = Zoned::from_str("2024-01-01T00:00:00[UTC]").unwrap();
        let clock = ManualClock::new(start);
        let target = Recording::default();
        let buffered = BufferedBuilder::new(target.clone())
            .capacity(100)
            .flush_interval(Duration::from_secs(120))
            .clock(Clock::ManualClock(clock.clone()))
            .build();

        buffered.append(&record(Level::Info, "early")).unwrap();
        clock.advance(Span::new().seconds(120));
        buffered.append(&record(Level::Info, "at interval")).unwrap();
        assert_eq!(buffered.buffered(), 2);

        clock.advance(Span::new().seconds(1));
        buffered.append(&record(Level::Info, "stale")).unwrap();
        assert_eq!(buffered.buffered(), 0);
        target.wait_for_lines(3);
    }

    #[test]
    fn test_flush_with_empty_buffer_is_noop() {
        let target = Recording::default();
        let buffered = BufferedBuilder::new(target.clone()).build();
        buffered.flush().unwrap();
        buffered.close().unwrap();
        assert!(target.batches().is_empty());
    }

    #[test]
    fn test_explicit_flush() {
        let target = Recording::default();
        let buffered = BufferedBuilder::new(target.clone()).capacity(10).build();
        buffered.append(&record(Level::Info, "a")).unwrap();
        buffered.append(&record(Level::Info, "b")).unwrap();
        buffered.flush().unwrap();
        assert_eq!(buffered.buffered(), 0);
        target.wait_for_lines(2);
    }

    #[test]
    fn test_batches_preserve_order() {
        let target = Recording::default();
        let buffered = BufferedBuilder::new(target.clone()).capacity(7).build();

        let n: usize = 100;
        let payloads = (0..n).map(|i| i.to_string()).collect::<Vec<_>>();
        for payload in &payloads {
            let record = Record::builder().payload(payload.clone()).build();
            buffered.append(&record).unwrap();
        }
        buffered.close().unwrap();

        assert_eq!(target.lines(), payloads);
        assert_eq!(target.batches().len(), n.div_ceil(7));
    }

    #[test]
    fn test_failed_record_does_not_abort_batch() {
        let target = Recording::default();
        target.fail_on("bad");
        let trap = CountingTrap::default();
        let buffered = BufferedBuilder::new(target.clone())
            .capacity(3)
            .trap(trap.clone())
            .build();

        buffered.append(&record(Level::Info, "good")).unwrap();
        buffered.append(&record(Level::Info, "bad")).unwrap();
        buffered.append(&record(Level::Info, "also good")).unwrap();
        buffered.close().unwrap();

        assert_eq!(target.lines(), vec!["good", "also good"]);
        let trapped = trap.0.lock().unwrap();
        assert_eq!(trapped.len(), 1);
        assert!(trapped[0].contains("disk full"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let target = Recording::default();
        let buffered = BufferedBuilder::new(target.clone()).build();
        buffered.append(&record(Level::Info, "a")).unwrap();
        buffered.close().unwrap();
        buffered.close().unwrap();

        assert!(target.inner.closed.load(Ordering::SeqCst));
        assert_eq!(target.lines(), vec!["a"]);
        assert!(buffered.append(&record(Level::Info, "late")).is_err());
    }

    #[test]
    fn test_drop_writes_pending_records() {
        let target = Recording::default();
        {
            let buffered = BufferedBuilder::new(target.clone()).build();
            buffered.append(&record(Level::Info, "a")).unwrap();
            buffered.append(&record(Level::Info, "b")).unwrap();
        }
        assert_eq!(target.lines(), vec!["a", "b"]);
    }

    #[test]
    fn test_failed_handoff_keeps_records() {
        let target = Recording::default();
        let trap = CountingTrap::default();
        let buffered = BufferedBuilder::new(target.clone())
            .capacity(2)
            .trap(trap.clone())
            .build();

        buffered.append(&record(Level::Info, "first")).unwrap();
        buffered.flush().unwrap();

        buffered.shared.set_fault(Some(Fault::SpawnFails));
        buffered.append(&record(Level::Info, "a")).unwrap();
        buffered.append(&record(Level::Info, "b")).unwrap();
        assert_eq!(buffered.buffered(), 2);
        buffered.append(&record(Level::Info, "c")).unwrap();
        assert_eq!(buffered.buffered(), 3);
        buffered.flush().unwrap();
        assert_eq!(buffered.buffered(), 3);

        {
            let trapped = trap.0.lock().unwrap();
            assert_eq!(trapped.len(), 3);
            assert!(trapped.iter().all(|err| err.contains("failed to spawn")));
        }

        // the final handoff fails too; close joins the earlier flusher and writes the rest itself
        buffered.close().unwrap();
        assert_eq!(target.lines(), vec!["first", "a", "b", "c"]);
        assert_eq!(buffered.buffered(), 0);
        assert!(target.inner.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_flusher_exiting_before_start_is_trapped() {
        let target = Recording::default();
        let trap = CountingTrap::default();
        let buffered = BufferedBuilder::new(target.clone())
            .capacity(2)
            .trap(trap.clone())
            .build();

        buffered.shared.set_fault(Some(Fault::ExitBeforeStart));
        buffered.append(&record(Level::Info, "a")).unwrap();
        buffered.append(&record(Level::Info, "b")).unwrap();
        assert_eq!(buffered.buffered(), 0);

        {
            let trapped = trap.0.lock().unwrap();
            assert_eq!(trapped.len(), 1);
            assert!(trapped[0].contains("exited before taking its batch"));
        }

        buffered.shared.set_fault(None);
        buffered.append(&record(Level::Info, "c")).unwrap();
        buffered.close().unwrap();
        assert_eq!(target.lines(), vec!["c"]);
    }

    #[test]
    fn test_slow_flusher_start_times_out() {
        let target = Recording::default();
        let trap = CountingTrap::default();
        let buffered = BufferedBuilder::new(target.clone())
            .capacity(2)
            .trap(trap.clone())
            .build();

        buffered
            .shared
            .set_fault(Some(Fault::DelayStart(Duration::from_millis(1500))));
        buffered.append(&record(Level::Info, "a")).unwrap();

        let start = std::time::Instant::now();
        buffered.append(&record(Level::Info, "b")).unwrap();
        assert!(start.elapsed() >= RENDEZVOUS_TIMEOUT);
        // the producer gave up waiting before the flusher wrote anything
        assert!(target.lines().is_empty());
        assert!(trap.0.lock().unwrap().is_empty());

        buffered.shared.set_fault(None);
        buffered.close().unwrap();
        assert_eq!(target.lines(), vec!["a", "b"]);
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let target = Recording::default();
        let buffered = Arc::new(BufferedBuilder::new(target.clone()).capacity(5).build());

        let handles = (0..4)
            .map(|_| {
                let buffered = buffered.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        buffered.append(&record(Level::Info, "x")).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        buffered.close().unwrap();
        assert_eq!(target.lines().len(), 200);
    }
}
