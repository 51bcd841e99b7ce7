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

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use crossbeam_channel::SendError;
use crossbeam_channel::Sender;

use super::Shared;
use crate::Error;
use crate::record::Record;

/// Records swapped out of a buffer, plus the flusher launched before this one.
pub(super) struct Batch {
    pub(super) records: Vec<Record>,
    pub(super) previous: Option<JoinHandle<()>>,
}

/// Failures the tests can inject into the next flushers.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Fault {
    /// The flusher thread cannot be launched.
    SpawnFails,
    /// The flusher exits right after receiving its batch.
    ExitBeforeStart,
    /// The flusher waits this long before signalling that it started.
    DelayStart(std::time::Duration),
}

/// A one-off flusher: writes exactly one batch, then exits.
pub(super) struct Worker {
    shared: Arc<Shared>,
    receiver: Receiver<Batch>,
    started: Sender<()>,
}

impl Worker {
    /// Launch a flusher thread and hand `batch` over to it.
    ///
    /// On success, returns the flusher's handle and a marker that fires once it holds the batch.
    /// On failure, the batch is given back untouched.
    pub(super) fn spawn(
        shared: Arc<Shared>,
        batch: Batch,
    ) -> Result<(JoinHandle<()>, Receiver<()>), (Batch, Error)> {
        #[cfg(test)]
        if shared.fault() == Some(Fault::SpawnFails) {
            return Err((batch, Error::new("failed to spawn buffered flusher thread")));
        }

        let (sender, receiver) = crossbeam_channel::bounded(1);
        let (started, started_marker) = crossbeam_channel::bounded(1);

        let worker = Worker {
            shared,
            receiver,
            started,
        };

        let handle = match std::thread::Builder::new()
            .name("logroll-flusher".to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(err) => {
                let err = Error::new("failed to spawn buffered flusher thread").with_source(err);
                return Err((batch, err));
            }
        };

        // never blocks: the channel has room for exactly this batch
        if let Err(SendError(batch)) = sender.send(batch) {
            return Err((batch, Error::new("buffered flusher exited before the handoff")));
        }

        Ok((handle, started_marker))
    }

    fn run(self) {
        let Self {
            shared,
            receiver,
            started,
        } = self;

        let Ok(Batch { records, previous }) = receiver.recv() else {
            return;
        };

        #[cfg(test)]
        match shared.fault() {
            Some(Fault::ExitBeforeStart) => return,
            Some(Fault::DelayStart(delay)) => std::thread::sleep(delay),
            _ => {}
        }
        let _ = started.send(());

        if let Some(previous) = previous {
            if previous.join().is_err() {
                shared.trap.trap(&Error::new("previous buffered flusher panicked"));
            }
        }

        for record in &records {
            if let Err(err) = shared.target.append(record) {
                let err = Error::new("failed to write buffered record").with_source(err);
                shared.trap.trap(&err);
            }
        }
        if let Err(err) = shared.target.flush() {
            let err = Error::new("failed to flush buffered records").with_source(err);
            shared.trap.trap(&err);
        }

        // advances even if some records failed, otherwise a failing target would be
        // flushed on every append
        *shared.last_flush() = shared.clock.now().timestamp();
    }
}
