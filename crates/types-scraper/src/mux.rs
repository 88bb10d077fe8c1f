// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Line stream multiplexer.
//!
//! Merges several labeled line sources into a single consumption point.
//! Every source is drained by its own reader thread into a dedicated FIFO
//! channel; the consumer fans in over all channels plus a stop channel.
//!
//! ```text
//!  source "stdout" --> [reader] --> queue 0 --+
//!  source "stderr" --> [reader] --> queue 1 --+--> Select --> MuxRound
//!                                  stop rx  --+
//! ```
//!
//! A [`MuxRound`] holds at most one line per source. Order is preserved
//! within a source only.

use crossbeam::channel::{self, Receiver, Select, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A lazy, possibly infinite, non-restartable sequence of lines.
pub type LineSource = Box<dyn Iterator<Item = String> + Send + 'static>;

/// A labeled line source registered with a [`StreamMux`].
pub struct MuxedSource {
    /// Source identifier (used for logging and thread names).
    pub id: String,
    /// The line sequence.
    pub lines: LineSource,
}

impl MuxedSource {
    /// Create a new source from any line iterator.
    pub fn new<I>(id: impl Into<String>, lines: I) -> Self
    where
        I: Iterator<Item = String> + Send + 'static,
    {
        Self {
            id: id.into(),
            lines: Box::new(lines),
        }
    }
}

/// One wake-up's worth of drained lines, one slot per source.
///
/// Slots follow source registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxRound {
    slots: Vec<Option<String>>,
}

impl MuxRound {
    /// Build a round from raw slots.
    pub fn new(slots: Vec<Option<String>>) -> Self {
        Self { slots }
    }

    /// Line produced by the source at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.slots.get(index).and_then(|s| s.as_deref())
    }

    /// Number of slots (equals the number of registered sources).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if the round has no slots at all.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots in registration order.
    pub fn slots(&self) -> &[Option<String>] {
        &self.slots
    }

    /// Consume the round, returning its slots.
    pub fn into_slots(self) -> Vec<Option<String>> {
        self.slots
    }

    /// Iterate over non-empty slots as `(source index, line)`.
    pub fn lines(&self) -> impl Iterator<Item = (usize, &str)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_deref().map(|l| (i, l)))
    }
}

/// Cloneable handle used to cancel a running [`StreamMux`].
#[derive(Clone)]
pub struct MuxStopHandle {
    active: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl MuxStopHandle {
    /// Request the multiplexer to stop. Idempotent.
    ///
    /// Wakes a consumer blocked with nothing queued.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            // Capacity 1: a single pending wake-up is enough.
            let _ = self.wake.try_send(());
        }
    }

    /// True until a stop has been requested.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

struct PendingSource {
    id: String,
    lines: LineSource,
    tx: Sender<String>,
}

/// Multiplexer over N labeled line sources.
pub struct StreamMux {
    id: String,
    ids: Vec<String>,
    pending: Vec<PendingSource>,
    queues: Vec<Receiver<String>>,
    readers: Vec<JoinHandle<()>>,
    stop: MuxStopHandle,
    stop_rx: Receiver<()>,
    wait_timeout: Option<Duration>,
    consumed: bool,
}

impl StreamMux {
    /// Create a multiplexer. Sources are registered in the given order.
    pub fn new(id: impl Into<String>, sources: Vec<MuxedSource>) -> Self {
        let (wake, stop_rx) = channel::bounded(1);
        let mut ids = Vec::with_capacity(sources.len());
        let mut pending = Vec::with_capacity(sources.len());
        let mut queues = Vec::with_capacity(sources.len());

        for source in sources {
            let (tx, rx) = channel::unbounded();
            ids.push(source.id.clone());
            queues.push(rx);
            pending.push(PendingSource {
                id: source.id,
                lines: source.lines,
                tx,
            });
        }

        Self {
            id: id.into(),
            ids,
            pending,
            queues,
            readers: Vec::new(),
            stop: MuxStopHandle {
                active: Arc::new(AtomicBool::new(true)),
                wake,
            },
            stop_rx,
            wait_timeout: None,
            consumed: false,
        }
    }

    /// Bound every consumer wait; on expiry liveness is re-checked.
    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Multiplexer identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Source identifiers in registration order.
    pub fn source_ids(&self) -> &[String] {
        &self.ids
    }

    /// Spawn one reader thread per source.
    ///
    /// Calling `start` more than once, or after [`read`](Self::read), has no
    /// effect.
    pub fn start(&mut self) -> std::io::Result<()> {
        for source in self.pending.drain(..) {
            let active = Arc::clone(&self.stop.active);
            let mux_id = self.id.clone();
            let handle = thread::Builder::new()
                .name(format!("mux-{}-{}", self.id, source.id))
                .spawn(move || read_source(mux_id, source, active))?;
            self.readers.push(handle);
        }
        Ok(())
    }

    /// Request cancellation. Idempotent.
    pub fn request_stop(&self) {
        self.stop.stop();
    }

    /// Handle that can cancel this multiplexer from another thread.
    pub fn stop_handle(&self) -> MuxStopHandle {
        self.stop.clone()
    }

    /// Consume the multiplexed rounds.
    ///
    /// Readers not yet started are started here; a source whose reader
    /// cannot be spawned reads as exhausted. The sequence is not
    /// restartable: a second call yields nothing.
    pub fn read(&mut self) -> MuxRounds {
        if let Err(err) = self.start() {
            tracing::warn!(mux = %self.id, "failed to start reader: {}", err);
            self.pending.clear();
        }
        let queues = if self.consumed {
            Vec::new()
        } else {
            std::mem::take(&mut self.queues)
        };
        self.consumed = true;

        MuxRounds {
            id: self.id.clone(),
            live: vec![true; queues.len()],
            queues,
            readers: std::mem::take(&mut self.readers),
            stop: self.stop.clone(),
            stop_rx: self.stop_rx.clone(),
            wait_timeout: self.wait_timeout,
            finished: false,
        }
    }
}

impl Drop for StreamMux {
    fn drop(&mut self) {
        // Readers still owned here were never handed to a consumer.
        if !self.consumed {
            self.stop.stop();
        }
    }
}

fn read_source(mux_id: String, source: PendingSource, active: Arc<AtomicBool>) {
    let PendingSource {
        id,
        mut lines,
        tx,
    } = source;

    while active.load(Ordering::SeqCst) {
        tracing::trace!(mux = %mux_id, source = %id, "reading next line");
        let Some(line) = lines.next() else {
            tracing::trace!(mux = %mux_id, source = %id, "source exhausted");
            break;
        };
        tracing::trace!(mux = %mux_id, source = %id, line = %line.trim_end(), "line read");
        if tx.send(line).is_err() {
            // Consumer is gone.
            break;
        }
    }
    // Dropping `tx` disconnects the queue, which wakes the consumer.
}

/// Iterator over the rounds of a [`StreamMux`].
///
/// Ends on cancellation, or once every reader finished and every queue is
/// drained. All reader threads are joined before `None` is returned.
pub struct MuxRounds {
    id: String,
    queues: Vec<Receiver<String>>,
    live: Vec<bool>,
    readers: Vec<JoinHandle<()>>,
    stop: MuxStopHandle,
    stop_rx: Receiver<()>,
    wait_timeout: Option<Duration>,
    finished: bool,
}

impl MuxRounds {
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        // Unblock any reader waiting to hand over a line.
        self.queues.clear();
        for reader in self.readers.drain(..) {
            if reader.join().is_err() {
                tracing::warn!(mux = %self.id, "reader thread panicked");
            }
        }
        tracing::debug!(mux = %self.id, "multiplexer drained");
    }

    /// Block until a queue or the stop channel is ready.
    ///
    /// Returns `false` if the wait timed out.
    fn wait_ready(&self) -> bool {
        let mut select = Select::new();
        for (queue, live) in self.queues.iter().zip(&self.live) {
            if *live {
                select.recv(queue);
            }
        }
        select.recv(&self.stop_rx);

        match self.wait_timeout {
            Some(timeout) => select.ready_timeout(timeout).is_ok(),
            None => {
                select.ready();
                true
            }
        }
    }
}

impl Iterator for MuxRounds {
    type Item = MuxRound;

    fn next(&mut self) -> Option<MuxRound> {
        if self.finished {
            return None;
        }

        loop {
            if !self.stop.is_active() || !self.live.iter().any(|l| *l) {
                self.finish();
                return None;
            }

            if !self.wait_ready() {
                continue;
            }
            if !self.stop.is_active() {
                self.finish();
                return None;
            }

            let mut has_line = false;
            let mut slots = Vec::with_capacity(self.queues.len());
            for (queue, live) in self.queues.iter().zip(self.live.iter_mut()) {
                if !*live {
                    slots.push(None);
                    continue;
                }
                match queue.try_recv() {
                    Ok(line) => {
                        has_line = true;
                        slots.push(Some(line));
                    }
                    Err(TryRecvError::Empty) => slots.push(None),
                    Err(TryRecvError::Disconnected) => {
                        *live = false;
                        slots.push(None);
                    }
                }
            }

            if has_line {
                return Some(MuxRound::new(slots));
            }
        }
    }
}

impl Drop for MuxRounds {
    fn drop(&mut self) {
        if !self.finished {
            self.stop.stop();
            self.finish();
        }
    }
}
