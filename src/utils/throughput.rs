//! Windowed read accounting.
//!
//! Every byte read from a session's socket is added to the current fixed-length
//! window. When a window closes its count is folded into a rolling average over
//! the last few windows. Folding is lazy: it happens whenever [`ReadMeter::roll`]
//! is called with a time past the window boundary, so a meter nobody looks at
//! costs nothing.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::Instant;

/// Rolling read statistics for one session
#[derive(Debug, Clone)]
pub struct ReadMeter {
    window: Duration,
    depth: usize,
    window_start: Instant,
    current: u64,
    history: VecDeque<u64>,
    average: u64,
    total: u64,
    quiet_since: Option<Instant>,
}

/// Result of folding completed windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollOutcome {
    /// Windows closed by this call
    pub folded: u32,
    /// Rolling average in bytes per window
    pub average: u64,
    /// Largest single window closed by this call, zero when nothing folded
    pub peak_window: u64,
    /// Since when the average has stayed under the floor, if it has
    pub quiet_since: Option<Instant>,
}

impl ReadMeter {
    /// `depth` is the number of closed windows the average spans
    pub fn new(now: Instant, window: Duration, depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            window: window.max(Duration::from_millis(1)),
            depth,
            window_start: now,
            current: 0,
            history: VecDeque::with_capacity(depth),
            average: 0,
            total: 0,
            quiet_since: None,
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.current = self.current.saturating_add(bytes);
        self.total = self.total.saturating_add(bytes);
    }

    /// Close every window that ended at or before `now`.
    ///
    /// `floor` is the minimum acceptable average; the meter remembers when the
    /// average first fell below it.
    pub fn roll(&mut self, now: Instant, floor: u64) -> RollOutcome {
        let first_start = self.window_start;
        let mut folded = 0u32;
        let mut peak_window = 0u64;

        while now >= self.window_start + self.window {
            let closed = if folded == 0 { std::mem::take(&mut self.current) } else { 0 };
            peak_window = peak_window.max(closed);
            self.push_window(closed);
            self.window_start += self.window;
            folded += 1;

            // every further window is empty; once the history is all zeros
            // just jump the boundary forward
            if folded as usize > self.depth {
                let remaining = now.saturating_duration_since(self.window_start);
                let skip = (remaining.as_nanos() / self.window.as_nanos()) as u32;
                self.window_start += self.window * skip;
                folded = folded.saturating_add(skip);
                break;
            }
        }

        if folded > 0 {
            self.average = self.history.iter().sum::<u64>() / self.history.len() as u64;
            if self.average < floor {
                self.quiet_since.get_or_insert(first_start);
            } else {
                self.quiet_since = None;
            }
        }

        RollOutcome {
            folded,
            average: self.average,
            peak_window,
            quiet_since: self.quiet_since,
        }
    }

    fn push_window(&mut self, bytes: u64) {
        if self.history.len() == self.depth {
            self.history.pop_front();
        }
        self.history.push_back(bytes);
    }

    pub fn average(&self) -> u64 {
        self.average
    }

    /// Bytes counted in the still-open window
    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn window_end(&self) -> Instant {
        self.window_start + self.window
    }
}

/// A meter shared between a session's read path and its owner
#[derive(Debug)]
pub struct SharedMeter(Mutex<ReadMeter>);

impl SharedMeter {
    pub fn new(meter: ReadMeter) -> Arc<Self> {
        Arc::new(Self(Mutex::new(meter)))
    }

    // plain counters, a poisoned lock leaves nothing half-updated that matters
    fn lock(&self) -> MutexGuard<'_, ReadMeter> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, bytes: u64) {
        self.lock().record(bytes);
    }

    pub fn roll(&self, now: Instant, floor: u64) -> RollOutcome {
        self.lock().roll(now, floor)
    }

    pub fn average(&self) -> u64 {
        self.lock().average()
    }

    pub fn total(&self) -> u64 {
        self.lock().total()
    }
}

/// `AsyncRead` adaptor that counts every byte into a [`SharedMeter`]
#[derive(Debug)]
pub struct MeteredRead<R> {
    inner: R,
    meter: Arc<SharedMeter>,
}

impl<R> MeteredRead<R> {
    pub fn new(inner: R, meter: Arc<SharedMeter>) -> Self {
        Self { inner, meter }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for MeteredRead<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            let read = buf.filled().len() - before;
            if read > 0 {
                this.meter.record(read as u64);
            }
        }
        poll
    }
}
