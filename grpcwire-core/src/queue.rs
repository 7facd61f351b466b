//! Credit-based relay between a producer and a single consumer.

use std::collections::VecDeque;

/// Callback run when a backpressured queue has been drained.
pub type DrainHandler = Box<dyn FnMut() + Send>;

/// Demand value meaning "flowing": every item may be delivered.
const FLOWING: u64 = u64::MAX;

/// A bounded, pausable FIFO with pull-side credits.
///
/// The producer calls [`write`](Self::write); a `false` return means the
/// backlog reached the high-water mark and the producer should pause its
/// upstream. The consumer side pulls with [`poll`](Self::poll), which only
/// yields items while demand is available:
///
/// - [`resume`](Self::resume) grants unlimited demand (the default)
/// - [`pause`](Self::pause) withdraws all demand
/// - [`fetch`](Self::fetch) grants `n` more items while paused
///
/// Items always come out in write order and pausing never drops anything.
/// Once a write has reported backpressure, the drain handler runs when the
/// backlog has been fully delivered. Without a handler the drain is recorded
/// for [`take_drained`](Self::take_drained) instead, so a caller holding a
/// lock around the queue can act on it after releasing the lock.
pub struct FlowControlledQueue<T> {
    pending: VecDeque<T>,
    demand: u64,
    high_water_mark: usize,
    overflow: bool,
    drained: bool,
    drain_handler: Option<DrainHandler>,
}

impl<T> Default for FlowControlledQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FlowControlledQueue<T> {
    pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

    pub fn new() -> Self {
        Self::with_high_water_mark(Self::DEFAULT_HIGH_WATER_MARK)
    }

    /// Create a queue reporting backpressure once `high_water_mark` items are
    /// waiting. A mark of zero is treated as one.
    pub fn with_high_water_mark(high_water_mark: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            demand: FLOWING,
            high_water_mark: high_water_mark.max(1),
            overflow: false,
            drained: false,
            drain_handler: None,
        }
    }

    /// Append an item. Returns `false` when the producer should pause.
    pub fn write(&mut self, item: T) -> bool {
        self.pending.push_back(item);
        let writable = self.is_writable();
        if !writable {
            self.overflow = true;
        }
        writable
    }

    /// Whether the backlog is below the high-water mark.
    pub fn is_writable(&self) -> bool {
        self.pending.len() < self.high_water_mark
    }

    pub fn pause(&mut self) {
        self.demand = 0;
    }

    pub fn resume(&mut self) {
        self.demand = FLOWING;
    }

    /// Grant `n` additional deliveries.
    pub fn fetch(&mut self, n: u64) {
        self.demand = self.demand.saturating_add(n);
    }

    pub fn is_paused(&self) -> bool {
        self.demand == 0
    }

    /// Remaining credits, `None` when flowing.
    pub fn demand(&self) -> Option<u64> {
        (self.demand != FLOWING).then_some(self.demand)
    }

    /// Whether [`poll`](Self::poll) would yield an item.
    pub fn has_deliverable(&self) -> bool {
        self.demand > 0 && !self.pending.is_empty()
    }

    /// The next item in line, regardless of demand.
    pub fn front(&self) -> Option<&T> {
        self.pending.front()
    }

    /// Take the next item if demand allows, consuming one credit.
    pub fn poll(&mut self) -> Option<T> {
        if self.demand == 0 {
            return None;
        }
        let item = self.take_front()?;
        if self.demand != FLOWING {
            self.demand -= 1;
        }
        Some(item)
    }

    /// Take the next item regardless of demand, without consuming a credit.
    ///
    /// Used for out-of-band items such as an end-of-stream marker that must
    /// reach a paused consumer once everything ahead of it was delivered.
    pub fn poll_unmetered(&mut self) -> Option<T> {
        self.take_front()
    }

    fn take_front(&mut self) -> Option<T> {
        let item = self.pending.pop_front()?;
        if self.overflow && self.pending.is_empty() {
            self.overflow = false;
            match self.drain_handler.as_mut() {
                Some(handler) => handler(),
                None => self.drained = true,
            }
        }
        Some(item)
    }

    /// Whether the backlog drained since the last call. Only set when no
    /// drain handler is installed.
    pub fn take_drained(&mut self) -> bool {
        std::mem::take(&mut self.drained)
    }

    pub fn drain_handler(&mut self, handler: DrainHandler) {
        self.drain_handler = Some(handler);
    }

    /// Drop every pending item without delivering it. Returns how many were
    /// dropped. The drain handler is not run.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.overflow = false;
        self.drained = false;
        dropped
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> std::fmt::Debug for FlowControlledQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowControlledQueue")
            .field("pending", &self.pending.len())
            .field("demand", &self.demand())
            .field("high_water_mark", &self.high_water_mark)
            .field("overflow", &self.overflow)
            .field("drained", &self.drained)
            .finish()
    }
}
