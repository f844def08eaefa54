// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sliding Window
//!
//! Per-channel reordering buffer. Sequenced items may arrive in any order
//! and more than once; the window releases each sequence once, in ascending
//! order, and reports gaps ("holes") that stay open longer than the
//! configured timeout so the owner can request a backfill.
//!
//! # Example
//!
//! ```ignore
//! let mut window = SlidingWindow::new("inbox", WindowConfig::default());
//! window.receive(1, "a");          // (Expected, ["a"])
//! window.receive(3, "c");          // (PositiveHole, [])
//! window.receive(2, "b");          // (HoleFilled, ["b", "c"])
//! ```
//!
//! Hole watches run on the tokio timer and report through the channel
//! given to [`SlidingWindow::with_notifier`]. A window without a notifier
//! tracks holes but never times them out.
//!
//! At most `max_pending` items are held behind holes. Past that the leading
//! hole is skipped as if it had expired.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Sliding window settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Released entries kept for duplicate detection.
    pub size: usize,
    /// Expected sequence increment.
    pub step: i64,
    /// How long a hole may stay open before it is reported.
    pub timeout_ms: u64,
    /// Skip a reported hole once it stays open for a second timeout.
    pub release_on_timeout: bool,
    /// Items held behind holes before the leading hole is skipped.
    pub max_pending: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            size: 100,
            step: 1,
            timeout_ms: 5_000,
            release_on_timeout: false,
            max_pending: 1_000,
        }
    }
}

impl WindowConfig {
    /// Hole timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Classification of one received item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveResult {
    /// Already held with the same value. Nothing released.
    Duplicate,
    /// The next expected sequence with no holes open. Released at once.
    Expected,
    /// Closed all or part of a hole. Releases only when the leading hole
    /// starts to close.
    HoleFilled,
    /// Beyond everything held. Held until the gap before it closes.
    PositiveHole,
    /// Older than expected. The window resynchronised on this item.
    NegativeHole,
}

/// A gap in one channel: sequences `start + step ..= end` are missing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HoleRange {
    /// Channel key.
    pub key: String,
    /// Last sequence before the gap (exclusive).
    pub start: i64,
    /// Last missing sequence (inclusive).
    pub end: i64,
}

impl HoleRange {
    /// Returns true if `sequence` falls inside the gap.
    pub fn contains(&self, sequence: i64) -> bool {
        self.start < sequence && sequence <= self.end
    }
}

impl fmt::Display for HoleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {}]", self.key, self.start, self.end)
    }
}

/// Reported when a hole watch expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoleTimeout {
    /// The hole that stayed open.
    pub range: HoleRange,
    /// Identifies the watch that fired.
    pub watch_id: u64,
}

/// What the owner should do about an expired hole.
#[derive(Debug, Clone, PartialEq)]
pub enum HoleExpiry<V> {
    /// Request the range again from the server.
    Backfill(HoleRange),
    /// The hole was skipped; these items are now released.
    Released(Vec<V>),
    /// The watch no longer matches an open hole.
    Stale,
}

struct Watch {
    id: u64,
    /// Next time the watch fires.
    deadline: Instant,
    fired: bool,
    expired: bool,
    task: Option<JoinHandle<()>>,
}

impl Drop for Watch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn arm(
    notifier: Option<&mpsc::UnboundedSender<HoleTimeout>>,
    range: HoleRange,
    watch_id: u64,
    deadline: Instant,
) -> Option<JoinHandle<()>> {
    let notifier = notifier?.clone();
    Some(tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        let _ = notifier.send(HoleTimeout { range, watch_id });
    }))
}

/// Reordering buffer for one channel.
pub struct SlidingWindow<V> {
    key: String,
    config: WindowConfig,
    index: Option<i64>,
    released: BTreeMap<i64, V>,
    pending: BTreeMap<i64, V>,
    watches: BTreeMap<(i64, i64), Watch>,
    next_watch: u64,
    notifier: Option<mpsc::UnboundedSender<HoleTimeout>>,
}

impl<V: Clone + PartialEq> SlidingWindow<V> {
    /// Creates an unseeded window without hole timers.
    pub fn new(key: impl Into<String>, config: WindowConfig) -> Self {
        SlidingWindow {
            key: key.into(),
            config,
            index: None,
            released: BTreeMap::new(),
            pending: BTreeMap::new(),
            watches: BTreeMap::new(),
            next_watch: 0,
            notifier: None,
        }
    }

    /// Creates a window whose hole watches report to `notifier`.
    ///
    /// Must be used from within a tokio runtime once holes appear.
    pub fn with_notifier(
        key: impl Into<String>,
        config: WindowConfig,
        notifier: mpsc::UnboundedSender<HoleTimeout>,
    ) -> Self {
        let mut window = Self::new(key, config);
        window.notifier = Some(notifier);
        window
    }

    /// Channel key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Window settings.
    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Last released sequence, or `None` while unseeded.
    pub fn index(&self) -> Option<i64> {
        self.index
    }

    /// Number of items held behind holes.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of released entries retained for duplicate detection.
    pub fn retained_len(&self) -> usize {
        self.released.len()
    }

    /// Starts the window after `index`, discarding everything held.
    pub fn seed(&mut self, index: i64) {
        self.reset();
        self.index = Some(index);
        debug!(key = %self.key, index, "Window seeded");
    }

    /// Returns the window to its unseeded state.
    pub fn reset(&mut self) {
        self.index = None;
        self.released.clear();
        self.pending.clear();
        self.watches.clear();
    }

    /// Accepts one item and returns what became releasable, in order.
    pub fn receive(&mut self, sequence: i64, value: V) -> (ReceiveResult, Vec<V>) {
        let mut released = Vec::new();

        let Some(index) = self.index else {
            self.release(sequence, value, &mut released);
            self.trim();
            return (ReceiveResult::Expected, released);
        };

        if self.pending.get(&sequence) == Some(&value)
            || self.released.get(&sequence) == Some(&value)
        {
            debug!(key = %self.key, sequence, "Duplicate");
            return (ReceiveResult::Duplicate, released);
        }

        // No expected sequence past i64::MAX; anything after that resyncs.
        let result = match index.checked_add(self.config.step) {
            Some(expected) if sequence == expected => {
                let had_holes = !self.pending.is_empty();
                self.release(sequence, value, &mut released);
                if had_holes {
                    self.drain(&mut released);
                    ReceiveResult::HoleFilled
                } else {
                    ReceiveResult::Expected
                }
            }
            Some(expected) if sequence > expected => {
                let inside_hole = self
                    .pending
                    .last_key_value()
                    .is_some_and(|(&last, _)| sequence < last);
                self.pending.insert(sequence, value);
                if inside_hole {
                    ReceiveResult::HoleFilled
                } else {
                    ReceiveResult::PositiveHole
                }
            }
            _ => {
                warn!(
                    key = %self.key,
                    sequence,
                    index,
                    "Sequence behind window, resynchronising"
                );
                self.reset();
                self.release(sequence, value, &mut released);
                ReceiveResult::NegativeHole
            }
        };

        self.settle(&mut released);
        (result, released)
    }

    /// Open holes in ascending order.
    pub fn holes(&self) -> Vec<HoleRange> {
        self.hole_bounds()
            .into_iter()
            .map(|(start, end)| HoleRange {
                key: self.key.clone(),
                start,
                end,
            })
            .collect()
    }

    /// Handles a fired hole watch.
    ///
    /// The first expiry asks for a backfill. With `release_on_timeout` set,
    /// a second expiry skips the hole once it is the leading one.
    pub fn on_timeout(&mut self, timeout: &HoleTimeout) -> HoleExpiry<V> {
        let range = &timeout.range;
        let second_stage = self.config.timeout();
        let release_on_timeout = self.config.release_on_timeout;
        let notifier = self.notifier.clone();

        let Some(watch) = self.live_watch(timeout) else {
            return HoleExpiry::Stale;
        };
        watch.task = None;

        if !watch.fired {
            watch.fired = true;
            warn!(key = %range.key, start = range.start, end = range.end, "Hole timed out");
            if release_on_timeout {
                watch.deadline += second_stage;
                watch.task = arm(notifier.as_ref(), range.clone(), watch.id, watch.deadline);
            }
            return HoleExpiry::Backfill(range.clone());
        }

        watch.expired = true;
        let mut released = Vec::new();
        self.settle(&mut released);
        HoleExpiry::Released(released)
    }

    /// Re-arms a fired watch for another timeout without acting on it.
    ///
    /// The watch keeps its stage, so the next expiry is handled as this one
    /// would have been. Returns false for a stale watch.
    pub fn defer(&mut self, timeout: &HoleTimeout) -> bool {
        let delay = self.config.timeout();
        let notifier = self.notifier.clone();
        let Some(watch) = self.live_watch(timeout) else {
            return false;
        };
        let range = &timeout.range;
        watch.deadline = Instant::now() + delay;
        watch.task = arm(notifier.as_ref(), range.clone(), watch.id, watch.deadline);
        debug!(key = %range.key, start = range.start, end = range.end, "Hole timeout deferred");
        true
    }

    /// The watch `timeout` came from, if it still guards an open hole and
    /// has a stage left to run.
    fn live_watch(&mut self, timeout: &HoleTimeout) -> Option<&mut Watch> {
        let range = &timeout.range;
        if range.key != self.key {
            return None;
        }
        let release_on_timeout = self.config.release_on_timeout;
        self.watches
            .get_mut(&(range.start, range.end))
            .filter(|w| w.id == timeout.watch_id && !w.expired && (!w.fired || release_on_timeout))
    }

    /// Skips the leading hole and releases what follows it.
    ///
    /// Does nothing unless `range` is the current leading hole.
    pub fn release_through(&mut self, range: &HoleRange) -> Vec<V> {
        let mut released = Vec::new();
        if self.hole_bounds().first() != Some(&(range.start, range.end)) {
            return released;
        }
        warn!(key = %self.key, start = range.start, end = range.end, "Skipping hole");
        self.index = Some(range.end);
        self.drain(&mut released);
        self.settle(&mut released);
        released
    }

    fn release(&mut self, sequence: i64, value: V, released: &mut Vec<V>) {
        self.index = Some(sequence);
        self.released.insert(sequence, value.clone());
        released.push(value);
    }

    /// Releases held items that directly follow the index.
    fn drain(&mut self, released: &mut Vec<V>) {
        while let Some(index) = self.index {
            let Some(next) = index.checked_add(self.config.step) else {
                break;
            };
            let Some(value) = self.pending.remove(&next) else {
                break;
            };
            self.release(next, value, released);
        }
    }

    fn trim(&mut self) {
        while self.released.len() > self.config.size {
            self.released.pop_first();
        }
    }

    fn hole_bounds(&self) -> Vec<(i64, i64)> {
        let Some(mut previous) = self.index else {
            return Vec::new();
        };
        let mut bounds = Vec::new();
        for &sequence in self.pending.keys() {
            if previous
                .checked_add(self.config.step)
                .is_some_and(|next| sequence > next)
            {
                bounds.push((previous, sequence - self.config.step));
            }
            previous = sequence;
        }
        bounds
    }

    /// Re-syncs watches with the current holes, then skips the leading
    /// hole while it has expired or too many items are held.
    fn settle(&mut self, released: &mut Vec<V>) {
        loop {
            self.refresh_watches();
            let Some(&(start, end)) = self.hole_bounds().first() else {
                break;
            };
            if self.pending.len() > self.config.max_pending {
                warn!(
                    key = %self.key,
                    start,
                    end,
                    pending = self.pending.len(),
                    "Too many items held, skipping hole"
                );
            } else if self.config.release_on_timeout
                && self.watches.get(&(start, end)).is_some_and(|w| w.expired)
            {
                warn!(key = %self.key, start, end, "Skipping expired hole");
            } else {
                break;
            }
            self.index = Some(end);
            self.drain(released);
        }
        self.trim();
    }

    /// Keeps watches for unchanged holes, gives holes carved out of an
    /// older hole that hole's deadline, and starts fresh watches for new
    /// holes. Watches of closed holes are dropped, which cancels them.
    fn refresh_watches(&mut self) {
        let mut previous = std::mem::take(&mut self.watches);
        let fresh_deadline = Instant::now() + self.config.timeout();

        for (start, end) in self.hole_bounds() {
            if let Some(watch) = previous.remove(&(start, end)) {
                self.watches.insert((start, end), watch);
                continue;
            }

            let parent = previous
                .iter()
                .find(|(bounds, _)| bounds.0 <= start && end <= bounds.1)
                .map(|(_, w)| (w.deadline, w.fired, w.expired));
            if parent.is_none() {
                debug!(key = %self.key, start, end, "Hole opened");
            }
            let (deadline, fired, expired) = parent.unwrap_or((fresh_deadline, false, false));

            self.next_watch += 1;
            let id = self.next_watch;
            let armed = !expired && (!fired || self.config.release_on_timeout);
            let task = if armed {
                let range = HoleRange {
                    key: self.key.clone(),
                    start,
                    end,
                };
                arm(self.notifier.as_ref(), range, id, deadline)
            } else {
                None
            };

            self.watches.insert(
                (start, end),
                Watch {
                    id,
                    deadline,
                    fired,
                    expired,
                    task,
                },
            );
        }

        for (start, end) in previous.keys() {
            debug!(key = %self.key, start, end, "Hole closed");
        }
    }
}

impl<V> fmt::Debug for SlidingWindow<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindow")
            .field("key", &self.key)
            .field("index", &self.index)
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .field("holes", &self.watches.keys().collect::<Vec<_>>())
            .finish()
    }
}
