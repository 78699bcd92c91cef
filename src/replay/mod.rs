//! Deterministic k-way merge and time-slicing of event streams.

pub mod align;
pub mod day;

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::types::Event;

/// A lazy, finite, time-ordered stream of events.
pub type EventStream<'a> = Box<dyn Iterator<Item = Event> + 'a>;

// ─── K-way merge ────────────────────────────────────────────────────────────

struct MergeEntry {
    event_time_ms: i64,
    received_time_ns: i64,
    /// (absent, id): an absent id sorts after any present one.
    id_key: (bool, i64),
    stream_seq: usize,
    event: Event,
}

impl MergeEntry {
    fn new(event: Event, stream_seq: usize) -> Self {
        let id_key = match event.tie_break_id() {
            Some(id) => (false, id),
            None => (true, 0),
        };
        Self {
            event_time_ms: event.event_time_ms(),
            received_time_ns: event.received_time_ns(),
            id_key,
            stream_seq,
            event,
        }
    }

    fn key(&self) -> (i64, i64, (bool, i64), usize) {
        (self.event_time_ms, self.received_time_ns, self.id_key, self.stream_seq)
    }
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for MergeEntry {}
impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// K-way merged view over per-stream iterators, ordered by
/// `event_time_ms`. One event per stream is buffered at a time.
///
/// Ties break on capture time, then the deterministic event id, then stream
/// insertion order. No event-type priority is applied, so the merge is
/// reproducible bit-for-bit regardless of which variants share a timestamp.
pub struct MergedEvents<'a> {
    heap: BinaryHeap<Reverse<MergeEntry>>,
    streams: Vec<EventStream<'a>>,
}

pub fn merge_event_streams(streams: Vec<EventStream<'_>>) -> MergedEvents<'_> {
    let mut streams = streams;
    let mut heap = BinaryHeap::with_capacity(streams.len());
    for (seq, stream) in streams.iter_mut().enumerate() {
        if let Some(first) = stream.next() {
            heap.push(Reverse(MergeEntry::new(first, seq)));
        }
    }
    MergedEvents { heap, streams }
}

impl Iterator for MergedEvents<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let Reverse(entry) = self.heap.pop()?;
        if let Some(next) = self.streams[entry.stream_seq].next() {
            self.heap.push(Reverse(MergeEntry::new(next, entry.stream_seq)));
        }
        Some(entry.event)
    }
}

// ─── Time slice ─────────────────────────────────────────────────────────────

/// Slice a time-ordered stream to `[start_ms, end_ms)`.
///
/// Events before `start_ms` are skipped; iteration stops at the first event
/// at/after `end_ms`, which allows early termination on ordered input.
pub struct SlicedEvents<I> {
    inner: I,
    start_ms: Option<i64>,
    end_ms: Option<i64>,
    done: bool,
}

pub fn slice_event_stream<I>(events: I, start_ms: Option<i64>, end_ms: Option<i64>) -> SlicedEvents<I>
where
    I: Iterator<Item = Event>,
{
    SlicedEvents { inner: events, start_ms, end_ms, done: false }
}

impl<I: Iterator<Item = Event>> Iterator for SlicedEvents<I> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        if self.done {
            return None;
        }
        loop {
            let ev = self.inner.next()?;
            let t = ev.event_time_ms();
            if self.start_ms.is_some_and(|s| t < s) {
                continue;
            }
            if self.end_ms.is_some_and(|e| t >= e) {
                self.done = true;
                return None;
            }
            return Some(ev);
        }
    }
}
