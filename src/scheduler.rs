//! Discrete-event scheduler: an event arena plus a time-ordered queue.
//!
//! Events are stored in a slab arena and addressed through stable
//! `EventHandle`s; the queue only holds (time, sequence, slot) keys. Two
//! backends are provided behind the same interface:
//!
//! - a calendar queue (default), which resizes its bucket array when the
//!   population crosses 2·N or N/2−2 and recomputes the bucket width from a
//!   bounded sample of inter-event gaps;
//! - an index-tracked binary heap, used as a fallback when event density is
//!   too irregular for the calendar to pay off.
//!
//! Cancellation clears the slot's active flag and physically detaches the
//! key from the queue, so a schedule/cancel pair leaves the queue length
//! unchanged. Same-time events pop in insertion order (sequence number as
//! the secondary key).

use std::cmp::Ordering;

/// Simulation time in seconds.
pub type Time = f64;

/// Two event times closer than this are considered simultaneous (1 ns).
pub const SAME_TIME_TOLERANCE: Time = 1e-9;

/// Initial number of slots reserved in the event arena. The arena grows by
/// doubling and never shrinks; freed slots are reused in LIFO order.
const ARENA_INITIAL_SLOTS: usize = 256;

/// Initial bucket count of the calendar queue (must be a power of two).
const CALENDAR_INITIAL_BUCKETS: usize = 16;

/// Maximum number of inter-event gaps sampled when recomputing the bucket
/// width on a resize.
const CALENDAR_WIDTH_SAMPLES: usize = 25;

/// Bucket width used when there are too few queued events to sample.
const CALENDAR_FALLBACK_WIDTH: Time = 1.0;

/// Queue backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    Calendar,
    BinaryHeap,
}

/// Error returned by `schedule` when the requested time precedes the clock.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeInPast {
    pub requested: Time,
    pub clock: Time,
}

impl std::fmt::Display for TimeInPast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "event scheduled in the past: requested t={} while clock is at t={}",
            self.requested, self.clock
        )
    }
}

impl std::error::Error for TimeInPast {}

/// Stable handle to a scheduled event. Carries a generation counter so that
/// cancelling a handle whose slot was already freed and reused is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHandle {
    slot: usize,
    generation: u32,
}

/// A dispatched event, handed to the owning component's activation.
#[derive(Debug)]
pub struct Event<O, P> {
    pub time: Time,
    pub owner: O,
    pub payload: P,
}

/// Ordering key stored inside the queue backends.
#[derive(Debug, Clone, Copy)]
struct Key {
    time: Time,
    seq: u64,
    slot: usize,
}

impl Key {
    fn cmp_key(&self, other: &Key) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Position of a queued event inside the active backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueuePos {
    Detached,
    Heap(usize),
    Bucket(usize),
}

struct Slot<O, P> {
    time: Time,
    seq: u64,
    generation: u32,
    active: bool,
    pos: QueuePos,
    owner: Option<O>,
    payload: Option<P>,
}

/// Event arena plus time-ordered queue. `O` identifies the owning component
/// and is returned untouched on dispatch; `P` is the payload variant.
pub struct Scheduler<O, P> {
    slots: Vec<Slot<O, P>>,
    free: Vec<usize>,
    clock: Time,
    next_seq: u64,
    len: usize,
    events_processed: u64,
    backend: QueueBackend,
    // Binary-heap backend state.
    heap: Vec<Key>,
    // Calendar-queue backend state.
    buckets: Vec<Vec<Key>>,
    bucket_width: Time,
    last_bucket: usize,
    bucket_top: Time,
    last_time: Time,
}

impl<O: Copy, P> Scheduler<O, P> {
    pub fn new(backend: QueueBackend) -> Self {
        let mut slots = Vec::with_capacity(ARENA_INITIAL_SLOTS);
        let mut free = Vec::with_capacity(ARENA_INITIAL_SLOTS);
        for i in 0..ARENA_INITIAL_SLOTS {
            slots.push(Slot {
                time: 0.0,
                seq: 0,
                generation: 0,
                active: false,
                pos: QueuePos::Detached,
                owner: None,
                payload: None,
            });
            // LIFO free list: lowest index ends up on top.
            free.push(ARENA_INITIAL_SLOTS - 1 - i);
        }
        Self {
            slots,
            free,
            clock: 0.0,
            next_seq: 0,
            len: 0,
            events_processed: 0,
            backend,
            heap: Vec::new(),
            buckets: vec![Vec::new(); CALENDAR_INITIAL_BUCKETS],
            bucket_width: CALENDAR_FALLBACK_WIDTH,
            last_bucket: 0,
            bucket_top: CALENDAR_FALLBACK_WIDTH,
            last_time: 0.0,
        }
    }

    /// Current simulation clock (time of the last dispatched event).
    pub fn now(&self) -> Time {
        self.clock
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total number of events dispatched so far.
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Insert an event at absolute time `time`. Fails if `time` precedes the
    /// current clock.
    pub fn schedule(&mut self, owner: O, payload: P, time: Time) -> Result<EventHandle, TimeInPast> {
        if time < self.clock {
            return Err(TimeInPast {
                requested: time,
                clock: self.clock,
            });
        }
        let slot = match self.free.pop() {
            Some(s) => s,
            None => {
                // Arena under pressure: grow by one slot (the Vec doubles its
                // backing storage on its own); the arena never shrinks.
                self.slots.push(Slot {
                    time: 0.0,
                    seq: 0,
                    generation: 0,
                    active: false,
                    pos: QueuePos::Detached,
                    owner: None,
                    payload: None,
                });
                self.slots.len() - 1
            }
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        {
            let s = &mut self.slots[slot];
            debug_assert!(!s.active, "allocating a slot that is still active");
            s.time = time;
            s.seq = seq;
            s.active = true;
            s.owner = Some(owner);
            s.payload = Some(payload);
        }
        let key = Key { time, seq, slot };
        match self.backend {
            QueueBackend::BinaryHeap => self.heap_insert(key),
            QueueBackend::Calendar => self.calendar_insert(key),
        }
        self.len += 1;
        Ok(EventHandle {
            slot,
            generation: self.slots[slot].generation,
        })
    }

    /// Cancel a pending event. Returns false (no-op) when the handle is
    /// stale or the event already fired.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        let Some(s) = self.slots.get(handle.slot) else {
            return false;
        };
        if !s.active || s.generation != handle.generation {
            return false;
        }
        match s.pos {
            QueuePos::Heap(i) => self.heap_remove(i),
            QueuePos::Bucket(b) => {
                let seq = self.slots[handle.slot].seq;
                let bucket = &mut self.buckets[b];
                let at = bucket
                    .iter()
                    .position(|k| k.seq == seq)
                    .expect("queued event missing from its bucket");
                bucket.swap_remove(at);
            }
            QueuePos::Detached => unreachable!("active event without a queue position"),
        }
        self.len -= 1;
        self.release(handle.slot);
        if self.backend == QueueBackend::Calendar {
            self.calendar_maybe_shrink();
        }
        true
    }

    /// Pop the earliest pending event and advance the clock to its time.
    pub fn pop(&mut self) -> Option<Event<O, P>> {
        if self.len == 0 {
            return None;
        }
        let key = match self.backend {
            QueueBackend::BinaryHeap => self.heap_pop(),
            QueueBackend::Calendar => self.calendar_pop(),
        };
        self.len -= 1;
        debug_assert!(
            key.time >= self.clock,
            "clock would move backwards: {} -> {}",
            self.clock,
            key.time
        );
        self.clock = key.time;
        self.events_processed += 1;
        let owner;
        let payload;
        {
            let s = &mut self.slots[key.slot];
            owner = s.owner.take().expect("popped slot without owner");
            payload = s.payload.take().expect("popped slot without payload");
        }
        self.release(key.slot);
        if self.backend == QueueBackend::Calendar {
            self.calendar_maybe_shrink();
        }
        Some(Event {
            time: key.time,
            owner,
            payload,
        })
    }

    /// Time of the earliest pending event without popping it.
    pub fn peek_time(&self) -> Option<Time> {
        if self.len == 0 {
            return None;
        }
        match self.backend {
            QueueBackend::BinaryHeap => self.heap.first().map(|k| k.time),
            QueueBackend::Calendar => self
                .buckets
                .iter()
                .flatten()
                .min_by(|a, b| a.cmp_key(b))
                .map(|k| k.time),
        }
    }

    fn release(&mut self, slot: usize) {
        let s = &mut self.slots[slot];
        s.active = false;
        s.pos = QueuePos::Detached;
        s.owner = None;
        s.payload = None;
        s.generation = s.generation.wrapping_add(1);
        // Freed slots return to the head of the free list.
        self.free.push(slot);
    }

    // ---------- binary-heap backend ----------

    fn heap_insert(&mut self, key: Key) {
        self.heap.push(key);
        let i = self.heap.len() - 1;
        self.slots[key.slot].pos = QueuePos::Heap(i);
        self.heap_sift_up(i);
    }

    fn heap_pop(&mut self) -> Key {
        self.heap_remove_key(0)
    }

    fn heap_remove(&mut self, i: usize) {
        self.heap_remove_key(i);
    }

    fn heap_remove_key(&mut self, i: usize) -> Key {
        let last = self.heap.len() - 1;
        self.heap.swap(i, last);
        let key = self.heap.pop().expect("remove from empty heap");
        if i <= last && i < self.heap.len() {
            let moved = self.heap[i];
            self.slots[moved.slot].pos = QueuePos::Heap(i);
            // The swapped-in element may need to travel either direction.
            self.heap_sift_up(i);
            if let QueuePos::Heap(j) = self.slots[moved.slot].pos {
                self.heap_sift_down(j);
            }
        }
        key
    }

    fn heap_sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[i].cmp_key(&self.heap[parent]) == Ordering::Less {
                self.heap.swap(i, parent);
                self.slots[self.heap[i].slot].pos = QueuePos::Heap(i);
                self.slots[self.heap[parent].slot].pos = QueuePos::Heap(parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn heap_sift_down(&mut self, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            if left < self.heap.len()
                && self.heap[left].cmp_key(&self.heap[smallest]) == Ordering::Less
            {
                smallest = left;
            }
            if right < self.heap.len()
                && self.heap[right].cmp_key(&self.heap[smallest]) == Ordering::Less
            {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.heap.swap(i, smallest);
            self.slots[self.heap[i].slot].pos = QueuePos::Heap(i);
            self.slots[self.heap[smallest].slot].pos = QueuePos::Heap(smallest);
            i = smallest;
        }
    }

    // ---------- calendar-queue backend ----------

    fn calendar_bucket_of(&self, time: Time) -> usize {
        let n = self.buckets.len();
        ((time / self.bucket_width) as u64 % n as u64) as usize
    }

    fn calendar_insert(&mut self, key: Key) {
        if self.len + 1 > 2 * self.buckets.len() {
            self.calendar_resize(self.buckets.len() * 2);
        }
        let b = self.calendar_bucket_of(key.time);
        self.slots[key.slot].pos = QueuePos::Bucket(b);
        self.buckets[b].push(key);
    }

    fn calendar_maybe_shrink(&mut self) {
        let n = self.buckets.len();
        if n > CALENDAR_INITIAL_BUCKETS && self.len + 2 < n / 2 {
            self.calendar_resize(n / 2);
        }
    }

    /// Rebuild the bucket array with `new_len` buckets and a width sampled
    /// from the current population's inter-event gaps.
    fn calendar_resize(&mut self, new_len: usize) {
        let mut keys: Vec<Key> = self.buckets.iter().flatten().copied().collect();
        keys.sort_by(|a, b| a.cmp_key(b));
        self.bucket_width = Self::sample_width(&keys);
        self.buckets = vec![Vec::new(); new_len];
        self.last_time = keys.first().map(|k| k.time).unwrap_or(self.clock);
        self.last_bucket = self.calendar_bucket_of(self.last_time);
        self.bucket_top =
            (self.last_time / self.bucket_width).floor() * self.bucket_width + self.bucket_width;
        for key in keys {
            let b = self.calendar_bucket_of(key.time);
            self.slots[key.slot].pos = QueuePos::Bucket(b);
            self.buckets[b].push(key);
        }
    }

    /// Average gap between the earliest events, capped at
    /// `CALENDAR_WIDTH_SAMPLES` samples; falls back to 1.0 when the
    /// population is too small or degenerate (all simultaneous).
    fn sample_width(sorted: &[Key]) -> Time {
        let take = sorted.len().min(CALENDAR_WIDTH_SAMPLES + 1);
        if take < 2 {
            return CALENDAR_FALLBACK_WIDTH;
        }
        let mut sum = 0.0;
        let mut count = 0usize;
        for pair in sorted[..take].windows(2) {
            let gap = pair[1].time - pair[0].time;
            if gap > 0.0 {
                sum += gap;
                count += 1;
            }
        }
        if count == 0 {
            return CALENDAR_FALLBACK_WIDTH;
        }
        // Three times the mean gap keeps a handful of events per bucket.
        3.0 * sum / count as f64
    }

    fn calendar_pop(&mut self) -> Key {
        debug_assert!(self.len > 0);
        let n = self.buckets.len();
        // Resume the scan at the bucket of the last dequeued event.
        self.last_bucket = self.calendar_bucket_of(self.last_time);
        self.bucket_top = (self.last_time / self.bucket_width).floor() * self.bucket_width
            + self.bucket_width;
        let mut b = self.last_bucket;
        let mut top = self.bucket_top;
        for _ in 0..n {
            let best = self.buckets[b]
                .iter()
                .enumerate()
                .min_by(|(_, x), (_, y)| x.cmp_key(y))
                .map(|(i, k)| (i, *k));
            if let Some((i, key)) = best {
                if key.time < top {
                    self.buckets[b].swap_remove(i);
                    self.last_time = key.time;
                    self.last_bucket = b;
                    self.bucket_top = top;
                    return key;
                }
            }
            b = (b + 1) % n;
            top += self.bucket_width;
        }
        // A full year passed without a hit: direct search for the minimum.
        let (b, i, key) = self
            .buckets
            .iter()
            .enumerate()
            .flat_map(|(b, bucket)| bucket.iter().enumerate().map(move |(i, k)| (b, i, *k)))
            .min_by(|(_, _, x), (_, _, y)| x.cmp_key(y))
            .expect("calendar pop on empty queue");
        self.buckets[b].swap_remove(i);
        self.last_time = key.time;
        self.last_bucket = b;
        self.bucket_top =
            (key.time / self.bucket_width).floor() * self.bucket_width + self.bucket_width;
        key
    }
}
