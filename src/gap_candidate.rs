//! Gap Candidate: a partially-sieved window, and the shared priority heap
//! that hands the best ones to the Fermat testers first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};

use rug::Integer;

/// A partially sieved window awaiting Fermat testing. `survivors` holds the
/// bit offsets (relative to `gap_start`) not yet crossed off by any prime
/// layer.
#[derive(Debug, Clone)]
pub struct GapCandidate {
    pub nonce: u32,
    pub target: f64,
    pub gap_start: Integer,
    pub survivors: Vec<u32>,
    /// Monotonic insertion sequence, used to break survivor-count ties in
    /// FIFO order (oldest first).
    pub seq: u64,
}

impl GapCandidate {
    pub fn survivor_count(&self) -> usize {
        self.survivors.len()
    }
}

/// Max-heap ordering: more survivors first; ties broken by insertion order
/// (earlier `seq` wins).
impl PartialEq for GapCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.survivor_count() == other.survivor_count() && self.seq == other.seq
    }
}
impl Eq for GapCandidate {}

impl PartialOrd for GapCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GapCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.survivor_count()
            .cmp(&other.survivor_count())
            .then_with(|| other.seq.cmp(&self.seq)) // earlier seq sorts "greater" -> popped first on ties
    }
}

/// The shared, mutex-guarded priority heap connecting segmented-sieve
/// producers to Fermat-tester consumers. Non-blocking: `pop` returns `None`
/// immediately on an empty heap, a transient condition callers are expected
/// to yield and retry on rather than block.
pub struct GapQueue {
    inner: Mutex<QueueState>,
    not_empty: Condvar,
}

struct QueueState {
    heap: BinaryHeap<GapCandidate>,
    next_seq: u64,
    draining: bool,
}

impl Default for GapQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl GapQueue {
    pub fn new() -> Self {
        GapQueue {
            inner: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                draining: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Push a candidate, stamping it with the next insertion sequence.
    pub fn push(&self, nonce: u32, target: f64, gap_start: Integer, survivors: Vec<u32>) {
        let mut state = self.inner.lock().unwrap();
        if state.draining {
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(GapCandidate {
            nonce,
            target,
            gap_start,
            survivors,
            seq,
        });
        self.not_empty.notify_one();
    }

    /// Pop the best (most-survivors) candidate, or `None` if empty.
    /// Non-blocking by design — see module docs.
    pub fn try_pop(&self) -> Option<GapCandidate> {
        self.inner.lock().unwrap().heap.pop()
    }

    /// Block (with a timeout, to re-check `should_stop` periodically) until
    /// a candidate is available or the queue is reset.
    pub fn pop_wait(&self, timeout: std::time::Duration) -> Option<GapCandidate> {
        let mut state = self.inner.lock().unwrap();
        loop {
            if let Some(c) = state.heap.pop() {
                return Some(c);
            }
            if state.draining {
                return None;
            }
            let (guard, result) = self.not_empty.wait_timeout(state, timeout).unwrap();
            state = guard;
            if result.timed_out() {
                return None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the heap (used by Chinese-mode header-update `reset()`).
    pub fn reset(&self) {
        let mut state = self.inner.lock().unwrap();
        state.heap.clear();
        state.draining = false;
        self.not_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: usize, seq_hint: u32) -> GapCandidate {
        GapCandidate {
            nonce: seq_hint,
            target: 10.0,
            gap_start: Integer::from(100u32),
            survivors: vec![0; n],
            seq: 0,
        }
    }

    #[test]
    fn heap_pops_non_increasing_survivor_counts() {
        let q = GapQueue::new();
        q.push(0, 10.0, Integer::from(1u32), vec![0; 3]);
        q.push(1, 10.0, Integer::from(2u32), vec![0; 9]);
        q.push(2, 10.0, Integer::from(3u32), vec![0; 1]);
        q.push(3, 10.0, Integer::from(4u32), vec![0; 5]);

        let mut last = usize::MAX;
        let mut popped = Vec::new();
        while let Some(c) = q.try_pop() {
            popped.push(c.survivor_count());
        }
        for &n in &popped {
            assert!(n <= last);
            last = n;
        }
        assert_eq!(popped, vec![9, 5, 3, 1]);
    }

    #[test]
    fn ties_broken_by_insertion_order() {
        let q = GapQueue::new();
        q.push(0, 10.0, Integer::from(1u32), vec![0; 5]);
        q.push(1, 10.0, Integer::from(2u32), vec![0; 5]);
        let first = q.try_pop().unwrap();
        let second = q.try_pop().unwrap();
        assert!(first.seq < second.seq);
    }

    #[test]
    fn empty_pop_returns_none_immediately() {
        let q = GapQueue::new();
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn reset_drains_heap() {
        let q = GapQueue::new();
        q.push(0, 10.0, Integer::from(1u32), vec![0; 5]);
        q.reset();
        assert!(q.is_empty());
    }

    #[test]
    fn ordering_matches_survivor_count_primarily() {
        let a = candidate(3, 0);
        let b = candidate(9, 1);
        assert!(b > a);
    }
}
