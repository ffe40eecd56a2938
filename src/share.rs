//! Share processor: serializes accepted PoWs to an external submit callback
//! and drops any whose header has since gone stale.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::header::BlockHeader;
use crate::pow::Pow;

/// An accepted PoW with its `(nonce, shift, adder)` already patched into a
/// cloned header, ready for the submit callback.
#[derive(Debug, Clone)]
pub struct Share {
    pub header: BlockHeader,
}

struct State {
    active_header_hash: [u8; 32],
    queue: VecDeque<Share>,
    capacity: usize,
}

/// Bounded FIFO queue between workers finding shares and the background
/// task that submits them. `process` is the advisory boundary a sieve loop
/// checks to decide whether to keep mining its current window.
pub struct ShareProcessor {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl ShareProcessor {
    pub fn new(capacity: usize, initial_header_hash: [u8; 32]) -> Self {
        ShareProcessor {
            state: Mutex::new(State {
                active_header_hash: initial_header_hash,
                queue: VecDeque::new(),
                capacity,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Compare `pow`'s hash against the currently-active header. If it
    /// matches, enqueue a cloned header with the PoW patched in and return
    /// `false` ("keep sieving" — nothing stale happened). If it doesn't
    /// match, return `true` ("abort your current sieve, the work is stale").
    pub fn process(&self, pow: &Pow, header_template: &BlockHeader) -> bool {
        let mut state = self.state.lock().unwrap();
        if pow.hash != state.active_header_hash {
            return true;
        }
        while state.queue.len() >= state.capacity {
            state = self.not_full.wait(state).unwrap();
            // A header update may have invalidated us while we waited.
            if pow.hash != state.active_header_hash {
                return true;
            }
        }
        let mut header = header_template.clone();
        header.nonce = pow.nonce;
        header.shift = pow.shift;
        header.adder = pow.adder.to_digits::<u8>(rug::integer::Order::Msf);
        state.queue.push_back(Share { header });
        self.not_empty.notify_one();
        false
    }

    /// Atomically replace the active header and discard every queued share
    /// (they're now stale).
    pub fn update_header(&self, new_hash: [u8; 32]) {
        let mut state = self.state.lock().unwrap();
        state.active_header_hash = new_hash;
        state.queue.clear();
        self.not_full.notify_all();
    }

    /// Background task: pop one share (blocking), for the caller to hand to
    /// the external submit callback.
    pub fn pop_blocking(&self) -> Share {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(share) = state.queue.pop_front() {
                self.not_full.notify_one();
                return share;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }
}
