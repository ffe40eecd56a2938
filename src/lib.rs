//! # gapminer — Core Library
//!
//! A prime-gap proof-of-work mining engine: segmented Eratosthenes sieving
//! over a CRT-presieved residue class, CPU and GPU Fermat batch testing, and
//! the multi-threaded plumbing that keeps both fed and turns survivors into
//! submitted shares.
//!
//! ## Module organization
//!
//! **Engine modules** (bottom-up dependency order):
//! - [`sieve`] — prime table and packed bit-sieve primitives
//! - [`crt_set`] — presieved residue class: `from_scalars`, `load`/`save`, `speed_factor`
//! - [`crt_optimizer`] — offline greedy + evolutionary search that builds a `CrtSet`
//! - [`sieve_driver`] — Classical and Chinese segmented sieve drivers
//! - [`gap_candidate`] — partially-sieved windows and the shared priority heap
//! - [`fermat`] — CPU Fermat batch tester
//! - [`fermat_gpu`] — GPU host-side batching contract (work items, arena, kernel dispatch)
//! - [`worker`] — thread pool orchestration, header updates, rate metering
//! - [`share`] — bounded share queue and submit-callback plumbing
//! - [`pow`] — PoW value, merit/difficulty math, and the verifier
//! - [`header`] — block header wire format, `sha256d`, hex (de)serialization
//!
//! **Ambient infrastructure:**
//! - [`error`] — typed error taxonomy with exit-code mapping
//! - [`cli`] — CLI surface (`--sieve-size`, `--threads`, `--cset`, `--use-gpu`, …)
//! - [`config`] — resolved, validated run configuration built from parsed CLI flags
//!
//! ## Design philosophy
//!
//! Classical, Chinese, and Hybrid-GPU sieving share one interface
//! (`run`/`stop`/`rates`) dispatched once per worker as a sum type rather
//! than via inheritance (see [`config::ModeConfig`], matched once in
//! `main` to pick a worker pool function). The prime table and a loaded
//! `CrtSet`'s bitmap are immutable after initialization and need no lock;
//! every other piece of shared state (the gap heap, the share queue,
//! per-worker header clones) is protected by exactly the lock its module
//! owns — see `DESIGN.md` for the full grounding ledger.

pub mod cli;
pub mod config;
pub mod crt_optimizer;
pub mod crt_set;
pub mod error;
pub mod fermat;
pub mod fermat_gpu;
pub mod gap_candidate;
pub mod header;
pub mod pow;
pub mod share;
pub mod sieve;
pub mod sieve_driver;
pub mod worker;
