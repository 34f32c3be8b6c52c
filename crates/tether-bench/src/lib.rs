//! Benchmark workloads for the tether allocation primitive.
//!
//! Provides the deterministic workload builders used by the criterion
//! benches: seeded payload-size distributions and [`Strong`]-based chain
//! builders whose teardown exercises cascading release.

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tether::Strong;

/// A linked payload for teardown benchmarks. Dropping a link releases its
/// `next` edge, so dropping a chain's head unwinds the whole chain.
pub struct Link {
    pub weight: u64,
    pub next: Option<Strong<Link>>,
}

/// Build a chain of `len` links and return its head.
///
/// Built tail-first so every edge owns the creation reference of the link
/// below it; no retains beyond the edges exist when this returns.
///
/// # Panics
///
/// Panics if `len` is zero.
pub fn chain(len: usize) -> Strong<Link> {
    assert!(len > 0, "a chain has at least one link");
    let mut head = Strong::new(Link {
        weight: 0,
        next: None,
    })
    .expect("bench allocation");
    for weight in 1..len as u64 {
        head = Strong::new(Link {
            weight,
            next: Some(head),
        })
        .expect("bench allocation");
    }
    head
}

/// Deterministic payload sizes in `8..=4096` bytes.
///
/// Seeded so runs are comparable across machines and commits.
pub fn payload_sizes(seed: u64, n: usize) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n).map(|_| rng.random_range(8..=4096)).collect()
}
