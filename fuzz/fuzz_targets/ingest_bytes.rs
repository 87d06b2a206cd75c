#![no_main]

//! Builds a small forest from fuzz bytes, ingests it in byte-chosen order and
//! in causal order, and checks both replicas agree.

use libfuzzer_sys::fuzz_target;
use weave_core::config::ReplicaConfig;
use weave_core::reducer::NullReducer;
use weave_core::{Atom, AtomId, Payload, Replica, SiteId};

const SITES: [&str; 3] = ["a", "b", "c"];

fn build(data: &[u8]) -> Vec<Atom> {
    let mut atoms: Vec<Atom> = Vec::new();
    let mut clocks = [0_u64; SITES.len()];
    for chunk in data.chunks_exact(2) {
        let site = usize::from(chunk[0]) % SITES.len();
        let cause = if atoms.is_empty() || chunk[1] == 0 {
            None
        } else {
            Some(atoms[usize::from(chunk[1]) % atoms.len()].id().clone())
        };
        if let Some(cause) = &cause {
            clocks[site] = clocks[site].max(cause.timestamp);
        }
        clocks[site] += 1;
        let priority = i32::from(chunk[0] >> 6) - 1;
        let id = AtomId::new(SiteId::new(SITES[site]), clocks[site], priority);
        atoms.push(Atom::new(id, cause, Payload::Empty));
    }
    atoms
}

fn replica() -> Replica {
    Replica::with_reducer(SiteId::new("fuzz"), ReplicaConfig::unbounded(), NullReducer)
}

fuzz_target!(|data: &[u8]| {
    let atoms = build(data);

    let mut ordered = replica();
    ordered.ingest_all(atoms.clone());

    let mut scrambled = atoms;
    scrambled.reverse();
    if let Some(&rotate) = data.first() {
        let len = scrambled.len().max(1);
        scrambled.rotate_left(usize::from(rotate) % len);
    }
    let mut shuffled = replica();
    shuffled.ingest_all(scrambled);

    assert!(shuffled.pending().is_empty());
    assert_eq!(ordered.weave().digest(), shuffled.weave().digest());
});
