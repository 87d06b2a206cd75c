use std::collections::HashMap;

use proptest::prelude::*;
use proptest::sample::Index;
use weave_core::{Atom, AtomId, Payload, SiteId};

pub const SITES: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

/// One atom to create: authoring site, which earlier atom to hang it on,
/// whether to make it a root instead, and its priority.
type AtomPlan = (usize, Index, bool, i32);

fn arb_plan() -> impl Strategy<Value = AtomPlan> {
    (
        0..SITES.len(),
        any::<Index>(),
        prop::bool::weighted(0.15),
        prop_oneof![8 => Just(0), 1 => Just(1), 1 => Just(-1)],
    )
}

/// Build atoms the way replicas would: each site keeps a Lamport counter that
/// is bumped past the cause before every creation.
fn build_forest(plans: &[AtomPlan]) -> Vec<Atom> {
    let mut clocks = [0_u64; SITES.len()];
    let mut atoms: Vec<Atom> = Vec::with_capacity(plans.len());

    for (site, cause_pick, make_root, priority) in plans {
        let cause = if *make_root || atoms.is_empty() {
            None
        } else {
            Some(atoms[cause_pick.index(atoms.len())].id().clone())
        };
        if let Some(cause) = &cause {
            clocks[*site] = clocks[*site].max(cause.timestamp);
        }
        clocks[*site] += 1;

        let id = AtomId::new(SiteId::new(SITES[*site]), clocks[*site], *priority);
        let payload = Payload::Text(format!("{}-{}", SITES[*site], clocks[*site]));
        atoms.push(Atom::new(id, cause, payload));
    }

    atoms
}

/// A causally ordered list of atoms forming a random forest.
pub fn arb_forest() -> impl Strategy<Value = Vec<Atom>> {
    prop::collection::vec(arb_plan(), 1..48).prop_map(|plans| build_forest(&plans))
}

/// A forest plus one arbitrary delivery order of the same atoms.
pub fn arb_forest_and_delivery() -> impl Strategy<Value = (Vec<Atom>, Vec<Atom>)> {
    arb_forest().prop_flat_map(|atoms| {
        let delivery = Just(atoms.clone()).prop_shuffle();
        (Just(atoms), delivery)
    })
}

/// Order the atoms by definition: pre-order walk of the forest with every
/// set of siblings sorted by weight.
pub fn reference_order(atoms: &[Atom]) -> Vec<AtomId> {
    let mut children: HashMap<Option<AtomId>, Vec<AtomId>> = HashMap::new();
    for atom in atoms {
        children
            .entry(atom.cause().cloned())
            .or_default()
            .push(atom.id().clone());
    }
    for siblings in children.values_mut() {
        siblings.sort_by(AtomId::sibling_cmp);
    }

    let mut out = Vec::with_capacity(atoms.len());
    let mut stack: Vec<AtomId> = children
        .get(&None)
        .map(|roots| roots.iter().rev().cloned().collect())
        .unwrap_or_default();
    while let Some(next) = stack.pop() {
        if let Some(kids) = children.get(&Some(next.clone())) {
            stack.extend(kids.iter().rev().cloned());
        }
        out.push(next);
    }
    out
}
