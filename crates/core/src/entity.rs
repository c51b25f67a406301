//! Entity trait: identity + continuity across state changes.

use std::collections::HashMap;

/// An object that keeps its identity while its state changes.
///
/// A unit stays the same unit while its status and location move underneath
/// it; a sample stays the same sample while its counters do.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}

/// Index a slice of loaded rows by identity. Later duplicates win.
pub fn index_by_id<E: Entity>(entities: &[E]) -> HashMap<&E::Id, &E> {
    entities.iter().map(|e| (e.id(), e)).collect()
}
