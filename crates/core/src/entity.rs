//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Execution records (instances, executions, step executions) are entities:
/// two records with the same id describe the same thing, whatever their
/// current status or counters say.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// True when both records describe the same entity, possibly at different
    /// points of its life.
    fn same_entity(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}
