//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have **no identity**: two job parameter sets holding the same
/// entries are the same parameters, and two exit statuses with the same code
/// route a flow the same way. They are immutable once built; "modifying" one
/// means building a new value.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct ExitStatus(String);
///
/// impl ValueObject for ExitStatus {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
