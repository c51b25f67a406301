//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. A
/// `Party { name, department }` is one: two parties with the same name and
/// department are the same holder for every business rule.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
