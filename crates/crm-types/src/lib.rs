//! Foundation types for the contact merge engine.
//!
//! This crate provides the identity, field, and value types shared by the
//! record store adapter, the merge engine, and the operator CLI. Every other
//! crate in the workspace depends on `crm-types`.
//!
//! # Key Types
//!
//! - [`ContactId`] - Identifier of a contact (the entity being merged)
//! - [`RecordId`] - Identifier of any other row (collection items, lookups)
//! - [`FieldKey`] / [`FieldDescriptor`] - The fixed, ordered merge fields
//! - [`Choice`] - Operator decision for one field
//! - [`ScalarValue`] - Typed value of a single-valued contact field
//! - [`Category`] / [`Cadence`] - Enumerated scalar domains

pub mod choice;
pub mod error;
pub mod field;
pub mod identity;
pub mod value;

pub use choice::Choice;
pub use error::TypeError;
pub use field::{FieldDescriptor, FieldKey, FieldKind, FIELD_ORDER};
pub use identity::{ContactId, RecordId};
pub use value::{Cadence, Category, PersonName, ScalarValue, MAX_SCORE, MIN_SCORE};
