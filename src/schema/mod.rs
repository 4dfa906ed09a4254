//! Resource schema descriptors.
//!
//! A schema declares, per resource kind, the ordered set of attributes an
//! instance may hold together with their types, whether they are required,
//! how they may change, and the constraint each value must satisfy. Desired
//! attributes are validated here once; everything downstream works with
//! [`ValidAttributes`].

mod attribute;
mod descriptor;
mod value;

pub use attribute::{AttributeDef, Constraint, Mutability};
pub use descriptor::{ResourceSchema, ValidAttributes};
pub use value::{AttributeSet, AttributeType, AttributeValue};
