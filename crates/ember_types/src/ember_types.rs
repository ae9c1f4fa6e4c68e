//! Ember Types - Component value model for the Ember engine
//!
//! This crate contains the closed set of values a component can hold, the
//! discriminators used to record a component's type next to its value, and
//! the string encoding used when values are written to a key-value store.

mod encoding;
mod kind;
mod value;

pub use encoding::*;
pub use kind::*;
pub use value::*;
