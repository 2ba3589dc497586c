pub mod attributes;
pub mod general;

pub use attributes::{Attribute, AttributesCollection};
pub use general::get_in;
