//! Core data types: identifiers, enums, and the order record.

pub mod enums;
pub mod ids;
pub mod order;

pub use enums::*;
pub use ids::*;
pub use order::*;
