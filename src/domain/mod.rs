//! Core domain types and boundary traits

pub mod model;
pub mod ports;

pub use model::*;
pub use ports::*;
