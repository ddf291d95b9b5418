//! Core data model shared by the engine and the adapters.

mod position;

pub use position::{Position, Side};
