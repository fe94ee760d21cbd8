//! Domain layer: message records and the store that holds them.

pub mod message;
pub mod store;
