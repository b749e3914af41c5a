//! Domain model: scalar identifiers and the error taxonomy.

pub mod errors;
pub mod types;

pub use errors::{QueryError, SpawnError};
pub use types::{Address, Pid};
