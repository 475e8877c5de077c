pub mod error;
pub mod models;
pub mod prelude;
pub mod traits;

/// Used to check that the engine and a source plugin agree on the contract
pub static LIB_VERSION: &str = env!("CARGO_PKG_VERSION");
