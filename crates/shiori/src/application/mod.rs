pub mod backup;
pub mod loader;
pub mod reader;
pub mod worker;
