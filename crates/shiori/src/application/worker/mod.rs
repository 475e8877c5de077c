pub mod backup;
pub mod downloads;
pub mod tracking;
