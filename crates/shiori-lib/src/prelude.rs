pub use crate::error::Error;
pub use crate::models::*;
pub use crate::traits::{HttpSource, Source};
