pub mod error;
pub mod types;

pub use error::{Error, ExecutionError, Result};
pub use types::Version;
