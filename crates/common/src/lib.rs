pub mod error;

pub use error::{TidemarkError, TidemarkResult};
