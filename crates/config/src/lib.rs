pub mod env;
pub mod tracing_init;

pub use env::{AppConfig, DaemonConfig, ScheduleConfig};
pub use tracing_init::init_tracing;
