pub mod exec;
pub mod pattern;

pub use exec::{CommandOutput, Executor, Shell, SystemExecutor};
