pub mod cleanup;
pub mod context;
pub mod device;
pub mod error;
pub mod registry;
pub mod validate;

pub use context::TestContext;
pub use device::{DeviceManager, DiskHandle};
pub use error::TestFailure;
pub use registry::{Registry, RunReport, Runner, TestCase, TestOutcome, TestStatus};
pub use validate::Validator;
