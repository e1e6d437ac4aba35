pub mod adapter;
pub mod driver;
pub mod registry;
pub mod subprocess;

pub use adapter::{extract_tool_name, ProtocolAdapter};
pub use driver::{DriverFactory, RuntimeDriver};
pub use registry::RuntimeRegistry;
pub use subprocess::{resolve_placeholders, SubprocessDriver};
