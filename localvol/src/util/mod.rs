//! Small shared helpers: tool execution, retry, size literals.

pub mod process;
pub mod retry;
pub mod size;

pub use process::{CommandRunner, SystemRunner, ToolCommand, ToolOutput};
pub use retry::RetryPolicy;
pub use size::parse_size;
