//! Tool system for function calling.

pub mod arguments;
pub mod set;
pub mod tool;
pub mod types;

pub use arguments::ToolArguments;
pub use set::ToolSet;
pub use tool::{AgentTool, Tool, ToolExecutionContext};
pub use types::{ParameterBuilder, ToolParameters};
