pub mod handler;
pub mod registry;

pub use handler::{ToolDef, ToolHandler, ToolOutput};
pub use registry::ToolRegistry;
