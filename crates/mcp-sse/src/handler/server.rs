//! Route tables used by [`Server`](crate::service::Server).
//!
//! Each capability keeps its own router keyed by name (or uri for
//! resources). Handlers are boxed async closures so a server can be
//! assembled at runtime without macros.
pub mod common;
pub mod prompt;
pub mod resource;
pub mod tool;

pub use common::schema_for_type;
pub use prompt::{PromptContext, PromptRoute, PromptRouter};
pub use resource::{ReadResourceContext, ResourceRoute, ResourceRouter};
pub use tool::{ToolCallContext, ToolRoute, ToolRouter};
