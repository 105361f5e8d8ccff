//! Tool-server plumbing: stdio launch descriptors, the GitHub connector, and
//! live MCP client sessions.

pub mod github;
pub mod session;
pub mod types;

pub use github::*;
pub use session::*;
pub use types::*;
