//! Hosted inference backend: platform coordinates, auth, and the Gemini client.

pub mod auth;
pub mod error;
pub mod gemini;
pub mod platform;
pub mod schema;

pub use auth::*;
pub use error::*;
pub use gemini::*;
pub use platform::*;
pub use schema::*;
