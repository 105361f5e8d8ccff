//! The SQL-analysis agent: its definition, prompt, and conversation loop.

pub mod definition;
pub mod instruction;
pub mod runner;

pub use definition::*;
pub use runner::*;
