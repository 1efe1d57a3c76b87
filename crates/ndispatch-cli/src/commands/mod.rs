//! CLI commands.

pub mod benchmark;
pub mod info;
pub mod validate;
