//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - Short-lived helper commands with error handling
//! - `shell` - Shell escaping and quoting

pub mod command;
pub mod shell;
