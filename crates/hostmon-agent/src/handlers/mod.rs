//! Built-in command handlers.

pub mod ssh_key;
