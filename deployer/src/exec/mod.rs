//! External command execution

pub mod process;
