//! CLI command implementations.
//!
//! # Command Modules
//!
//! - [`build`] - Build a cube (main command)
//! - [`worker`] - Handle one chunk request on stdin
//! - [`serve`] - HTTP function service
//! - [`config`] - Inspect configuration

pub mod build;
pub mod common;
pub mod config;
pub mod serve;
pub mod worker;

/// How a command finished, mapped to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Everything succeeded.
    Complete,
    /// The command ran to the end, but some chunks failed or the commit
    /// was withheld.
    Partial,
}

impl Completion {
    pub fn exit_code(self) -> i32 {
        match self {
            Completion::Complete => 0,
            Completion::Partial => 2,
        }
    }
}
