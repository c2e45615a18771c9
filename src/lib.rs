//! Remote-control harness for gVim.
//!
//! Launches one gVim under a unique server name, talks to it over the
//! `--remote-send` / `--remote-expr` channel, types into its window, and
//! verifies the console script by polling the buffer until it settles.

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod keys;
pub mod locate;
pub mod log;
pub mod poll;
pub mod report;
pub mod session;
pub mod snapshot;
pub mod verify;
