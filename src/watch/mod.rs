//! Long-polling views and their supervisor.
//!
//! A View is the polling task and state for one dependency; the Watcher
//! owns the set of Views, multiplexing their updates onto one data
//! channel and their unrecoverable errors onto one error channel.

mod vault_token;
mod view;
mod watcher;

pub use vault_token::*;
pub use view::{ViewConfig, ViewError, ViewUpdate};
pub use watcher::*;

#[cfg(test)]
mod watcher_test;
