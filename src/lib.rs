//! templar: a long-running configuration renderer.
//!
//! Watches keys, services and secrets exposed by Consul-style and
//! Vault-style backends and keeps text templates continuously rendered
//! against the latest observed values. Backends are injected as trait
//! objects; embedders wire their own clients into a [`ClientSet`] and
//! hand it to a [`Runner`].

mod brain;
mod clients;
mod config;
pub mod constants;
mod dependency;
mod errors;
mod renderer;
mod runner;
mod template;
mod watch;

pub use self::brain::*;
pub use self::clients::*;
pub use self::config::*;
pub use self::dependency::*;
pub use self::errors::*;
pub use self::renderer::*;
pub use self::runner::*;
pub use self::template::*;
pub use self::watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
