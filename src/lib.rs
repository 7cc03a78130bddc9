pub mod build;
pub mod core;
pub mod orchestration;
pub mod plugins;
pub mod security;

#[cfg(test)]
mod test_support;

pub use crate::core::*;
pub use security::{CommandError, SafeCommandExecutor};
