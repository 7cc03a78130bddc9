pub mod config;
pub mod config_loader;
pub mod error;
pub mod interrupt;
pub mod retry;
pub mod traits;
pub mod variant;

pub use config::*;
pub use config_loader::{CliOverrides, ConfigLoadOptions, ConfigLoader};
pub use error::*;
pub use interrupt::{InterruptLatch, install_interrupt_handler};
pub use retry::*;
pub use traits::*;
pub use variant::*;
