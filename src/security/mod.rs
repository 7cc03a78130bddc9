pub mod command_executor;

pub use command_executor::{CommandError, DEFAULT_ALLOWED_COMMANDS, SafeCommandExecutor};
