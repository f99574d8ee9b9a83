mod loader;
mod types;
mod validator;

pub use loader::load_from_path;
pub use types::{Config, InterfaceSelection, LoggingConfig, OutputConfig};
pub use validator::validate;
