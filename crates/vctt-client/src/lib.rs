pub mod backend;
pub mod config;
mod config_env;
pub mod models;
pub mod phase_stream;
pub mod polling;
pub mod progress;
pub mod session;

pub use backend::{BackendError, HttpBackend, MockBackend, VcttBackend, connect_backend};
pub use config::{ClientConfig, ConfigError};
pub use session::SessionStore;
