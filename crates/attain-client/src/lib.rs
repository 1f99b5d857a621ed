//! attain-client: grading backends for attain.
//!
//! [`HttpBackend`] talks to the grading server over REST.
//! [`InMemoryBackend`] keeps the same rules in memory for tests and demos.

pub mod config;
pub mod http;
pub mod memory;

pub use config::{create_backend, load_config, load_config_from, AttainConfig};
pub use http::HttpBackend;
pub use memory::InMemoryBackend;
