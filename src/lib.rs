//! Named MariaDB service instances.
//!
//! A service is either internal (a container this crate creates, with
//! filesystem or volume storage) or external (an existing server reached
//! by host name). Services are registered in a JSON config store; one of
//! them may be the default used when no name is given.
//!
//! - [`store`]: the persisted registry and default pointer
//! - [`lifecycle`]: pull, provision, create, start, stop, destroy
//! - [`admin`]: the shared phpMyAdmin container listing every service
//! - [`pipeline`]: shell, dump, backup and restore over exec streams

pub mod admin;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod prompt;
pub mod runtime;
pub mod service;
pub mod store;
pub mod testing;

pub use config::AppConfig;
pub use error::{ConfigError, PromptError, Result, RuntimeError, ServiceError};
