//! Core library for the model provider registry.
//!
//! Modules, leaf first:
//! - [`db`] initialises the SQLite database and applies migrations.
//! - [`errors`] keeps the central error catalogue with human friendly metadata.
//! - [`logging`] writes audit events to the event log table.
//! - [`codec`] encrypts provider API keys at rest.
//! - [`cache`] and [`settings`] persist and memoize key/value settings.
//! - [`registry`] holds provider and model CRUD plus selection resolution.
//! - [`clients`] turns a resolved provider into an API client handle.
//! - [`model_manager`] ties the above together behind one facade.
//! - [`api`] exposes the versioned command surface.

pub mod api;
pub mod cache;
pub mod clients;
pub mod codec;
pub mod db;
pub mod errors;
pub mod logging;
pub mod model_manager;
pub mod registry;
pub mod settings;

pub use errors::{RegistryError, Result};
pub use model_manager::ModelManager;
