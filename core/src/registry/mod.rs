//! Provider and model registry over the SQLite tables, plus resolution of
//! the active chat/embedding selection.

pub mod models;
pub mod providers;
pub mod seed;
pub mod selection;
pub mod types;

pub use selection::{ActiveModel, SELECTION_CATEGORY};
pub use types::{ModelType, Provider, ProviderModel, DEFAULT_PROVIDER_TYPE, PROVIDER_TYPES};
