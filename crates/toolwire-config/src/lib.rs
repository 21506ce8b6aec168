//! Persistent configuration for toolwire.
//!
//! Two concerns live here: the [`ConfigStore`], which owns server
//! configurations, plugin metadata and runtime status on disk, and the
//! layered TOML [`Settings`] that tune invocation limits and timeouts.

pub mod autofill;
pub mod document;
pub mod error;
pub mod settings;
pub mod store;

pub use autofill::display_name_from_id;
pub use document::{ConfigDocument, StatusDocument};
pub use error::{ConfigError, MergeError, StoreError};
pub use settings::{CliOverrides, Settings, SettingsFile, config_dir};
pub use store::{ConfigStore, now_ms};
