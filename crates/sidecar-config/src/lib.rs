//! Sidecar settings system.
//!
//! Settings are stored as TOML on disk and deep-merged over built-in
//! defaults on every load, so partial settings files work out of the box.
//! A separate volatile overlay holds ephemeral values that are layered on
//! at read time and never persisted.
//!
//! `SettingsStore::load` never fails: broken or missing storage falls back
//! to defaults with a warning.

pub mod schema;
pub mod store;

pub use schema::Settings;
pub use store::{SettingScope, SettingsStore};
