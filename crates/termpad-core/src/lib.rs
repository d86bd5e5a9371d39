pub mod ai;
pub mod api;
pub mod contribution;
pub mod discovery;
pub mod editor;
pub mod error;
pub mod host;
pub mod keybind;
pub mod plugin;
pub mod settings;
pub mod store;
pub mod validator;

pub use api::PluginApi;
pub use error::{HostError, HostResult};
pub use host::{PluginHost, PluginHostState};
pub use plugin::{EntryTable, PluginCandidate};
