use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin '{0}' failed validation and cannot be enabled")]
    PluginRejected(String),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("command '{0}' is already running")]
    CommandBusy(String),

    #[error("panel not found: {0}")]
    PanelNotFound(String),

    #[error("invalid key combination: {0}")]
    InvalidKeys(String),

    #[error("entry '{0}' is already exported by the plugin's manifest")]
    EntryConflict(String),

    #[error("capability handle for plugin '{0}' is no longer valid")]
    HandleRevoked(String),
}

pub type HostResult<T> = std::result::Result<T, HostError>;
