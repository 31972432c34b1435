#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed with status {status}: {body}")]
    Request { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported provider: {0}")]
    Unsupported(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings io error: {0}")]
    Io(String),

    #[error("settings parse error: {0}")]
    Parse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("no execution target could be resolved")]
    TargetMissing,

    #[error("command execution failed: {0}")]
    Execution(String),

    #[error("no response from execution environment")]
    NoResponse,

    #[error("session is busy with another request")]
    SessionBusy,
}
