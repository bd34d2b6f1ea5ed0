use thiserror::Error;

/// All errors produced by argus-core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("camera error: {0}")]
    Camera(String),

    #[error("no camera configured")]
    NoCamera,

    #[error("inference engine error: {0}")]
    Inference(String),

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("pipeline is not running")]
    NotRunning,

    #[error("chat server unreachable: {0}")]
    ChatUnreachable(String),

    #[error("chat server exhausted OOM retry ladder")]
    ChatOomExhausted,

    #[error("bridge query queue used before it was set")]
    QueueNotSet,

    #[error("reminder index {0} out of range")]
    ReminderNotFound(usize),

    #[error("state file not found: {path}")]
    StateNotFound { path: std::path::PathBuf },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
