use thiserror::Error;

/// Fatal startup configuration problems.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set (environment, .env or config file)")]
    Missing(&'static str),

    #[error("assistant id {0:?} is invalid: it must start with \"asst_\"")]
    InvalidAssistantId(String),
}
