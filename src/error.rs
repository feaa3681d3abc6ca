use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("FIXTURE_UNAVAILABLE: Database fixture could not be provisioned: {0}")]
    FixtureUnavailable(String),

    #[error("CONTAINER_FAILED: Container engine command failed: {0}")]
    Container(String),

    #[error("PROCESS_SPAWN_FAILED: Could not start '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("PROCESS_TIMEOUT: '{program}' did not finish within {timeout_ms}ms")]
    ProcessTimeout { program: String, timeout_ms: u64 },

    #[error("PROMPT_TIMEOUT: Waited {timeout_ms}ms for prompt '{expect}'")]
    PromptTimeout { expect: String, timeout_ms: u64 },

    #[error("PROMPT_CLOSED: Process output ended before prompt '{0}' appeared")]
    PromptClosed(String),

    #[error("ASSERTION_FAILED: {0}")]
    Assertion(String),

    #[error("INVALID_SCENARIO: {path}: {reason}")]
    InvalidScenario { path: String, reason: String },

    #[error("USAGE: {0}")]
    Usage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
