use thiserror::Error;

/// Malformed numeric input for a simulation parameter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("invalid base wait {0:?}: expected a positive number of seconds")]
    BaseWait(String),
    #[error("invalid client count {0:?}: expected a positive integer")]
    Clients(String),
    #[error("invalid max attempts {0:?}: expected an integer")]
    MaxAttempts(String),
}

impl InputError {
    pub fn field(&self) -> &'static str {
        match self {
            InputError::BaseWait(_) => "base_wait",
            InputError::Clients(_) => "clients",
            InputError::MaxAttempts(_) => "max_attempts",
        }
    }
}

/// Command issued to a [`Session`](crate::session::Session) in the wrong state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("a run is already in progress")]
    AlreadyRunning,
    #[error("no run in progress")]
    NotRunning,
    #[error("run worker failed: {0}")]
    Worker(String),
}
