use thiserror::Error;

#[derive(Error, Debug)]
pub enum MiriadError {
    /// A storage operation reported a nonzero status. Carries the numeric
    /// code (the OS errno where one exists) and a human-readable reason.
    #[error("I/O fault (status {code}): {reason}")]
    IoFault { code: i32, reason: String },

    /// A caller-supplied argument failed a precondition. Raised before any
    /// storage operation is attempted, so there are no partial side effects.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("buffer too small: need {needed} elements, have {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    /// An optional capability is absent from this build. Callers can detect
    /// this ahead of time through the matching probe operation.
    #[error("not supported in this build: {0}")]
    NotSupported(&'static str),
}

impl MiriadError {
    pub(crate) fn fault(reason: impl Into<String>) -> Self {
        MiriadError::IoFault {
            code: -1,
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        MiriadError::Validation(reason.into())
    }
}

impl From<std::io::Error> for MiriadError {
    fn from(err: std::io::Error) -> Self {
        MiriadError::IoFault {
            code: err.raw_os_error().unwrap_or(-1),
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MiriadError>;
