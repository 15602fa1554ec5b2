use std::fmt;

/// Status kinds returned by public operations, per the error taxonomy in
/// the design: bad parameters are the caller's bug, out-of-memory and
/// not-found are ordinary runtime outcomes, object-in-use doubles as the
/// internal "restart from root" signal (callers never observe it), and
/// unsafe-operation/file-error cover structural and I/O failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    BadParameters(String),
    OutOfMemory(String),
    NotFound(String),
    ObjectInUse(String),
    OperationFailed(String),
    UnsafeOperation(String),
    FileError(String),
}

impl StatusError {
    pub fn bad_parameters(msg: impl Into<String>) -> Self {
        StatusError::BadParameters(msg.into())
    }

    pub fn out_of_memory(msg: impl Into<String>) -> Self {
        StatusError::OutOfMemory(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        StatusError::NotFound(msg.into())
    }

    pub fn object_in_use(msg: impl Into<String>) -> Self {
        StatusError::ObjectInUse(msg.into())
    }

    pub fn operation_failed(msg: impl Into<String>) -> Self {
        StatusError::OperationFailed(msg.into())
    }

    pub fn unsafe_operation(msg: impl Into<String>) -> Self {
        StatusError::UnsafeOperation(msg.into())
    }

    pub fn file_error(msg: impl Into<String>) -> Self {
        StatusError::FileError(msg.into())
    }

    /// True for the internal "contended, caller must restart" signal.
    pub fn is_contention(&self) -> bool {
        matches!(self, StatusError::ObjectInUse(_))
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusError::BadParameters(m) => write!(f, "bad parameters: {}", m),
            StatusError::OutOfMemory(m) => write!(f, "out of memory: {}", m),
            StatusError::NotFound(m) => write!(f, "not found: {}", m),
            StatusError::ObjectInUse(m) => write!(f, "object in use: {}", m),
            StatusError::OperationFailed(m) => write!(f, "operation failed: {}", m),
            StatusError::UnsafeOperation(m) => write!(f, "unsafe operation: {}", m),
            StatusError::FileError(m) => write!(f, "file error: {}", m),
        }
    }
}

impl std::error::Error for StatusError {}

impl From<std::io::Error> for StatusError {
    fn from(e: std::io::Error) -> Self {
        StatusError::FileError(e.to_string())
    }
}

pub type CrabResult<T> = Result<T, StatusError>;
