use std::fmt;

/// Error type returned across the storage boundary.
///
/// Each variant carries a unique numeric code so that callers (and the
/// session layer in particular) can decide between aborting the statement,
/// aborting the transaction or surfacing the failure to the client.
#[derive(Debug)]
pub enum Error {
    /// I/O-related error (e.g., file operations).
    /// Error code: 1000
    Io(std::io::Error),
    /// No such table, schema or transaction.
    /// Error code: 2000
    NotFound(String),
    /// Table or schema already exists.
    /// Error code: 2100
    AlreadyExists(String),
    /// The table is read-only.
    /// Error code: 2200
    ReadOnly(String),
    /// The engine does not support the requested operation.
    /// Error code: 2300
    Unsupported(String),
    /// Generic engine failure with an engine-specific message.
    /// Error code: 2400
    Engine(String),
    /// Lock wait timed out; the current statement is rolled back.
    /// Error code: 4000
    LockWaitTimeout(String),
    /// Deadlock detected; the whole transaction is rolled back.
    /// Error code: 4100
    Deadlock(String),
    /// Transaction state machine misuse (unknown savepoint, commit while
    /// prepared, ...).
    /// Error code: 4200
    Transaction(String),
    /// The session was killed by another thread.
    /// Error code: 4300
    Killed(String),
    /// Schema-related error (e.g., invalid column).
    /// Error code: 5000
    Schema(String),
    /// Value or row encoding error.
    /// Error code: 6000
    Encoding(String),
    /// A persisted record was found but could not be decoded.
    /// Error code: 6100
    Corrupt(String),
    /// Miscellaneous uncategorized error.
    /// Error code: 9000
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// How much work a failed operation forces the session to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackScope {
    None,
    Statement,
    Transaction,
}

impl Error {
    /// Returns the error code associated with this error variant.
    ///
    /// # Examples
    /// ```
    /// use tablekit::errors::Error;
    /// let err = Error::NotFound("Table 'test.t1' doesn't exist".to_string());
    /// assert_eq!(err.code(), 2000);
    /// ```
    pub fn code(&self) -> u32 {
        match self {
            Error::Io(_) => 1000,
            Error::NotFound(_) => 2000,
            Error::AlreadyExists(_) => 2100,
            Error::ReadOnly(_) => 2200,
            Error::Unsupported(_) => 2300,
            Error::Engine(_) => 2400,
            Error::LockWaitTimeout(_) => 4000,
            Error::Deadlock(_) => 4100,
            Error::Transaction(_) => 4200,
            Error::Killed(_) => 4300,
            Error::Schema(_) => 5000,
            Error::Encoding(_) => 6000,
            Error::Corrupt(_) => 6100,
            Error::Other(_) => 9000,
        }
    }

    /// Returns a human-readable error category for this error variant.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "I/O",
            Error::NotFound(_) => "Not Found",
            Error::AlreadyExists(_) => "Already Exists",
            Error::ReadOnly(_) => "Read Only",
            Error::Unsupported(_) => "Unsupported",
            Error::Engine(_) => "Engine",
            Error::LockWaitTimeout(_) => "Lock Wait Timeout",
            Error::Deadlock(_) => "Deadlock",
            Error::Transaction(_) => "Transaction",
            Error::Killed(_) => "Killed",
            Error::Schema(_) => "Schema",
            Error::Encoding(_) => "Encoding",
            Error::Corrupt(_) => "Corrupt",
            Error::Other(_) => "Other",
        }
    }

    /// Returns what the session must roll back after this error.
    pub fn rollback_scope(&self) -> RollbackScope {
        match self {
            Error::LockWaitTimeout(_) => RollbackScope::Statement,
            Error::Deadlock(_) | Error::Killed(_) => RollbackScope::Transaction,
            _ => RollbackScope::None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "[{}] I/O Error: {}", self.code(), e),
            Error::NotFound(msg)
            | Error::AlreadyExists(msg)
            | Error::ReadOnly(msg)
            | Error::Unsupported(msg)
            | Error::Engine(msg)
            | Error::LockWaitTimeout(msg)
            | Error::Deadlock(msg)
            | Error::Transaction(msg)
            | Error::Killed(msg)
            | Error::Schema(msg)
            | Error::Encoding(msg)
            | Error::Corrupt(msg) => {
                write!(f, "[{}] {} Error: {}", self.code(), self.category(), msg)
            }
            Error::Other(msg) => write!(f, "[{}] Unknown Error: {}", self.code(), msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Encoding(format!("UTF-8 conversion error: {}", err))
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::Encoding(format!("Integer parsing error: {}", err))
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(err: bincode::error::EncodeError) -> Self {
        Error::Encoding(format!("Failed to encode record. {}", err))
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(err: bincode::error::DecodeError) -> Self {
        Error::Corrupt(format!("Failed to decode record. {}", err))
    }
}

/// Convenience macro to create an `Error` with a formatted message.
///
/// # Examples
/// ```
/// use tablekit::err;
/// let err = err!(NotFound, "Unknown table '{}'", "t1");
/// assert_eq!(err.code(), 2000);
/// assert_eq!(err.to_string(), "[2000] Not Found Error: Unknown table 't1'");
/// ```
#[macro_export]
macro_rules! err {
    ($variant:ident, $msg:expr) => {
        $crate::errors::Error::$variant($msg.to_string())
    };
    ($variant:ident, $fmt:expr, $($arg:tt)*) => {
        $crate::errors::Error::$variant(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_and_display() {
        let err = Error::Schema("Duplicate column".to_string());
        assert_eq!(err.code(), 5000);
        assert_eq!(err.to_string(), "[5000] Schema Error: Duplicate column");
        assert_eq!(err.category(), "Schema");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err = Error::from(io_err);
        assert_eq!(err.code(), 1000);
        assert_eq!(err.to_string(), "[1000] I/O Error: File not found");
    }

    #[test]
    fn test_error_macro() {
        let err = err!(Deadlock, "Deadlock found when trying to get lock");
        assert_eq!(err.code(), 4100);
        assert_eq!(
            err.to_string(),
            "[4100] Deadlock Error: Deadlock found when trying to get lock"
        );

        let err = err!(Engine, "tablespace: {}", "out of space");
        assert_eq!(err.code(), 2400);
        assert_eq!(err.to_string(), "[2400] Engine Error: tablespace: out of space");
    }

    #[test]
    fn test_rollback_scope() {
        assert_eq!(
            err!(LockWaitTimeout, "row").rollback_scope(),
            RollbackScope::Statement
        );
        assert_eq!(
            err!(Deadlock, "cycle").rollback_scope(),
            RollbackScope::Transaction
        );
        assert_eq!(err!(Killed, "kill").rollback_scope(), RollbackScope::Transaction);
        assert_eq!(err!(NotFound, "t").rollback_scope(), RollbackScope::None);
    }
}
