/// Categories of errors for classification and handling.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad configuration, needs user fix
    Configuration,

    /// Invalid input, user error
    Validation,

    /// Resource missing
    NotFound,

    /// Resource exists or is locked
    Conflict,

    /// Network/IO errors, retry possible
    Temporary,

    /// Bugs, system errors
    Internal,
}

impl ErrorKind {
    /// Whether an operation that failed with this kind may succeed if retried.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Temporary)
    }

    /// Process exit code for this error category (sysexits.h).
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Configuration => 78, // EX_CONFIG
            Self::Validation => 65,    // EX_DATAERR
            Self::Temporary => 75,     // EX_TEMPFAIL
            Self::NotFound => 66,      // EX_NOINPUT
            Self::Conflict | Self::Internal => 70,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_temporary_is_retryable() {
        assert!(ErrorKind::Temporary.is_retryable());
        for kind in [
            ErrorKind::Configuration,
            ErrorKind::Validation,
            ErrorKind::NotFound,
            ErrorKind::Conflict,
            ErrorKind::Internal,
        ] {
            assert!(!kind.is_retryable(), "{kind:?}");
        }
    }
}
