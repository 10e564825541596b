use serde::{Deserialize, Serialize};

/// Classification of every failure the cart core can report.
///
/// Transport layers map on this value alone, so the set is closed: storage
/// and service errors each expose a `kind()` returning one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The targeted cart does not exist.
    NotFound,
    /// The request was rejected before any work was done (e.g. zero quantity).
    Validation,
    /// The caller's cancellation signal or deadline fired before completion.
    Cancelled,
    /// Store connectivity, transaction or encoding failure.
    Internal,
}

impl ErrorKind {
    /// Short lowercase label, used for metric labels and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
