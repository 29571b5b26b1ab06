use fleetwatch_core::Imo;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("vessel not found: imo {0}")]
    NotFound(Imo),

    #[error("duplicate vessel in seed data: imo {0}")]
    DuplicateImo(Imo),

    #[error("IO error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl StoreError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::DuplicateImo(_) => "duplicate_imo",
            Self::Io(_) => "io",
            Self::Parse(_) => "parse",
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Parse(e.to_string())
    }
}
