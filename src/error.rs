use thiserror::Error;

/// Errors surfaced by the API connectors.
///
/// Transient transport and rate-limit failures are retried inside the
/// client and only reach callers as `Exhausted`. Validation and other
/// non-transient HTTP failures come back as `Status` on the first attempt.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("request to {url} failed after {attempts} attempts: {message}")]
    Exhausted {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        source: reqwest::Error,
    },

    #[error("unexpected response shape from {url}: {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },

    #[error("invalid API base URL for host '{hostname}': {message}")]
    BadHost { hostname: String, message: String },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The destination rejects duplicate objects with 422; "ensure"
    /// callers treat that as the object already existing.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(422)
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Engine-level error taxonomy.
///
/// `Fatal` aborts the run before any destination writes; everything else
/// is caught at the workspace unit boundary and recorded in the report.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("missing required object: {0}")]
    MissingData(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

pub type MigrateResult<T> = Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_detection() {
        let err = ApiError::Status {
            status: 422,
            url: "https://scalr.example/api/iacp/v3/vars".into(),
            body: "already exists".into(),
        };
        assert!(err.is_conflict());
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_detection() {
        let err = ApiError::Status {
            status: 404,
            url: "https://scalr.example/api/iacp/v3/environments".into(),
            body: "".into(),
        };
        assert!(err.is_not_found());
    }
}
