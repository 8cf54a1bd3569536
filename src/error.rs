//! Error types shared by every stage of the scan pipeline.
//!
//! The variants fall into four groups:
//!
//! - **Transport**: registry and package API failures (`Http`, `Status`, `Decode`, `Archive`).
//!   Always fatal, never retried.
//! - **Scanner**: the external scanner could not be run or kept failing (`Spawn`, `ScanFailed`).
//! - **Reports**: vulnerability reports that cannot be read or are internally inconsistent.
//! - **Policy**: failures the caller opted into (`DifferentImages`, `NewVulnerabilities`).

use std::path::PathBuf;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("unexpected status code {status} from {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to extract archive from {url}: {source}")]
    Archive {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("scan failed for {args:?}")]
    ScanFailed { args: Vec<String> },

    #[error("output directory not specified")]
    OutputDirMissing,

    #[error("no SBOM files to scan in {}", dir.display())]
    NoSboms { dir: PathBuf },

    #[error("failed to parse report {}: {source}", path.display())]
    ReportParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed report {}: {reason}", path.display())]
    MalformedReport { path: PathBuf, reason: String },

    #[error("vulnerability not found: {0}")]
    MissingVulnerability(String),

    #[error("invalid build manifest {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },

    #[error("invalid release config {}: {reason}", path.display())]
    ReleaseConfig { path: PathBuf, reason: String },

    #[error("release lookup for {repository} failed: {reason}")]
    ReleaseLookup { repository: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("these scans are not for the same image: {base} vs {new}")]
    DifferentImages { base: String, new: String },

    #[error("new vulnerabilities found in the new scan compared to the base scan ({0} new)")]
    NewVulnerabilities(usize),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = Error::ScanFailed {
            args: vec!["--file".into(), "out.json".into()],
        };
        assert!(err.to_string().contains("out.json"));

        let err = Error::DifferentImages {
            base: "alpine".into(),
            new: "busybox".into(),
        };
        assert!(err
            .to_string()
            .contains("these scans are not for the same image"));
    }
}
