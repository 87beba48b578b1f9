use std::time::Duration;

use thiserror::Error;

/// Failures while pulling image bytes out of the container engine.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Engine responded with status code {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Unsupported engine endpoint: {0}")]
    UnsupportedEndpoint(String),

    #[error("Engine did not respond within {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Acquisition cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Archive format error: {0}")]
    ArchiveFormat(String),

    #[error("Data consistency error: {0}")]
    DataConsistency(String),

    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`ImageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Acquisition,
    ArchiveFormat,
    DataConsistency,
    Reconciliation,
    Cancelled,
    Io,
}

impl ImageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImageError::Acquisition(AcquisitionError::Cancelled) => ErrorKind::Cancelled,
            ImageError::Acquisition(_) => ErrorKind::Acquisition,
            ImageError::ArchiveFormat(_) => ErrorKind::ArchiveFormat,
            ImageError::DataConsistency(_) => ErrorKind::DataConsistency,
            ImageError::Reconciliation(_) => ErrorKind::Reconciliation,
            ImageError::Cancelled => ErrorKind::Cancelled,
            ImageError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn archive(context: &str, err: impl std::fmt::Display) -> Self {
        ImageError::ArchiveFormat(format!("{context}: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, ImageError>;
