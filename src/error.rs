use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    #[error("invalid month: {0} (expected 1-12)")]
    InvalidMonth(String),

    #[error("missing config file era5-fetch.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("no area configured: set `area` or `turbine_registry`")]
    MissingArea,

    #[error("failed to read turbine registry at {path}: {message}")]
    RegistryRead { path: PathBuf, message: String },

    #[error("turbine registry has no usable coordinates: {0}")]
    EmptyRegistry(PathBuf),

    #[error("no CDS API credentials found (CDSAPI_URL/CDSAPI_KEY or ~/.cdsapirc)")]
    MissingCredentials,

    #[error("invalid CDS API credentials: {0}")]
    InvalidCredentials(String),

    #[error("CDS request failed: {0}")]
    CdsHttp(String),

    #[error("CDS returned status {status}: {message}")]
    CdsStatus { status: u16, message: String },

    #[error("CDS request {request_id} failed: {message}")]
    RemoteFailed { request_id: String, message: String },

    #[error("unexpected CDS reply: {0}")]
    UnexpectedReply(String),

    #[error("download failed: downloaded {written} byte(s) out of {expected}")]
    SizeMismatch { written: u64, expected: u64 },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
