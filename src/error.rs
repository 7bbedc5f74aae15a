use std::{
    io,
    path::{Path, PathBuf},
};

pub type Result<T, E = LsError> = std::result::Result<T, E>;

/// Various error types for the language-server core.
#[derive(Debug, thiserror::Error)]
pub enum LsError {
    #[error(transparent)]
    Io(#[from] LsIoError),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error("circular dependencies: {0:?}")]
    CyclicDependency(Vec<Vec<String>>),
    #[error("unknown package \"{0}\"")]
    UnknownPackage(String),
    #[error("file \"{}\" does not belong to the workspace", .0.display())]
    UnknownFile(PathBuf),
    #[error("package \"{0}\" redefines \"{1}\"")]
    PackageRedefinition(String, String),
    #[error("workspace descriptor is invalid: {0}")]
    InvalidDescriptor(String),
    #[error("{0}")]
    Message(String),
}

impl LsError {
    pub fn io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        LsIoError::new(err, path).into()
    }

    pub(crate) fn msg(msg: impl std::fmt::Display) -> Self {
        LsError::Message(msg.to_string())
    }
}

/// An `io::Error` paired with the path that produced it.
#[derive(Debug, thiserror::Error)]
#[error("\"{}\": {io}", .path.display())]
pub struct LsIoError {
    io: io::Error,
    path: PathBuf,
}

impl LsIoError {
    pub fn new(io: io::Error, path: impl Into<PathBuf>) -> Self {
        Self { io, path: path.into() }
    }

    /// The path at which the error occurred.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying `io::Error`.
    pub fn io_error(&self) -> &io::Error {
        &self.io
    }
}

impl From<LsIoError> for io::Error {
    fn from(err: LsIoError) -> Self {
        err.io
    }
}
