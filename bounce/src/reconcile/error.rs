use std::{any::Any, io, path::PathBuf, result};

use advisory_lock::FileLockError;
use thiserror::Error;

use crate::{AnyBoxedError, AnyError};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open reconciliation lock file at {1}")]
    OpenLockFileError(#[source] io::Error, PathBuf),
    #[error("cannot take reconciliation lock file at {1}")]
    LockFileError(#[source] FileLockError, PathBuf),
    #[error("cannot release reconciliation lock file at {1}")]
    UnlockFileError(#[source] FileLockError, PathBuf),
}

impl AnyError for Error {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<Error> for AnyBoxedError {
    fn from(err: Error) -> Self {
        Box::new(err)
    }
}
