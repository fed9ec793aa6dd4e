use std::{any::Any, io, result};

use thiserror::Error;

use crate::{AnyBoxedError, AnyError};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot connect to pop3 server {1}:{2}")]
    ConnectError(#[source] io::Error, String, u16),
    #[error("cannot parse pop3 server name {0}")]
    ParseServerNameError(String),
    #[error("cannot connect to pop3 server {1}:{2} using tls")]
    ConnectTlsError(#[source] io::Error, String, u16),
    #[error("cannot write pop3 command {1}")]
    WriteCommandError(#[source] io::Error, String),
    #[error("cannot read pop3 server response")]
    ReadResponseError(#[source] io::Error),
    #[error("pop3 server closed the connection")]
    DisconnectedError,
    #[error("pop3 server returned an error: {0}")]
    ResponseError(String),
    #[error("cannot parse pop3 listing line {0}")]
    ParseListingLineError(String),
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
