//! # POP3 session
//!
//! Module dedicated to the POP3 mailbox session. The bounce mailbox
//! is a plain drop box that every reconciliation pass drains, which
//! is exactly the POP3 model: list, download, delete, quit.

pub mod error;

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::{
    client::TlsStream,
    rustls::{pki_types::ServerName, ClientConfig, RootCertStore},
    TlsConnector,
};
use tracing::{debug, trace};

use crate::{
    mailbox::{config::MailboxConfig, MailboxMessage, MailboxSession},
    AnyResult,
};

#[doc(inline)]
pub use self::error::{Error, Result};

/// Native certificates store, used by the TLS handshake.
static ROOT_CERT_STORE: Lazy<RootCertStore> = Lazy::new(|| {
    let mut store = RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().unwrap() {
        store.add(cert).unwrap();
    }
    store
});

/// Wrapper around TLS and TCP streams.
///
/// Since the session needs a single stream type, this wrapper unifies
/// both kinds behind one pair of [`AsyncRead`] and [`AsyncWrite`]
/// implementations.
#[derive(Debug)]
pub enum Pop3Stream {
    Tls(Box<TlsStream<TcpStream>>),
    Tcp(TcpStream),
}

impl AsyncRead for Pop3Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Pop3Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// The POP3 mailbox session.
///
/// The session wraps one buffered connection to the POP3 server.
/// Deletions requested with [`Pop3Session::dele`] are only committed
/// by the server when [`Pop3Session::quit`] is sent, so a session
/// dropped without quitting rolls everything back.
#[derive(Debug)]
pub struct Pop3Session {
    stream: BufStream<Pop3Stream>,
}

impl Pop3Session {
    /// Connect to the POP3 server using the given configuration, then
    /// authenticate with its login and password.
    pub async fn connect(config: &MailboxConfig) -> Result<Self> {
        let host = config.host.as_str();
        let port = config.port;

        debug!("connecting to pop3 server {host}:{port}");
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|err| Error::ConnectError(err, host.to_owned(), port))?;

        let stream = if config.is_encryption_enabled() {
            debug!("starting tls handshake with {host}");
            let tls_config = Arc::new(
                ClientConfig::builder()
                    .with_root_certificates(ROOT_CERT_STORE.clone())
                    .with_no_client_auth(),
            );
            let server_name = ServerName::try_from(host.to_owned())
                .map_err(|_| Error::ParseServerNameError(host.to_owned()))?;
            let tls = TlsConnector::from(tls_config)
                .connect(server_name, tcp)
                .await
                .map_err(|err| Error::ConnectTlsError(err, host.to_owned(), port))?;
            Pop3Stream::Tls(Box::new(tls))
        } else {
            Pop3Stream::Tcp(tcp)
        };

        let mut session = Self {
            stream: BufStream::new(stream),
        };

        session.read_response().await?;
        session.execute(&format!("USER {}", config.login)).await?;
        session.execute(&format!("PASS {}", config.passwd)).await?;
        debug!("authenticated to pop3 server {host}:{port}");

        Ok(session)
    }

    /// List the unique identifier of every message in the mailbox.
    pub async fn uidl(&mut self) -> Result<Vec<MailboxMessage>> {
        self.execute("UIDL").await?;
        let body = self.read_multiline().await?;
        let body = String::from_utf8_lossy(&body);

        let mut messages = Vec::new();
        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (sequence_id, uid) = line
                .split_once(' ')
                .ok_or_else(|| Error::ParseListingLineError(line.to_owned()))?;
            let sequence_id = sequence_id
                .parse()
                .map_err(|_| Error::ParseListingLineError(line.to_owned()))?;
            messages.push(MailboxMessage {
                uid: uid.trim().to_owned(),
                sequence_id,
            });
        }

        Ok(messages)
    }

    /// Download the full raw content of the given message.
    pub async fn retr(&mut self, sequence_id: u32) -> Result<Vec<u8>> {
        self.execute(&format!("RETR {sequence_id}")).await?;
        self.read_multiline().await
    }

    /// Mark the given message as deleted.
    pub async fn dele(&mut self, sequence_id: u32) -> Result<()> {
        self.execute(&format!("DELE {sequence_id}")).await?;
        Ok(())
    }

    /// End the session, committing pending deletions server side.
    pub async fn quit(&mut self) -> Result<()> {
        self.execute("QUIT").await?;
        Ok(())
    }

    /// Send the given command then expect a positive status line.
    async fn execute(&mut self, command: &str) -> Result<String> {
        self.write_command(command).await?;
        self.read_response().await
    }

    async fn write_command(&mut self, command: &str) -> Result<()> {
        // passwords do not belong to logs
        let loggable = match command.split_once(' ') {
            Some(("PASS", _)) => "PASS ****",
            _ => command,
        };
        trace!("C: {loggable}");

        let write = async {
            self.stream.write_all(command.as_bytes()).await?;
            self.stream.write_all(b"\r\n").await?;
            self.stream.flush().await
        };

        write
            .await
            .map_err(|err| Error::WriteCommandError(err, loggable.to_owned()))
    }

    /// Read a single status line, expecting `+OK`.
    async fn read_response(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self
            .stream
            .read_line(&mut line)
            .await
            .map_err(Error::ReadResponseError)?;
        if n == 0 {
            return Err(Error::DisconnectedError);
        }

        let line = line.trim_end();
        trace!("S: {line}");

        match line.strip_prefix("+OK") {
            Some(status) => Ok(status.trim().to_owned()),
            None => {
                let status = line.strip_prefix("-ERR").unwrap_or(line).trim();
                Err(Error::ResponseError(status.to_owned()))
            }
        }
    }

    /// Read a dot-terminated multiline body, undoing dot-stuffing.
    async fn read_multiline(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            let n = self
                .stream
                .read_until(b'\n', &mut line)
                .await
                .map_err(Error::ReadResponseError)?;
            if n == 0 {
                return Err(Error::DisconnectedError);
            }
            if line == b".\r\n" || line == b".\n" {
                break;
            }
            let unstuffed = line.strip_prefix(b".").unwrap_or(&line);
            body.extend_from_slice(unstuffed);
        }

        Ok(body)
    }
}

#[async_trait]
impl MailboxSession for Pop3Session {
    async fn list(&mut self) -> AnyResult<Vec<MailboxMessage>> {
        Ok(self.uidl().await?)
    }

    async fn retrieve(&mut self, sequence_id: u32) -> AnyResult<Vec<u8>> {
        Ok(self.retr(sequence_id).await?)
    }

    async fn delete(&mut self, sequence_id: u32) -> AnyResult<()> {
        Ok(self.dele(sequence_id).await?)
    }

    async fn close(&mut self) -> AnyResult<()> {
        Ok(self.quit().await?)
    }
}
