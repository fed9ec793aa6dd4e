use std::{collections::HashSet, io, net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::Mutex,
    task::JoinHandle,
};
use tracing::debug;

/// A message sitting in the testing server mailbox.
#[derive(Clone, Debug)]
pub struct TestMessage {
    pub uid: String,
    pub body: String,
    broken: bool,
}

impl TestMessage {
    pub fn new(uid: impl ToString, body: impl ToString) -> Self {
        Self {
            uid: uid.to_string(),
            body: body.to_string(),
            broken: false,
        }
    }

    /// Make the message fail on retrieval, whatever the session.
    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }
}

/// A plain text POP3 server for testing purpose. The port is picked
/// by the system, so multiple servers can be spawned at the same
/// time.
///
/// Sessions follow the POP3 transaction model: deletions are
/// buffered, committed on QUIT and rolled back when the connection
/// drops without one.
pub struct Pop3TestServer {
    addr: SocketAddr,
    mailbox: Arc<Mutex<Vec<TestMessage>>>,
    handle: JoinHandle<()>,
}

impl Pop3TestServer {
    /// Spawn a server without credential checks.
    pub async fn start(messages: Vec<TestMessage>) -> Self {
        Self::spawn(None, messages).await
    }

    /// Spawn a server that only accepts the given credentials.
    pub async fn start_with_credentials(
        user: impl ToString,
        pass: impl ToString,
        messages: Vec<TestMessage>,
    ) -> Self {
        Self::spawn(Some((user.to_string(), pass.to_string())), messages).await
    }

    async fn spawn(credentials: Option<(String, String)>, messages: Vec<TestMessage>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind the bounce testing server");
        let addr = listener
            .local_addr()
            .expect("should get the bounce testing server address");
        let mailbox = Arc::new(Mutex::new(messages));

        let handle = tokio::spawn(serve(listener, mailbox.clone(), credentials));

        Self {
            addr,
            mailbox,
            handle,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// List the uids of the messages still in the mailbox.
    pub async fn remaining_uids(&self) -> Vec<String> {
        let mailbox = self.mailbox.lock().await;
        mailbox.iter().map(|message| message.uid.clone()).collect()
    }

    /// Drop a message into the mailbox, visible to the next session.
    pub async fn push(&self, message: TestMessage) {
        let mut mailbox = self.mailbox.lock().await;
        mailbox.push(message);
    }
}

impl Drop for Pop3TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    listener: TcpListener,
    mailbox: Arc<Mutex<Vec<TestMessage>>>,
    credentials: Option<(String, String)>,
) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                debug!("bounce testing server cannot accept connection: {err}");
                continue;
            }
        };

        let mailbox = mailbox.clone();
        let credentials = credentials.clone();

        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, mailbox, credentials).await {
                debug!("bounce testing server session error: {err}");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    mailbox: Arc<Mutex<Vec<TestMessage>>>,
    credentials: Option<(String, String)>,
) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // the session works on a snapshot, deletions only land in the
    // shared mailbox on QUIT
    let session: Vec<TestMessage> = mailbox.lock().await.clone();
    let mut deleted: HashSet<usize> = HashSet::new();
    let mut user: Option<String> = None;

    reply(&mut writer, "+OK bounce testing server ready").await?;

    loop {
        let Some(line) = read_command(&mut reader).await? else {
            // dropped connection, roll the deletions back
            return Ok(());
        };

        let (verb, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));

        match verb.to_ascii_uppercase().as_str() {
            "USER" => {
                user = Some(arg.to_owned());
                reply(&mut writer, "+OK").await?;
            }
            "PASS" => match &credentials {
                Some((expected_user, expected_pass))
                    if user.as_deref() != Some(expected_user.as_str())
                        || arg != expected_pass =>
                {
                    reply(&mut writer, "-ERR invalid credentials").await?;
                }
                _ => reply(&mut writer, "+OK logged in").await?,
            },
            "STAT" => {
                let count = session.len() - deleted.len();
                let size: usize = session
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| !deleted.contains(&(idx + 1)))
                    .map(|(_, message)| message.body.len())
                    .sum();
                reply(&mut writer, &format!("+OK {count} {size}")).await?;
            }
            "UIDL" => {
                reply(&mut writer, "+OK").await?;
                for (idx, message) in session.iter().enumerate() {
                    if !deleted.contains(&(idx + 1)) {
                        reply(&mut writer, &format!("{} {}", idx + 1, message.uid)).await?;
                    }
                }
                reply(&mut writer, ".").await?;
            }
            "LIST" => {
                reply(&mut writer, "+OK").await?;
                for (idx, message) in session.iter().enumerate() {
                    if !deleted.contains(&(idx + 1)) {
                        reply(&mut writer, &format!("{} {}", idx + 1, message.body.len()))
                            .await?;
                    }
                }
                reply(&mut writer, ".").await?;
            }
            "RETR" => match parse_seq(arg, &session, &deleted) {
                Some(seq) if session[seq - 1].broken => {
                    reply(&mut writer, "-ERR message cannot be read").await?;
                }
                Some(seq) => {
                    let body = dot_stuff(&session[seq - 1].body);
                    reply(&mut writer, &format!("+OK {} octets", body.len())).await?;
                    writer.write_all(body.as_bytes()).await?;
                    reply(&mut writer, ".").await?;
                }
                None => reply(&mut writer, "-ERR no such message").await?,
            },
            "DELE" => match parse_seq(arg, &session, &deleted) {
                Some(seq) => {
                    deleted.insert(seq);
                    reply(&mut writer, &format!("+OK message {seq} deleted")).await?;
                }
                None => reply(&mut writer, "-ERR no such message").await?,
            },
            "NOOP" => reply(&mut writer, "+OK").await?,
            "RSET" => {
                deleted.clear();
                reply(&mut writer, "+OK").await?;
            }
            "QUIT" => {
                let deleted_uids: HashSet<&str> = deleted
                    .iter()
                    .map(|seq| session[seq - 1].uid.as_str())
                    .collect();
                let mut mailbox = mailbox.lock().await;
                mailbox.retain(|message| !deleted_uids.contains(message.uid.as_str()));
                reply(&mut writer, "+OK bye").await?;
                return Ok(());
            }
            _ => reply(&mut writer, "-ERR unknown command").await?,
        }
    }
}

async fn read_command(reader: &mut BufReader<OwnedReadHalf>) -> io::Result<Option<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end().to_owned()))
}

async fn reply(writer: &mut OwnedWriteHalf, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await
}

fn parse_seq(arg: &str, session: &[TestMessage], deleted: &HashSet<usize>) -> Option<usize> {
    let seq: usize = arg.trim().parse().ok()?;
    if seq == 0 || seq > session.len() || deleted.contains(&seq) {
        return None;
    }
    Some(seq)
}

/// Turn a message body into POP3 wire form: CRLF line endings, with
/// leading dots doubled.
fn dot_stuff(body: &str) -> String {
    let body = body.strip_suffix('\n').unwrap_or(body);
    let body = body.strip_suffix('\r').unwrap_or(body);

    let mut stuffed = String::new();
    for line in body.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            stuffed.push('.');
        }
        stuffed.push_str(line);
        stuffed.push_str("\r\n");
    }
    stuffed
}
