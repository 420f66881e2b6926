//! A scripted HTSP server on a loopback socket.
//!
//! The server answers `hello` and `enableAsyncMetadata`, then pushes the
//! scripted channels and events followed by `initialSyncCompleted`. Every
//! request it receives is recorded for assertions.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use htsp_sync_core::{Channel, FieldCodec, HtsmsgCodec, Message, MessageKind, Program, Value};
use htsp_sync_engine::frame::{write_frame, FrameReader, DEFAULT_MAX_MESSAGE_LEN};

use crate::fixtures::{channel_add, event_add, initial_sync_completed};

/// How the server answers one request kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A normal reply.
    Ok,
    /// A reply carrying `error`.
    Error(String),
    /// A reply carrying `noaccess=1`.
    NoAccess,
    /// A frame that does not decode.
    Garbage,
    /// No reply at all.
    Silent,
}

/// What the server does on each connection.
#[derive(Debug, Clone)]
pub struct ServerScript {
    pub server_name: String,
    pub htsp_version: i64,
    pub capabilities: Vec<String>,
    pub hello: Reply,
    pub metadata: Reply,
    pub channels: Vec<Channel>,
    pub programs: Vec<Program>,
    /// Sent after the scripted channels and events.
    pub extra_pushes: Vec<Message>,
    /// Send `initialSyncCompleted` after the pushes.
    pub complete: bool,
    /// Close the socket right after the pushes.
    pub hang_up: bool,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            server_name: "Tvheadend".into(),
            htsp_version: 34,
            capabilities: vec!["timeshift".into()],
            hello: Reply::Ok,
            metadata: Reply::Ok,
            channels: Vec::new(),
            programs: Vec::new(),
            extra_pushes: Vec::new(),
            complete: true,
            hang_up: false,
        }
    }
}

impl ServerScript {
    pub fn with_lineup(channels: Vec<Channel>, programs: Vec<Program>) -> Self {
        Self {
            channels,
            programs,
            ..Self::default()
        }
    }

    pub fn hello(mut self, reply: Reply) -> Self {
        self.hello = reply;
        self
    }

    pub fn metadata(mut self, reply: Reply) -> Self {
        self.metadata = reply;
        self
    }

    pub fn push(mut self, message: Message) -> Self {
        self.extra_pushes.push(message);
        self
    }

    /// Never send `initialSyncCompleted`.
    pub fn stall(mut self) -> Self {
        self.complete = false;
        self
    }

    pub fn hang_up(mut self) -> Self {
        self.hang_up = true;
        self.complete = false;
        self
    }

    /// Send the whole dump including `initialSyncCompleted`, then close.
    pub fn complete_then_hang_up(mut self) -> Self {
        self.hang_up = true;
        self.complete = true;
        self
    }
}

#[derive(Default)]
struct Record {
    requests: Mutex<Vec<Message>>,
    arrived: Notify,
}

/// A running fake server. Stops when dropped.
pub struct FakeServer {
    addr: SocketAddr,
    record: Arc<Record>,
    task: JoinHandle<()>,
}

impl FakeServer {
    /// Bind `127.0.0.1:0` and serve `script` to every client.
    pub async fn start(script: ServerScript) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let record = Arc::new(Record::default());

        let script = Arc::new(script);
        let accept_record = Arc::clone(&record);
        let task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "fake server accept failed");
                        return;
                    }
                };
                tracing::debug!(%peer, "fake server accepted client");

                let script = Arc::clone(&script);
                let record = Arc::clone(&accept_record);
                tokio::spawn(async move {
                    if let Err(e) = serve(stream, &script, &record).await {
                        tracing::debug!(error = %e, "fake server client ended");
                    }
                });
            }
        });

        Ok(Self { addr, record, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `host:port`, ready for a driver config.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Requests received so far, across all clients.
    pub fn requests(&self) -> Vec<Message> {
        lock(&self.record.requests).clone()
    }

    /// Wait until a request of `kind` has arrived and return it.
    pub async fn wait_for_request(&self, kind: MessageKind, timeout: Duration) -> Option<Message> {
        let find = || {
            lock(&self.record.requests)
                .iter()
                .find(|m| m.kind().as_ref() == Some(&kind))
                .cloned()
        };

        tokio::time::timeout(timeout, async {
            loop {
                let arrived = self.record.arrived.notified();
                if let Some(found) = find() {
                    return found;
                }
                arrived.await;
            }
        })
        .await
        .ok()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, script: &ServerScript, record: &Record) -> io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut frames = FrameReader::new(read, Arc::new(HtsmsgCodec), DEFAULT_MAX_MESSAGE_LEN);

    loop {
        let request = match frames.next().await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
        };

        lock(&record.requests).push(request.clone());
        record.arrived.notify_waiters();

        let seq = request.seq().unwrap_or(0) as i64;
        match request.kind() {
            Some(MessageKind::Hello) => {
                let reply = Message::default()
                    .with("seq", seq)
                    .with("htspversion", script.htsp_version)
                    .with("servername", script.server_name.as_str())
                    .with("serverversion", "4.3-fake")
                    .with(
                        "servercapability",
                        script
                            .capabilities
                            .iter()
                            .map(|c| Value::from(c.as_str()))
                            .collect::<Vec<_>>(),
                    );
                respond(&mut write, &script.hello, seq, reply).await?;
            }
            Some(MessageKind::EnableAsyncMetadata) => {
                let reply = Message::default().with("seq", seq);
                let answered = respond(&mut write, &script.metadata, seq, reply).await?;
                if answered {
                    push_dump(&mut write, script).await?;
                    if script.hang_up {
                        write.shutdown().await?;
                        return Ok(());
                    }
                }
            }
            _ => {
                let reply = Message::default()
                    .with("seq", seq)
                    .with("error", "Method not supported");
                send(&mut write, &reply).await?;
            }
        }
    }
}

/// Returns `true` if a normal reply was sent.
async fn respond<W: AsyncWrite + Unpin>(
    write: &mut W,
    reply: &Reply,
    seq: i64,
    ok: Message,
) -> io::Result<bool> {
    match reply {
        Reply::Ok => {
            send(write, &ok).await?;
            Ok(true)
        }
        Reply::Error(message) => {
            let reply = Message::default().with("seq", seq).with("error", message.as_str());
            send(write, &reply).await?;
            Ok(false)
        }
        Reply::NoAccess => {
            let reply = Message::default().with("seq", seq).with("noaccess", 1i64);
            send(write, &reply).await?;
            Ok(false)
        }
        Reply::Garbage => {
            write_frame(write, &garbage_frame()).await?;
            Ok(false)
        }
        Reply::Silent => Ok(false),
    }
}

async fn push_dump<W: AsyncWrite + Unpin>(write: &mut W, script: &ServerScript) -> io::Result<()> {
    for channel in &script.channels {
        send(write, &channel_add(channel)).await?;
    }
    for program in &script.programs {
        send(write, &event_add(program)).await?;
    }
    for push in &script.extra_pushes {
        send(write, push).await?;
    }
    if script.complete {
        send(write, &initial_sync_completed()).await?;
    }
    Ok(())
}

async fn send<W: AsyncWrite + Unpin>(write: &mut W, message: &Message) -> io::Result<()> {
    let frame = HtsmsgCodec
        .encode_frame(message.fields())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    write_frame(write, &frame).await
}

/// A well-framed body whose only field has an unknown type tag.
pub fn garbage_frame() -> Bytes {
    Bytes::from_static(&[0, 0, 0, 7, 0x09, 1, 0, 0, 0, 0, b'x'])
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
