//! Connection worker
//!
//! Owns the socket for one connection attempt and drives it through
//! resolve → connect → authenticate → join → stream → drain. Runs on its own
//! thread inside a current-thread tokio runtime; the host only ever sees the
//! queues and the `SharedState` flags.
//!
//! Timing is sleep-driven: each cycle reads whatever is pending without
//! waiting, sends at most one queued request when the pacer allows, then
//! sleeps the poll interval. Chat cadence tolerates the added latency.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::message::{
    ConnectionEvent, ConnectionEventKind, OutboundKind, OutboundRequest, ReceivedBatch,
};
use crate::parser::{parse_line, LineBuffer, ParsedLine};
use crate::queue::{Consumer, Producer};
use crate::rate::SendPacer;
use crate::session::{Phase, Session, SharedState};
use crate::types::{Channel, SessionId};

/// Prefix of the numeric that confirms a successful login
const WELCOME_PREFIX: &str = ":tmi.twitch.tv 001";

/// Text that must appear in the welcome numeric
const WELCOME_TEXT: &str = ":Welcome, GLHF!";

/// Capabilities requested after login (whispers and message tags)
const CAPABILITIES: [&str; 2] = ["twitch.tv/commands", "twitch.tv/tags"];

/// Size of a single socket read
const READ_CHUNK: usize = 16 * 1024;

const NO_CHANNEL: &str = "Cannot send message. No channel specified, and not joined to a channel.";
const LOST_CONNECTION: &str = "Lost connection to server";
const GRACEFUL_DISCONNECT: &str = "Disconnected by request gracefully";

/// Worker-side ends of the three queues
#[derive(Debug)]
pub struct WorkerQueues {
    pub outbound: Consumer<OutboundRequest>,
    pub messages: Producer<ReceivedBatch>,
    pub events: Producer<ConnectionEvent>,
}

/// Result of draining the socket once
#[derive(Debug, Default)]
struct Received {
    lines: Vec<String>,
    /// Peer closed the connection or the socket failed
    closed: bool,
}

/// Connection worker (one per connection attempt)
pub struct Worker {
    id: SessionId,
    config: ClientConfig,
    session: Session,
    shared: Arc<SharedState>,
    queues: WorkerQueues,
    stream: Option<TcpStream>,
    lines: LineBuffer,
    pacer: SendPacer,
}

impl Worker {
    pub fn new(
        id: SessionId,
        config: ClientConfig,
        session: Session,
        shared: Arc<SharedState>,
        queues: WorkerQueues,
    ) -> Self {
        let pacer = SendPacer::new(session.send_interval);
        Self {
            id,
            config,
            session,
            shared,
            queues,
            stream: None,
            lines: LineBuffer::new(),
            pacer,
        }
    }

    /// Thread entry point: build a runtime and run the worker to completion
    pub fn run_blocking(self) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build();

        match runtime {
            Ok(runtime) => runtime.block_on(self.run()),
            Err(err) => {
                error!("Session {} could not build runtime: {}", self.id, err);
                self.emit(ClientError::Runtime(err).into());
                self.shared.set_phase(Phase::Closed);
            }
        }
    }

    /// Run the full connection lifecycle
    ///
    /// Every exit path leaves exactly one terminal event in the event queue
    /// and no socket behind.
    pub async fn run(mut self) {
        info!("Session {} starting", self.id);

        match self.handshake().await {
            Ok(()) => {
                self.stream_loop().await;
                self.shutdown().await;
            }
            Err(err) => {
                warn!("Session {} handshake failed: {:?}", self.id, err);
                self.stream = None;
                self.emit(err.into());
            }
        }

        self.shared.set_connected(false);
        self.set_phase(Phase::Closed);
        info!("Session {} finished", self.id);
    }

    /// Resolve, connect, log in and join the initial channel
    async fn handshake(&mut self) -> Result<(), ClientError> {
        self.set_phase(Phase::Resolving);
        let addr = self.resolve().await?;

        self.set_phase(Phase::SocketConnecting);
        self.stream = Some(self.open_socket(addr).await?);
        info!("Session {} connected to {}", self.id, addr);

        let pass = format!("PASS {}", self.session.token);
        let nick = format!("NICK {}", self.session.username);
        self.write_line(&pass).await.map_err(ClientError::Handshake)?;
        self.write_line(&nick).await.map_err(ClientError::Handshake)?;

        self.set_phase(Phase::Authenticating);
        self.authenticate().await?;

        if self.config.request_capabilities {
            for capability in CAPABILITIES {
                let request = format!("CAP REQ :{capability}");
                if let Err(e) = self.write_line(&request).await {
                    warn!("Session {} capability request failed: {}", self.id, e);
                }
            }
        }

        if let Some(channel) = self.session.channel.clone() {
            self.set_phase(Phase::Joining);
            self.write_line(&format!("JOIN #{channel}"))
                .await
                .map_err(ClientError::JoinFailed)?;
            info!("Session {} joined #{}", self.id, channel);
        }

        Ok(())
    }

    async fn resolve(&self) -> Result<SocketAddr, ClientError> {
        let target = (self.config.host.as_str(), self.config.port);
        let mut addrs = tokio::net::lookup_host(target)
            .await
            .map_err(ClientError::Resolve)?;
        addrs.next().ok_or(ClientError::NoAddress)
    }

    async fn open_socket(&self, addr: SocketAddr) -> Result<TcpStream, ClientError> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(ClientError::SocketCreate)?;

        // Tuning only; the connection works without either
        if let Err(e) = socket.set_recv_buffer_size(self.config.receive_buffer_size) {
            debug!("Session {} could not set receive buffer: {}", self.id, e);
        }
        if let Err(e) = socket.set_reuseaddr(true) {
            debug!("Session {} could not set SO_REUSEADDR: {}", self.id, e);
        }

        socket.connect(addr).await.map_err(ClientError::Connect)
    }

    /// Wait for the welcome numeric
    async fn authenticate(&mut self) -> Result<(), ClientError> {
        let retry = self.config.auth_retry_interval();
        let mut empty_polls = 0;

        loop {
            if self.shared.should_exit() {
                return Err(ClientError::Cancelled);
            }

            let received = self.receive();
            let mut lines = received.lines.into_iter();

            if let Some(first) = lines.next() {
                if !is_welcome(&first) {
                    return Err(ClientError::AuthRejected(first));
                }

                info!("Session {} authenticated as {}", self.id, self.session.username);
                self.emit(ConnectionEvent::new(ConnectionEventKind::Connected, first));
                self.shared.set_connected(true);

                // The welcome usually arrives with 002..376 in the same read
                self.dispatch(lines.collect()).await;
                return Ok(());
            }

            if received.closed {
                return Err(self.unanswered_login(ClientError::AuthClosed));
            }

            tokio::time::sleep(retry).await;
            empty_polls += 1;
            if empty_polls >= self.config.auth_attempts {
                return Err(self.unanswered_login(ClientError::AuthTimeout));
            }
        }
    }

    /// Login ended without a complete line
    ///
    /// An unterminated reply is still a reply, so it is reported as the
    /// rejection text instead of `fallback`.
    fn unanswered_login(&self, fallback: ClientError) -> ClientError {
        let partial = self.lines.pending().trim();
        if partial.is_empty() {
            fallback
        } else {
            ClientError::AuthRejected(partial.to_string())
        }
    }

    /// Steady state: read, dispatch, pace outbound, sleep
    async fn stream_loop(&mut self) {
        self.set_phase(Phase::Streaming);
        let poll = self.config.poll_interval();

        while !self.shared.should_exit() {
            let received = self.receive();
            self.dispatch(received.lines).await;

            if received.closed {
                warn!("Session {} lost connection", self.id);
                self.stream = None;
                self.shared.set_connected(false);
                self.emit(ConnectionEvent::new(
                    ConnectionEventKind::Disconnected,
                    LOST_CONNECTION,
                ));
                return;
            }

            if self.pacer.is_ready() {
                if let Some(request) = self.queues.outbound.pop() {
                    self.send_request(request).await;
                    self.pacer.mark_sent();
                    debug!(
                        "Session {} next send after {:?} (clock {:?})",
                        self.id,
                        self.pacer.interval(),
                        self.pacer.elapsed()
                    );
                }
            }

            tokio::time::sleep(poll).await;
            self.pacer.advance(poll);
        }
    }

    /// Leave the channel and close after a requested stop
    async fn shutdown(&mut self) {
        if self.stream.is_none() {
            return;
        }

        self.set_phase(Phase::Draining);
        self.shared.set_connected(false);

        if let Some(channel) = self.session.channel.clone() {
            if let Err(e) = self.write_line(&format!("PART #{channel}")).await {
                debug!("Session {} could not part #{}: {}", self.id, channel, e);
            }
        }

        self.emit(ConnectionEvent::new(
            ConnectionEventKind::Disconnected,
            GRACEFUL_DISCONNECT,
        ));

        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        info!("Session {} disconnected", self.id);
    }

    /// Send one dequeued request
    async fn send_request(&mut self, request: OutboundRequest) {
        match request.kind {
            OutboundKind::ChatMessage => {
                let target = request.channel.or_else(|| self.session.channel.clone());
                let Some(channel) = target else {
                    // Dropped, not requeued
                    warn!("Session {} dropped chat message: no channel", self.id);
                    self.emit(ConnectionEvent::new(ConnectionEventKind::Error, NO_CHANNEL));
                    return;
                };
                if let Err(e) = self.write_line(&privmsg(&channel, &request.body)).await {
                    warn!("Session {} failed to send to #{}: {}", self.id, channel, e);
                }
            }
            OutboundKind::JoinChannel => {
                let previous = self.session.switch_channel(request.channel.clone());
                self.shared.publish_info(self.session.info());

                if let Some(previous) = previous {
                    if let Err(e) = self.write_line(&format!("PART #{previous}")).await {
                        warn!("Session {} failed to part #{}: {}", self.id, previous, e);
                    }
                }
                if let Some(next) = request.channel {
                    match self.write_line(&format!("JOIN #{next}")).await {
                        Ok(()) => info!("Session {} joined #{}", self.id, next),
                        Err(e) => warn!("Session {} failed to join #{}: {}", self.id, next, e),
                    }
                }
            }
        }
    }

    /// Route parsed lines: pings answered, chat batched, the rest forwarded
    async fn dispatch(&mut self, lines: Vec<String>) {
        let mut batch = ReceivedBatch::new();

        for line in lines {
            match parse_line(&line) {
                Some(ParsedLine::Ping(reply)) => {
                    debug!("Session {} answering keep-alive", self.id);
                    if let Err(e) = self.write_line(&reply).await {
                        warn!("Session {} failed to answer ping: {}", self.id, e);
                    }
                }
                Some(ParsedLine::Chat(message)) => {
                    debug!("Session {} <{}> {}", self.id, message.sender, message.body);
                    batch.push(message);
                }
                Some(ParsedLine::Server(text)) => {
                    debug!("Session {} < {}", self.id, text);
                    self.emit(ConnectionEvent::server_message(text));
                }
                None => {}
            }
        }

        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        if self.queues.messages.push(batch).is_err() {
            debug!("Session {} message queue closed, {} messages dropped", self.id, count);
        }
    }

    /// Read everything pending without waiting
    ///
    /// Keeps reading until the socket reports no more data, so a burst
    /// larger than one chunk is taken in a single cycle.
    fn receive(&mut self) -> Received {
        let mut received = Received::default();
        let Some(stream) = self.stream.as_ref() else {
            received.closed = true;
            return received;
        };

        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match stream.try_read(&mut buf) {
                Ok(0) => {
                    received.closed = true;
                    break;
                }
                Ok(n) => received.lines.extend(self.lines.push(&buf[..n])),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Session {} read error: {}", self.id, e);
                    received.closed = true;
                    break;
                }
            }
        }
        received
    }

    /// Write one CRLF-terminated line
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"));
        };

        if line.starts_with("PASS ") {
            debug!("Session {} > PASS ***", self.id);
        } else {
            debug!("Session {} > {}", self.id, line);
        }

        let mut framed = String::with_capacity(line.len() + 2);
        framed.push_str(line);
        framed.push_str("\r\n");
        stream.write_all(framed.as_bytes()).await
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.queues.events.push(event).is_err() {
            debug!("Session {} event queue closed", self.id);
        }
    }

    fn set_phase(&self, phase: Phase) {
        debug!("Session {} phase {:?}", self.id, phase);
        self.shared.set_phase(phase);
    }
}

fn is_welcome(line: &str) -> bool {
    line.starts_with(WELCOME_PREFIX) && line.contains(WELCOME_TEXT)
}

/// `PRIVMSG #channel :body`, with line breaks in the body flattened
fn privmsg(channel: &Channel, body: &str) -> String {
    format!("PRIVMSG #{} :{}", channel, body.replace(['\r', '\n'], " "))
}
