//! Host-side handle for the connection worker
//!
//! `Runner` creates the three queues, spawns the worker thread on `start`,
//! and exposes the host ends: push outbound requests, drain messages and
//! connection events, stop. No method except `request_stop(true)` ever
//! blocks, so it is safe to call from a frame or tick loop.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::{Worker, WorkerQueues};
use crate::error::{ClientError, SendError};
use crate::message::{ConnectionEvent, OutboundRequest, ReceivedBatch};
use crate::queue::{spsc, Consumer, Producer};
use crate::session::{ConnectionInfo, Phase, Session, SharedState};
use crate::types::SessionId;

/// How often `request_stop(true)` checks whether the worker has exited
const STOP_POLL: Duration = Duration::from_millis(10);

/// Handle to one connection worker
///
/// The host end of each queue lives here, the worker end moves to the
/// worker thread on `start`.
#[derive(Debug)]
pub struct Runner {
    id: SessionId,
    config: ClientConfig,
    shared: Arc<SharedState>,
    outbound: Producer<OutboundRequest>,
    messages: Consumer<ReceivedBatch>,
    events: Consumer<ConnectionEvent>,
    /// Worker ends, held until `start`
    pending: Option<WorkerQueues>,
    thread: Option<JoinHandle<()>>,
}

impl Runner {
    /// Create an idle runner
    pub fn new(config: ClientConfig) -> Self {
        let (outbound, outbound_rx) = spsc();
        let (messages_tx, messages) = spsc();
        let (events_tx, events) = spsc();

        Self {
            id: SessionId::new(),
            config,
            shared: Arc::new(SharedState::default()),
            outbound,
            messages,
            events,
            pending: Some(WorkerQueues {
                outbound: outbound_rx,
                messages: messages_tx,
                events: events_tx,
            }),
            thread: None,
        }
    }

    /// Spawn the worker
    ///
    /// `channel` may be empty; join later with `join_channel`. Fails with
    /// `AlreadyStarted` on a second call.
    pub fn start(
        &mut self,
        token: &str,
        username: &str,
        channel: &str,
        send_interval: Duration,
    ) -> Result<(), ClientError> {
        if !is_credential(token) || !is_credential(username) {
            return Err(ClientError::InvalidCredentials);
        }
        let Some(queues) = self.pending.take() else {
            return Err(ClientError::AlreadyStarted);
        };

        let session = Session::new(token, username, channel, send_interval);
        self.shared.publish_info(session.info());

        let worker = Worker::new(
            self.id,
            self.config.clone(),
            session,
            Arc::clone(&self.shared),
            queues,
        );

        let handle = thread::Builder::new()
            .name(format!("twitch-irc-{}", self.id.short()))
            .spawn(move || worker.run_blocking())
            .map_err(ClientError::Spawn)?;
        self.thread = Some(handle);

        info!("Session {} worker spawned for {}:{}", self.id, self.config.host, self.config.port);
        Ok(())
    }

    /// Queue an outbound request
    pub fn enqueue(&self, request: OutboundRequest) -> Result<(), SendError> {
        self.outbound.push(request)
    }

    /// Queue a chat message; an empty `channel` means the joined channel
    pub fn send_chat(&self, body: &str, channel: &str) -> Result<(), SendError> {
        self.enqueue(OutboundRequest::chat(body, channel))
    }

    /// Queue a whisper, sent as a `/w` chat command
    ///
    /// Needs the account to have whisper rights; the server reports
    /// refusals as a server message.
    pub fn send_whisper(&self, user: &str, body: &str, channel: &str) -> Result<(), SendError> {
        self.send_chat(&format!("/w {user} {body}"), channel)
    }

    /// Queue a channel switch; an empty `channel` only leaves the current one
    pub fn join_channel(&self, channel: &str) -> Result<(), SendError> {
        self.enqueue(OutboundRequest::join(channel))
    }

    /// Take every chat message received so far, oldest first
    pub fn drain_messages(&mut self) -> ReceivedBatch {
        let mut all = ReceivedBatch::new();
        for batch in self.messages.drain() {
            all.extend(batch);
        }
        all
    }

    /// Take the oldest connection event
    pub fn next_connection_event(&mut self) -> Option<ConnectionEvent> {
        self.events.pop()
    }

    /// Take every pending connection event, oldest first
    pub fn drain_connection_events(&mut self) -> Vec<ConnectionEvent> {
        self.events.drain()
    }

    /// Ask the worker to stop
    ///
    /// With `wait_for_completion` the call blocks until the worker thread
    /// exits or the configured stop timeout passes. Returns true when the
    /// worker is known to have exited.
    pub fn request_stop(&mut self, wait_for_completion: bool) -> bool {
        self.shared.request_exit();

        let Some(handle) = self.thread.take() else {
            return true;
        };

        if wait_for_completion {
            let deadline = Instant::now() + self.config.stop_timeout();
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(STOP_POLL);
            }
        }

        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("Session {} worker panicked", self.id);
            }
            debug!("Session {} worker joined", self.id);
            true
        } else {
            self.thread = Some(handle);
            false
        }
    }

    /// True while authenticated and streaming
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// True between `start` and the worker thread exiting
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Snapshot of token, username and joined channel
    pub fn connection_info(&self) -> ConnectionInfo {
        self.shared.info()
    }

    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    pub fn session_id(&self) -> SessionId {
        self.id
    }
}

/// Non-empty after trimming and free of inner whitespace or line breaks,
/// so it goes out as a single PASS/NICK parameter
fn is_credential(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && !value.chars().any(|c| c.is_whitespace() || c.is_control())
}

impl Drop for Runner {
    fn drop(&mut self) {
        // The worker parts and closes on its own schedule
        self.shared.request_exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ConnectionEventKind;
    use crate::types::Channel;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout};

    const WELCOME: &str = ":tmi.twitch.tv 001 botname :Welcome, GLHF!";
    const WAIT: Duration = Duration::from_secs(3);

    /// Scripted stand-in for the TMI server
    struct FakeServer {
        listener: TcpListener,
    }

    impl FakeServer {
        async fn bind() -> (Self, ClientConfig) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let config = ClientConfig {
                host: "127.0.0.1".to_string(),
                port,
                poll_interval_ms: 10,
                auth_retry_interval_ms: 20,
                auth_attempts: 5,
                request_capabilities: false,
                stop_timeout_ms: 2000,
                ..ClientConfig::default()
            };
            (Self { listener }, config)
        }

        async fn accept(&self) -> Peer {
            let (stream, _) = timeout(WAIT, self.listener.accept()).await.unwrap().unwrap();
            let (read, writer) = stream.into_split();
            Peer {
                reader: BufReader::new(read).lines(),
                writer,
            }
        }
    }

    struct Peer {
        reader: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl Peer {
        /// None once the client has closed (or reset) the connection
        async fn next_line(&mut self) -> Option<String> {
            timeout(WAIT, self.reader.next_line())
                .await
                .expect("timed out waiting for a client line")
                .unwrap_or(None)
        }

        async fn expect_line(&mut self) -> String {
            self.next_line().await.expect("client closed the connection")
        }

        async fn send(&mut self, text: &str) {
            self.writer.write_all(format!("{text}\r\n").as_bytes()).await.unwrap();
        }

        async fn login(&mut self) {
            assert!(self.expect_line().await.starts_with("PASS "));
            assert!(self.expect_line().await.starts_with("NICK "));
            self.send(WELCOME).await;
        }
    }

    async fn next_event(runner: &mut Runner) -> ConnectionEvent {
        next_event_within(runner, WAIT).await
    }

    async fn next_event_within(runner: &mut Runner, limit: Duration) -> ConnectionEvent {
        timeout(limit, async {
            loop {
                if let Some(event) = runner.next_connection_event() {
                    return event;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for a connection event")
    }

    async fn next_messages(runner: &mut Runner) -> ReceivedBatch {
        timeout(WAIT, async {
            loop {
                let batch = runner.drain_messages();
                if !batch.is_empty() {
                    return batch;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for chat messages")
    }

    async fn connected_runner(
        config: ClientConfig,
        server: &FakeServer,
        channel: &str,
        send_interval: Duration,
    ) -> (Runner, Peer) {
        let mut runner = Runner::new(config);
        runner.start("oauth:abc", "BotName", channel, send_interval).unwrap();
        let mut peer = server.accept().await;
        peer.login().await;
        assert_eq!(next_event(&mut runner).await.kind, ConnectionEventKind::Connected);
        if !channel.is_empty() {
            assert_eq!(peer.expect_line().await, format!("JOIN #{}", channel.to_lowercase()));
        }
        (runner, peer)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_handshake_join_and_graceful_stop() {
        let (server, mut config) = FakeServer::bind().await;
        config.request_capabilities = true;
        let mut runner = Runner::new(config);
        runner.start("oauth:abc", "BotName", "Foo", Duration::from_millis(50)).unwrap();

        let mut peer = server.accept().await;
        assert_eq!(peer.expect_line().await, "PASS oauth:abc");
        assert_eq!(peer.expect_line().await, "NICK botname");
        peer.send(WELCOME).await;

        let event = next_event(&mut runner).await;
        assert_eq!(event.kind, ConnectionEventKind::Connected);
        assert_eq!(event.text, WELCOME);

        assert_eq!(peer.expect_line().await, "CAP REQ :twitch.tv/commands");
        assert_eq!(peer.expect_line().await, "CAP REQ :twitch.tv/tags");
        assert_eq!(peer.expect_line().await, "JOIN #foo");
        assert!(runner.is_connected());
        assert!(runner.is_running());

        let info = runner.connection_info();
        assert_eq!(info.token, "oauth:abc");
        assert_eq!(info.username, "botname");
        assert_eq!(info.channel, Some(Channel("foo".to_string())));

        assert!(runner.request_stop(true));
        assert_eq!(peer.expect_line().await, "PART #foo");
        assert_eq!(peer.next_line().await, None);

        let event = next_event(&mut runner).await;
        assert_eq!(event.kind, ConnectionEventKind::Disconnected);
        assert_eq!(event.text, "Disconnected by request gracefully");
        assert!(!runner.is_connected());
        assert!(!runner.is_running());
        assert_eq!(runner.phase(), Phase::Closed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_welcome_burst_forwards_remaining_lines() {
        let (server, config) = FakeServer::bind().await;
        let mut runner = Runner::new(config);
        runner.start("oauth:abc", "botname", "", Duration::from_millis(50)).unwrap();

        let mut peer = server.accept().await;
        peer.expect_line().await;
        peer.expect_line().await;
        peer.send(&format!("{WELCOME}\r\n:tmi.twitch.tv 002 botname :Your host is tmi.twitch.tv")).await;

        assert_eq!(next_event(&mut runner).await.kind, ConnectionEventKind::Connected);
        let event = next_event(&mut runner).await;
        assert_eq!(event.kind, ConnectionEventKind::ServerMessage);
        assert_eq!(event.text, ":tmi.twitch.tv 002 botname :Your host is tmi.twitch.tv");

        runner.request_stop(true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ping_answered_and_not_forwarded() {
        let (server, config) = FakeServer::bind().await;
        let (mut runner, mut peer) =
            connected_runner(config, &server, "", Duration::from_millis(50)).await;

        peer.send("PING :tmi.twitch.tv").await;
        assert_eq!(peer.expect_line().await, "PONG :tmi.twitch.tv");

        sleep(Duration::from_millis(50)).await;
        assert!(runner.drain_connection_events().is_empty());
        assert!(runner.drain_messages().is_empty());

        runner.request_stop(true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_chat_messages_batched_in_order() {
        let (server, config) = FakeServer::bind().await;
        let (mut runner, mut peer) =
            connected_runner(config, &server, "ronni", Duration::from_millis(50)).await;

        let tagged = "@badges=subscriber/6;bits=100;color=#1E90FF;display-name=Ronni :ronni!ronni@ronni.tmi.twitch.tv PRIVMSG #ronni :cheer100 :D";
        let plain = ":viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #ronni :hi: there";
        peer.send(&format!("{tagged}\r\n{plain}")).await;

        let mut messages = next_messages(&mut runner).await;
        if messages.len() < 2 {
            messages.extend(next_messages(&mut runner).await);
        }

        assert_eq!(messages.senders().collect::<Vec<_>>(), vec!["ronni", "viewer"]);
        assert_eq!(messages.bodies().collect::<Vec<_>>(), vec!["cheer100 :D", "hi: there"]);
        let first = &messages.messages[0];
        assert!(first.is_subscriber);
        assert!(first.has_bits);
        assert_eq!(first.bits_amount, 100.0);
        assert!(runner.drain_connection_events().is_empty());

        runner.request_stop(true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_chat_goes_to_joined_channel() {
        let (server, config) = FakeServer::bind().await;
        let (mut runner, mut peer) =
            connected_runner(config, &server, "foo", Duration::from_millis(50)).await;

        runner.send_chat("hello", "").unwrap();
        assert_eq!(peer.expect_line().await, "PRIVMSG #foo :hello");

        runner.send_chat("hey", "#Other").unwrap();
        assert_eq!(peer.expect_line().await, "PRIVMSG #other :hey");

        runner.send_whisper("someone", "psst", "").unwrap();
        assert_eq!(peer.expect_line().await, "PRIVMSG #foo :/w someone psst");

        runner.request_stop(true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_chat_without_channel_is_dropped_with_error() {
        let (server, config) = FakeServer::bind().await;
        let (mut runner, mut peer) =
            connected_runner(config, &server, "", Duration::from_millis(20)).await;

        runner.send_chat("hello", "").unwrap();
        let event = next_event(&mut runner).await;
        assert_eq!(event.kind, ConnectionEventKind::Error);
        assert_eq!(
            event.text,
            "Cannot send message. No channel specified, and not joined to a channel."
        );

        // Not retried: the next request is the first thing on the wire
        runner.send_chat("second", "bar").unwrap();
        assert_eq!(peer.expect_line().await, "PRIVMSG #bar :second");

        runner.request_stop(true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_join_parts_previous_channel_first() {
        let (server, config) = FakeServer::bind().await;
        let (mut runner, mut peer) =
            connected_runner(config, &server, "foo", Duration::from_millis(20)).await;

        runner.join_channel("Bar").unwrap();
        assert_eq!(peer.expect_line().await, "PART #foo");
        assert_eq!(peer.expect_line().await, "JOIN #bar");
        assert_eq!(runner.connection_info().channel, Some(Channel("bar".to_string())));

        runner.join_channel("").unwrap();
        assert_eq!(peer.expect_line().await, "PART #bar");
        sleep(Duration::from_millis(20)).await;
        assert_eq!(runner.connection_info().channel, None);

        assert!(runner.request_stop(true));
        // Nothing joined, so no PART on the way out
        assert_eq!(peer.next_line().await, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_line_breaks_in_channel_stay_on_one_line() {
        let (server, config) = FakeServer::bind().await;
        let (mut runner, mut peer) =
            connected_runner(config, &server, "", Duration::from_millis(20)).await;

        runner.join_channel("foo\r\nPRIVMSG #victim :injected").unwrap();
        runner.send_chat("hi", "bar\r\nQUIT").unwrap();
        runner.send_chat("last", "").unwrap();

        assert_eq!(peer.expect_line().await, "JOIN #foo");
        assert_eq!(peer.expect_line().await, "PRIVMSG #bar :hi");
        assert_eq!(peer.expect_line().await, "PRIVMSG #foo :last");
        assert_eq!(runner.connection_info().channel, Some(Channel("foo".to_string())));

        runner.request_stop(true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_one_send_per_interval_in_fifo_order() {
        let interval = Duration::from_millis(150);
        let (server, config) = FakeServer::bind().await;
        let (mut runner, mut peer) = connected_runner(config, &server, "foo", interval).await;

        for body in ["one", "two", "three"] {
            runner.send_chat(body, "").unwrap();
        }

        let mut arrivals = Vec::new();
        for expected in ["one", "two", "three"] {
            assert_eq!(peer.expect_line().await, format!("PRIVMSG #foo :{expected}"));
            arrivals.push(Instant::now());
        }

        for pair in arrivals.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }

        runner.request_stop(true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_auth_rejected() {
        let (server, config) = FakeServer::bind().await;
        let mut runner = Runner::new(config);
        runner.start("oauth:bad", "botname", "foo", Duration::from_millis(50)).unwrap();

        let mut peer = server.accept().await;
        peer.expect_line().await;
        peer.expect_line().await;
        let notice = ":tmi.twitch.tv NOTICE * :Login authentication failed";
        peer.send(notice).await;
        peer.send("PING :tmi.twitch.tv").await;

        let event = next_event(&mut runner).await;
        assert_eq!(event.kind, ConnectionEventKind::FailedToAuthenticate);
        assert_eq!(event.text, notice);

        // Socket closed without answering the ping or joining
        assert_eq!(peer.next_line().await, None);
        assert!(runner.request_stop(true));
        assert!(runner.drain_connection_events().is_empty());
        assert!(!runner.is_connected());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_auth_timeout() {
        let (server, config) = FakeServer::bind().await;
        let mut runner = Runner::new(config);
        runner.start("oauth:abc", "botname", "", Duration::from_millis(50)).unwrap();

        let mut peer = server.accept().await;
        peer.expect_line().await;
        peer.expect_line().await;

        let event = next_event(&mut runner).await;
        assert_eq!(event.kind, ConnectionEventKind::FailedToAuthenticate);
        assert_eq!(event.text, "Server did not respond");

        assert_eq!(peer.next_line().await, None);
        assert!(runner.request_stop(true));
        assert!(runner.drain_connection_events().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unterminated_login_reply_is_rejection() {
        let (server, config) = FakeServer::bind().await;
        let mut runner = Runner::new(config);
        runner.start("oauth:abc", "botname", "", Duration::from_millis(50)).unwrap();

        let mut peer = server.accept().await;
        peer.expect_line().await;
        peer.expect_line().await;
        let notice = ":tmi.twitch.tv NOTICE * :Improperly formatted auth";
        peer.writer.write_all(notice.as_bytes()).await.unwrap();

        let event = next_event(&mut runner).await;
        assert_eq!(event.kind, ConnectionEventKind::FailedToAuthenticate);
        assert_eq!(event.text, notice);

        assert_eq!(peer.next_line().await, None);
        assert!(runner.request_stop(true));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connect_refused() {
        let (server, config) = FakeServer::bind().await;
        drop(server);

        let mut runner = Runner::new(config);
        runner.start("oauth:abc", "botname", "", Duration::from_millis(50)).unwrap();

        let event = next_event(&mut runner).await;
        assert_eq!(event.kind, ConnectionEventKind::FailedToConnect);
        assert_eq!(event.text, "Connection to Twitch IRC failed!");
        assert!(runner.request_stop(true));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unresolvable_host() {
        let config = ClientConfig {
            host: "does-not-exist.invalid".to_string(),
            ..ClientConfig::default()
        };
        let mut runner = Runner::new(config);
        runner.start("oauth:abc", "botname", "", Duration::from_millis(50)).unwrap();

        // The system resolver may retry before giving up
        let event = next_event_within(&mut runner, Duration::from_secs(20)).await;
        assert_eq!(event.kind, ConnectionEventKind::FailedToConnect);
        assert_eq!(event.text, "Could not resolve hostname!");
        assert!(runner.request_stop(true));
        assert!(!runner.is_connected());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_drop_reports_lost_connection() {
        let (server, config) = FakeServer::bind().await;
        let (mut runner, peer) =
            connected_runner(config, &server, "", Duration::from_millis(50)).await;

        drop(peer);

        let event = next_event(&mut runner).await;
        assert_eq!(event.kind, ConnectionEventKind::Disconnected);
        assert_eq!(event.text, "Lost connection to server");
        assert!(runner.request_stop(true));
        assert!(runner.drain_connection_events().is_empty());
        assert!(!runner.is_connected());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_during_authentication() {
        let (server, mut config) = FakeServer::bind().await;
        config.auth_attempts = 1000;
        let mut runner = Runner::new(config);
        runner.start("oauth:abc", "botname", "foo", Duration::from_millis(50)).unwrap();

        let mut peer = server.accept().await;
        peer.expect_line().await;
        peer.expect_line().await;

        assert!(runner.request_stop(true));
        let event = next_event(&mut runner).await;
        assert_eq!(event.kind, ConnectionEventKind::Disconnected);
        assert_eq!(event.text, "Disconnected by request before authentication completed");
        assert_eq!(peer.next_line().await, None);
    }

    #[test]
    fn test_start_twice() {
        let mut config = ClientConfig::default();
        // Nothing listens here; the worker fails on its own
        config.host = "127.0.0.1".to_string();
        config.port = 9;
        let mut runner = Runner::new(config);

        runner.start("oauth:abc", "bot", "", Duration::from_secs(1)).unwrap();
        let err = runner.start("oauth:abc", "bot", "", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ClientError::AlreadyStarted));

        runner.request_stop(true);
    }

    #[test]
    fn test_start_rejects_empty_credentials() {
        let mut runner = Runner::new(ClientConfig::default());

        let err = runner.start("", "bot", "foo", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ClientError::InvalidCredentials));
        let err = runner.start("oauth:abc", "  ", "foo", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ClientError::InvalidCredentials));
        let err = runner.start("oauth:abc\r\nQUIT", "bot", "foo", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ClientError::InvalidCredentials));
        let err = runner.start("oauth:abc", "bot\nJOIN #x", "", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ClientError::InvalidCredentials));

        assert!(!runner.is_running());
        assert_eq!(runner.phase(), Phase::Idle);
    }

    #[test]
    fn test_requests_queued_before_start() {
        let runner = Runner::new(ClientConfig::default());
        assert!(runner.send_chat("early", "foo").is_ok());
        assert!(runner.join_channel("foo").is_ok());
    }
}
