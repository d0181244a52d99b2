//! Chat source: IRC over TLS
//!
//! Registers with `PASS`/`NICK`/`USER`, joins the channel once the server
//! sends its welcome (`001`) and relays `PRIVMSG`s addressed to that channel.
//! `PING`s are answered at every stage.

mod message;
mod tls;

pub use message::IrcMessage;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::io::{
    split, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, trace, warn};

use feedwall_core::config::ChatConfig;
use feedwall_core::models::{ChatMessage, Platform};
use feedwall_hub::source::{ChatConnection, ChatConnector};

use crate::error::{UpstreamError, MAX_LINE_LENGTH};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Nick prefix the chat network accepts for read-only logins without a password
const ANONYMOUS_PREFIX: &str = "justinfan";
const DIGITS: [char; 10] = ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];

/// Opens TLS IRC connections to the configured chat server
pub struct IrcConnector {
    server: String,
    host: String,
    nick: String,
    password: String,
    tls: TlsConnector,
    connect_timeout: Duration,
}

impl IrcConnector {
    pub fn new(config: &ChatConfig) -> Result<Self, UpstreamError> {
        let (host, port) = config.server.rsplit_once(':').ok_or_else(|| {
            UpstreamError::InvalidConfig(format!("chat server '{}' is not host:port", config.server))
        })?;
        port.parse::<u16>().map_err(|_| {
            UpstreamError::InvalidConfig(format!("chat server port '{port}' is not a number"))
        })?;

        if config.accept_invalid_certs {
            warn!(server = %config.server, "Chat server certificate will not be verified");
        }
        let tls = TlsConnector::from(Arc::new(tls::client_config(config.accept_invalid_certs)?));

        let nick = if config.nick.is_empty() {
            let nick = format!("{ANONYMOUS_PREFIX}{}", nanoid::nanoid!(8, &DIGITS));
            info!(nick = %nick, "No chat nick configured, logging in anonymously");
            nick
        } else {
            config.nick.clone()
        };

        Ok(Self {
            server: config.server.clone(),
            host: host.to_string(),
            nick,
            password: config.password.clone(),
            tls,
            connect_timeout: CONNECT_TIMEOUT,
        })
    }

    /// Limit on TCP connect plus TLS handshake
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn nick(&self) -> &str {
        &self.nick
    }

    async fn open(&self, channel: &str) -> Result<IrcConnection<TlsStream<TcpStream>>, UpstreamError> {
        let stream = tokio::time::timeout(self.connect_timeout, self.handshake())
            .await
            .map_err(|_| UpstreamError::Timeout("chat connect"))??;

        IrcConnection::register(stream, &self.nick, &self.password, channel, REGISTRATION_TIMEOUT)
            .await
    }

    async fn handshake(&self) -> Result<TlsStream<TcpStream>, UpstreamError> {
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| UpstreamError::Tls(e.to_string()))?;
        let tcp = TcpStream::connect(&self.server).await?;
        Ok(self.tls.connect(server_name, tcp).await?)
    }
}

#[async_trait]
impl ChatConnector for IrcConnector {
    async fn connect(&self, channel: &str) -> feedwall_core::Result<Box<dyn ChatConnection>> {
        let connection = self
            .open(channel)
            .await
            .map_err(|e| e.into_connect(Platform::Chat))?;

        info!(server = %self.server, channel = %connection.channel(), "Joined chat channel");
        Ok(Box::new(connection))
    }
}

/// Reads CRLF-terminated lines, at most [`MAX_LINE_LENGTH`] bytes each.
/// Invalid UTF-8 is replaced rather than treated as a read error.
struct LineReader<R> {
    reader: BufReader<R>,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buffer: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> Result<Option<String>, UpstreamError> {
        self.buffer.clear();
        let limit = (MAX_LINE_LENGTH + 1) as u64;
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.buffer)
            .await?;

        if read == 0 {
            return Ok(None);
        }
        if !self.buffer.ends_with(b"\n") && self.buffer.len() > MAX_LINE_LENGTH {
            return Err(UpstreamError::LineTooLong);
        }

        let line = String::from_utf8_lossy(&self.buffer);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// A registered IRC session joined to one channel
pub struct IrcConnection<S> {
    lines: LineReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    channel: String,
}

impl<S> IrcConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Log in on an open stream and join `channel`
    pub async fn register(
        stream: S,
        nick: &str,
        password: &str,
        channel: &str,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let (reader, writer) = split(stream);
        let mut connection = Self {
            lines: LineReader::new(reader),
            writer,
            channel: normalize_channel(channel),
        };

        if !password.is_empty() {
            connection.send(&format!("PASS {password}")).await?;
        }
        connection.send(&format!("NICK {nick}")).await?;
        connection.send(&format!("USER {nick} 8 * :{nick}")).await?;

        tokio::time::timeout(timeout, connection.await_welcome())
            .await
            .map_err(|_| UpstreamError::Timeout("welcome"))??;

        let join = format!("JOIN {}", connection.channel);
        connection.send(&join).await?;

        Ok(connection)
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    async fn await_welcome(&mut self) -> Result<(), UpstreamError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await?
                .ok_or(UpstreamError::Closed("registration"))?;
            let Some(msg) = IrcMessage::parse(&line) else {
                continue;
            };

            match msg.command.as_str() {
                "001" => return Ok(()),
                "PING" => self.pong(&msg).await?,
                "NOTICE" => {
                    let text = msg.param(1).unwrap_or_default();
                    if text.contains("authentication failed") || text.contains("formatted auth") {
                        return Err(UpstreamError::Auth(text.to_string()));
                    }
                    debug!(notice = %text, "Notice during registration");
                }
                "433" => return Err(UpstreamError::Auth("nickname already in use".to_string())),
                "ERROR" => {
                    return Err(UpstreamError::Network(
                        msg.param(0).unwrap_or("server closed the link").to_string(),
                    ))
                }
                _ => trace!(command = %msg.command, "Registration line"),
            }
        }
    }

    async fn pong(&mut self, ping: &IrcMessage) -> Result<(), UpstreamError> {
        let token = ping.param(0).unwrap_or_default();
        self.send(&format!("PONG :{token}")).await
    }

    async fn send(&mut self, line: &str) -> Result<(), UpstreamError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    fn chat_message(&self, msg: &IrcMessage) -> Option<ChatMessage> {
        let target = msg.param(0)?;
        if !target.eq_ignore_ascii_case(&self.channel) {
            return None;
        }
        Some(ChatMessage::new(msg.sender()?, msg.param(1)?))
    }
}

#[async_trait]
impl<S> ChatConnection for IrcConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn next_message(&mut self) -> Option<feedwall_core::Result<ChatMessage>> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => return Some(Err(e.into_protocol(Platform::Chat))),
            };
            let Some(msg) = IrcMessage::parse(&line) else {
                continue;
            };

            match msg.command.as_str() {
                "PRIVMSG" => {
                    if let Some(message) = self.chat_message(&msg) {
                        return Some(Ok(message));
                    }
                }
                "PING" => {
                    if let Err(e) = self.pong(&msg).await {
                        return Some(Err(e.into_protocol(Platform::Chat)));
                    }
                }
                "RECONNECT" => {
                    info!(channel = %self.channel, "Chat server requested a reconnect");
                    return None;
                }
                _ => trace!(command = %msg.command, "Ignoring chat line"),
            }
        }
    }

    async fn quit(mut self: Box<Self>) {
        if let Err(e) = self.send("QUIT").await {
            debug!(error = %e, "QUIT not delivered");
        }
        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "Chat socket shutdown failed");
        }
    }
}

/// Channel names are lowercase and carry a leading `#`
fn normalize_channel(channel: &str) -> String {
    let channel = channel.trim().to_lowercase();
    if channel.starts_with('#') {
        channel
    } else {
        format!("#{channel}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream, Lines};

    const WAIT: Duration = Duration::from_secs(2);

    struct FakeServer {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        async fn expect(&mut self, line: &str) {
            let received = tokio::time::timeout(WAIT, self.lines.next_line())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(received.as_deref(), Some(line));
        }

        async fn say(&mut self, lines: &str) {
            self.writer.write_all(lines.as_bytes()).await.unwrap();
        }
    }

    fn pair() -> (DuplexStream, FakeServer) {
        let (client, server) = duplex(8192);
        let (reader, writer) = split(server);
        (
            client,
            FakeServer {
                lines: BufReader::new(reader).lines(),
                writer,
            },
        )
    }

    async fn registered() -> (IrcConnection<DuplexStream>, FakeServer) {
        let (client, mut server) = pair();
        let register = tokio::spawn(IrcConnection::register(
            client, "wallbot", "", "#mogra", WAIT,
        ));

        server.expect("NICK wallbot").await;
        server.expect("USER wallbot 8 * :wallbot").await;
        server.say(":tmi.twitch.tv 001 wallbot :Welcome, GLHF!\r\n").await;
        server.expect("JOIN #mogra").await;

        (register.await.unwrap().unwrap(), server)
    }

    #[tokio::test]
    async fn test_register_answers_ping_then_joins() {
        let (client, mut server) = pair();
        let register = tokio::spawn(IrcConnection::register(
            client,
            "wallbot",
            "oauth:secret",
            "Mogra",
            WAIT,
        ));

        server.expect("PASS oauth:secret").await;
        server.expect("NICK wallbot").await;
        server.expect("USER wallbot 8 * :wallbot").await;
        server
            .say("PING :tmi.twitch.tv\r\n:tmi.twitch.tv 001 wallbot :Welcome, GLHF!\r\n")
            .await;
        server.expect("PONG :tmi.twitch.tv").await;
        server.expect("JOIN #mogra").await;

        let connection = register.await.unwrap().unwrap();
        assert_eq!(connection.channel(), "#mogra");
    }

    #[tokio::test]
    async fn test_relays_only_joined_channel() {
        let (mut connection, mut server) = registered().await;

        server
            .say(concat!(
                ":bob!bob@bob.tmi.twitch.tv PRIVMSG #mogra :hi\r\n",
                ":eve!eve@eve.tmi.twitch.tv PRIVMSG #other :not here\r\n",
                "PING :tmi.twitch.tv\r\n",
                ":carol!carol@carol.tmi.twitch.tv PRIVMSG #MOGRA :second\r\n",
            ))
            .await;

        let first = connection.next_message().await.unwrap().unwrap();
        assert_eq!(first, ChatMessage::new("bob", "hi"));

        let second = connection.next_message().await.unwrap().unwrap();
        assert_eq!(second, ChatMessage::new("carol", "second"));

        server.expect("PONG :tmi.twitch.tv").await;
    }

    #[tokio::test]
    async fn test_quit_sends_quit_and_closes() {
        let (connection, mut server) = registered().await;

        Box::new(connection).quit().await;

        server.expect("QUIT").await;
        let eof = tokio::time::timeout(WAIT, server.lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(eof, None);
    }

    #[tokio::test]
    async fn test_server_close_ends_connection() {
        let (mut connection, server) = registered().await;
        drop(server);

        assert!(connection.next_message().await.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_request_ends_connection() {
        let (mut connection, mut server) = registered().await;
        server.say(":tmi.twitch.tv RECONNECT\r\n").await;

        assert!(connection.next_message().await.is_none());
    }

    #[tokio::test]
    async fn test_register_fails_on_auth_notice() {
        let (client, mut server) = pair();
        let register = tokio::spawn(IrcConnection::register(
            client, "wallbot", "oauth:bad", "#mogra", WAIT,
        ));

        server.expect("PASS oauth:bad").await;
        server
            .say(":tmi.twitch.tv NOTICE * :Login authentication failed\r\n")
            .await;

        let err = register.await.unwrap().err().unwrap();
        assert!(matches!(err, UpstreamError::Auth(_)));
    }

    #[tokio::test]
    async fn test_register_fails_when_server_hangs_up() {
        let (client, server) = pair();
        drop(server);

        let err = IrcConnection::register(client, "wallbot", "", "#mogra", WAIT)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, UpstreamError::Closed(_) | UpstreamError::Network(_)));
    }

    #[tokio::test]
    async fn test_register_times_out_without_welcome() {
        let (client, _server) = pair();

        let err = IrcConnection::register(client, "wallbot", "", "#mogra", Duration::from_millis(50))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, UpstreamError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced_not_fatal() {
        let (mut connection, mut server) = registered().await;

        server
            .writer
            .write_all(b":bob!bob@bob.tmi.twitch.tv PRIVMSG #mogra :caf\xe9\r\n")
            .await
            .unwrap();
        server
            .say(":carol!carol@carol.tmi.twitch.tv PRIVMSG #mogra :still here\r\n")
            .await;

        let first = connection.next_message().await.unwrap().unwrap();
        assert_eq!(first, ChatMessage::new("bob", "caf\u{FFFD}"));

        let second = connection.next_message().await.unwrap().unwrap();
        assert_eq!(second, ChatMessage::new("carol", "still here"));
    }

    #[tokio::test]
    async fn test_line_reader_rejects_overlong_line() {
        let mut input = vec![b'a'; MAX_LINE_LENGTH + 10];
        input.extend_from_slice(b"\r\n");
        let mut reader = LineReader::new(input.as_slice());

        assert!(matches!(reader.next_line().await, Err(UpstreamError::LineTooLong)));
    }

    #[tokio::test]
    async fn test_line_reader_accepts_line_at_limit() {
        let mut input = vec![b'a'; MAX_LINE_LENGTH - 2];
        input.extend_from_slice(b"\r\nPING :x");
        let mut reader = LineReader::new(input.as_slice());

        let line = reader.next_line().await.unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_LENGTH - 2);
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("PING :x"));
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overlong_line_ends_connection_with_error() {
        let (mut connection, mut server) = registered().await;

        let mut line = ":bob!bob@bob.tmi.twitch.tv PRIVMSG #mogra :".to_string();
        line.push_str(&"a".repeat(MAX_LINE_LENGTH));
        line.push_str("\r\n");
        // The duplex buffer is small, so write while the client reads.
        let writer = tokio::spawn(async move {
            let _ = server.writer.write_all(line.as_bytes()).await;
            server
        });

        let result = tokio::time::timeout(WAIT, connection.next_message())
            .await
            .unwrap();
        assert!(matches!(result, Some(Err(_))));
        drop(connection);
        writer.abort();
    }

    #[tokio::test]
    async fn test_connect_times_out_on_silent_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        // Accepts the socket but never answers the TLS hello
        let silent = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(WAIT).await;
            drop(socket);
        });

        let config = ChatConfig {
            server: address.to_string(),
            ..ChatConfig::default()
        };
        let connector = IrcConnector::new(&config)
            .unwrap()
            .with_connect_timeout(Duration::from_millis(100));

        let err = tokio::time::timeout(WAIT, connector.open("#mogra"))
            .await
            .unwrap()
            .err()
            .unwrap();
        assert!(matches!(err, UpstreamError::Timeout("chat connect")));
        silent.abort();
    }

    #[test]
    fn test_normalize_channel() {
        assert_eq!(normalize_channel("#mogra"), "#mogra");
        assert_eq!(normalize_channel("Mogra"), "#mogra");
        assert_eq!(normalize_channel(" #Mogra "), "#mogra");
    }

    #[test]
    fn test_connector_rejects_bad_server() {
        let config = ChatConfig {
            server: "irc.example.com".to_string(),
            ..ChatConfig::default()
        };
        assert!(matches!(
            IrcConnector::new(&config),
            Err(UpstreamError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_connector_falls_back_to_anonymous_nick() {
        let connector = IrcConnector::new(&ChatConfig::default()).unwrap();
        assert!(connector.nick().starts_with(ANONYMOUS_PREFIX));
        assert_eq!(connector.nick().len(), ANONYMOUS_PREFIX.len() + 8);
    }
}
