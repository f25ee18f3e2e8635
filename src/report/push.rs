//! Best-effort push notifications.
//!
//! `PushChannel` owns an explicit connection state. `send` connects on demand;
//! any connect or send failure is logged, the connection is dropped and the
//! next `send` tries again. Callers never see an error.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Event, MqttOptions};
use rumqttc::Transport;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};
use url::Url;

/// Opens connections for a `PushChannel`.
pub trait PushTransport: Send {
    /// Endpoint description for logs.
    fn endpoint(&self) -> String;

    fn connect(&mut self) -> Result<Box<dyn PushConnection>>;
}

pub trait PushConnection: Send {
    fn send(&mut self, payload: &str) -> Result<()>;

    fn close(self: Box<Self>) -> Result<()>;
}

pub enum ChannelState {
    Disconnected,
    Connected(Box<dyn PushConnection>),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PushStats {
    pub sent: u64,
    pub failed: u64,
    pub connects: u64,
}

pub struct PushChannel {
    transport: Box<dyn PushTransport>,
    state: ChannelState,
    stats: PushStats,
}

impl PushChannel {
    pub fn new(transport: Box<dyn PushTransport>) -> Self {
        Self {
            transport,
            state: ChannelState::Disconnected,
            stats: PushStats::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ChannelState::Connected(_))
    }

    pub fn stats(&self) -> PushStats {
        self.stats
    }

    /// Send one notification. Returns whether it was handed to the transport.
    pub fn send(&mut self, payload: &str) -> bool {
        let state = std::mem::replace(&mut self.state, ChannelState::Disconnected);
        let mut connection = match state {
            ChannelState::Connected(connection) => connection,
            ChannelState::Disconnected => match self.transport.connect() {
                Ok(connection) => {
                    self.stats.connects += 1;
                    log::info!("push channel connected to {}", self.transport.endpoint());
                    connection
                }
                Err(err) => {
                    self.stats.failed += 1;
                    log::warn!(
                        "push channel connect to {} failed: {:#}",
                        self.transport.endpoint(),
                        err
                    );
                    return false;
                }
            },
        };

        match connection.send(payload) {
            Ok(()) => {
                self.stats.sent += 1;
                self.state = ChannelState::Connected(connection);
                true
            }
            Err(err) => {
                self.stats.failed += 1;
                log::warn!("push notification failed, dropping connection: {:#}", err);
                if let Err(err) = connection.close() {
                    log::debug!("push channel close after failure: {:#}", err);
                }
                false
            }
        }
    }

    pub fn close(&mut self) {
        if let ChannelState::Connected(connection) =
            std::mem::replace(&mut self.state, ChannelState::Disconnected)
        {
            match connection.close() {
                Ok(()) => log::info!("push channel to {} closed", self.transport.endpoint()),
                Err(err) => log::warn!("push channel close failed: {:#}", err),
            }
        }
    }
}

/// Build the transport for a push endpoint.
///
/// - `ws://` / `wss://`: WebSocket to `{base}/ai`
/// - `mqtt://` / `mqtts://` / `tcp://` / `ssl://`: MQTT, QoS 1 to
///   `smokewatch/{camera_id}/detections`
pub fn build_push_transport(
    base_url: &str,
    api_key: Option<&str>,
    camera_id: &str,
) -> Result<Box<dyn PushTransport>> {
    let base_url = base_url.trim();
    let scheme = base_url
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .ok_or_else(|| anyhow!("push endpoint '{}' has no scheme", base_url))?;
    match scheme.as_str() {
        "ws" | "wss" => Ok(Box::new(WebSocketTransport::new(base_url, api_key))),
        "mqtt" | "mqtts" | "tcp" | "ssl" => {
            let endpoint = parse_mqtt_endpoint(base_url)?;
            Ok(Box::new(MqttTransport::new(endpoint, camera_id, api_key)))
        }
        other => Err(anyhow!(
            "unsupported push scheme '{}'; expected ws(s):// or mqtt(s)://",
            other
        )),
    }
}

// ------------------------------------------------------------------------------
// WebSocket
// ------------------------------------------------------------------------------

/// Bound on the TCP connect, the opening handshake and each later socket
/// write, so a dead endpoint cannot hold up the report worker.
pub const WEBSOCKET_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebSocketTransport {
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Self {
        Self {
            url: format!("{}/ai", base_url.trim_end_matches('/')),
            api_key: api_key.filter(|key| !key.is_empty()).map(str::to_string),
            timeout: WEBSOCKET_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn open_socket(&self) -> Result<TcpStream> {
        let url =
            Url::parse(&self.url).with_context(|| format!("invalid websocket url {}", self.url))?;
        let addrs = url
            .socket_addrs(|| None)
            .with_context(|| format!("resolve {}", self.url))?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(match last_err {
            Some(err) => anyhow::Error::new(err).context(format!("tcp connect to {}", self.url)),
            None => anyhow!("{} resolved to no addresses", self.url),
        })
    }
}

impl PushTransport for WebSocketTransport {
    fn endpoint(&self) -> String {
        self.url.clone()
    }

    fn connect(&mut self) -> Result<Box<dyn PushConnection>> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid websocket url {}", self.url))?;
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .context("api key is not a valid header value")?;
            request.headers_mut().insert("Authorization", value);
        }
        let stream = self.open_socket()?;
        // The read timeout also bounds the wait for the handshake response.
        let (socket, _response) = tungstenite::client_tls_with_config(request, stream, None, None)
            .map_err(|err| anyhow!("websocket handshake with {} failed: {}", self.url, err))?;
        Ok(Box::new(WebSocketConnection { socket }))
    }
}

struct WebSocketConnection {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl PushConnection for WebSocketConnection {
    fn send(&mut self, payload: &str) -> Result<()> {
        self.socket
            .send(Message::Text(payload.to_string()))
            .context("websocket send")
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        match self.socket.close(None) {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(err) => Err(anyhow::Error::new(err).context("websocket close")),
        }
    }
}

// ------------------------------------------------------------------------------
// MQTT
// ------------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Supports formats:
/// - `mqtt://host:port`, `tcp://host:port` (plain TCP)
/// - `mqtts://host:port`, `ssl://host:port` (TLS)
/// - `host:port`
/// - `[ipv6]:port`
///
/// The port defaults to 1883 (8883 with TLS) when omitted.
pub fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut use_tls = false;
    let mut remainder = addr.trim().trim_end_matches('/');

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme.to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let default_port = if use_tls { 8883 } else { 1883 };
    let (host, port) = split_host_port(remainder, default_port)?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str, default_port: u16) -> Result<(String, u16)> {
    // Handle IPv6 addresses in brackets: [::1]:1883
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => port
                .parse()
                .with_context(|| format!("invalid MQTT port in {}", addr))?,
            None => default_port,
        };
        return Ok((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .with_context(|| format!("invalid MQTT port in {}", addr))?;
            Ok((host.to_string(), port))
        }
        None => Ok((addr.to_string(), default_port)),
    }
}

pub struct MqttTransport {
    endpoint: MqttEndpoint,
    topic: String,
    client_id: String,
    password: Option<String>,
}

impl MqttTransport {
    pub fn new(endpoint: MqttEndpoint, camera_id: &str, api_key: Option<&str>) -> Self {
        Self {
            endpoint,
            topic: format!("smokewatch/{}/detections", camera_id),
            client_id: format!("smokewatch-{}", camera_id),
            password: api_key.filter(|key| !key.is_empty()).map(str::to_string),
        }
    }

}

impl PushTransport for MqttTransport {
    fn endpoint(&self) -> String {
        format!(
            "mqtt{}://{}:{}/{}",
            if self.endpoint.use_tls { "s" } else { "" },
            self.endpoint.host,
            self.endpoint.port,
            self.topic
        )
    }

    fn connect(&mut self) -> Result<Box<dyn PushConnection>> {
        let mut options = MqttOptions::new(&self.client_id, &self.endpoint.host, self.endpoint.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_start(true);
        if let Some(password) = &self.password {
            options.set_credentials(&self.client_id, password);
        }
        if self.endpoint.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, connection) = Client::new(options, 10);
        Ok(Box::new(MqttConnection::new(
            client,
            connection,
            self.topic.clone(),
        )?))
    }
}

/// Client plus the thread driving its event loop. The thread clears `alive`
/// when the broker connection fails so the next send reports the loss.
struct MqttConnection {
    client: Client,
    topic: String,
    alive: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttConnection {
    fn new(client: Client, mut connection: rumqttc::v5::Connection, topic: String) -> Result<Self> {
        let alive = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&alive);
        let handle = std::thread::Builder::new()
            .name("mqtt-push".to_string())
            .spawn(move || {
                for event in connection.iter() {
                    match event {
                        Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                        Err(e) => {
                            log::warn!("MQTT connection error: {}", e);
                            break;
                        }
                    }
                }
                flag.store(false, Ordering::SeqCst);
            })
            .context("spawn mqtt event loop")?;

        Ok(Self {
            client,
            topic,
            alive,
            connection_handle: Some(handle),
        })
    }
}

impl PushConnection for MqttConnection {
    fn send(&mut self, payload: &str) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(anyhow!("mqtt connection lost"));
        }
        self.client
            .try_publish(
                self.topic.as_str(),
                QoS::AtLeastOnce,
                false,
                payload.as_bytes().to_vec(),
            )
            .context("mqtt publish")
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        if self.alive.load(Ordering::SeqCst) {
            if let Err(err) = self.client.disconnect() {
                log::debug!("mqtt disconnect: {}", err);
            }
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Script {
        connect_failures: u32,
        send_failures: u32,
        sent: Vec<String>,
        connects: u32,
        closes: u32,
    }

    struct ScriptedTransport(Arc<Mutex<Script>>);

    struct ScriptedConnection(Arc<Mutex<Script>>);

    impl PushTransport for ScriptedTransport {
        fn endpoint(&self) -> String {
            "scripted://".to_string()
        }

        fn connect(&mut self) -> Result<Box<dyn PushConnection>> {
            let mut script = self.0.lock().expect("script");
            if script.connect_failures > 0 {
                script.connect_failures -= 1;
                return Err(anyhow!("refused"));
            }
            script.connects += 1;
            Ok(Box::new(ScriptedConnection(Arc::clone(&self.0))))
        }
    }

    impl PushConnection for ScriptedConnection {
        fn send(&mut self, payload: &str) -> Result<()> {
            let mut script = self.0.lock().expect("script");
            if script.send_failures > 0 {
                script.send_failures -= 1;
                return Err(anyhow!("broken pipe"));
            }
            script.sent.push(payload.to_string());
            Ok(())
        }

        fn close(self: Box<Self>) -> Result<()> {
            self.0.lock().expect("script").closes += 1;
            Ok(())
        }
    }

    fn channel(script: Script) -> (PushChannel, Arc<Mutex<Script>>) {
        let shared = Arc::new(Mutex::new(script));
        let channel = PushChannel::new(Box::new(ScriptedTransport(Arc::clone(&shared))));
        (channel, shared)
    }

    #[test]
    fn connects_lazily_and_reuses_connection() {
        let (mut channel, script) = channel(Script::default());
        assert!(!channel.is_connected());
        assert!(channel.send("a"));
        assert!(channel.send("b"));
        assert!(channel.is_connected());

        let script = script.lock().expect("script");
        assert_eq!(script.connects, 1);
        assert_eq!(script.sent, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn send_failure_drops_to_disconnected_then_reconnects() {
        let (mut channel, script) = channel(Script {
            send_failures: 1,
            ..Script::default()
        });
        assert!(!channel.send("lost"));
        assert!(!channel.is_connected());
        assert!(channel.send("retry"));

        let script = script.lock().expect("script");
        assert_eq!(script.connects, 2);
        assert_eq!(script.closes, 1);
        assert_eq!(script.sent, vec!["retry".to_string()]);
        assert_eq!(channel.stats(), PushStats { sent: 1, failed: 1, connects: 2 });
    }

    #[test]
    fn connect_failure_is_absorbed() {
        let (mut channel, _script) = channel(Script {
            connect_failures: 2,
            ..Script::default()
        });
        assert!(!channel.send("x"));
        assert!(!channel.send("y"));
        assert!(channel.send("z"));
        assert_eq!(channel.stats().failed, 2);
    }

    #[test]
    fn close_releases_connection() {
        let (mut channel, script) = channel(Script::default());
        channel.close();
        assert!(channel.send("a"));
        channel.close();
        assert!(!channel.is_connected());
        assert_eq!(script.lock().expect("script").closes, 1);
    }

    #[test]
    fn websocket_handshake_times_out_on_silent_peer() {
        // Accepted by the kernel backlog, never answered.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let transport = WebSocketTransport::new(&format!("ws://{}", addr), None)
            .with_timeout(Duration::from_millis(200));
        let mut channel = PushChannel::new(Box::new(transport));

        let started = std::time::Instant::now();
        assert!(!channel.send("{}"));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!channel.is_connected());
        assert_eq!(channel.stats().failed, 1);
        drop(listener);
    }

    #[test]
    fn parse_endpoint_schemes() {
        let ep = parse_mqtt_endpoint("mqtt://127.0.0.1:1883").unwrap();
        assert_eq!(ep, MqttEndpoint { host: "127.0.0.1".to_string(), port: 1883, use_tls: false });

        let ep = parse_mqtt_endpoint("mqtts://broker.example.com").unwrap();
        assert_eq!(ep.port, 8883);
        assert!(ep.use_tls);

        let ep = parse_mqtt_endpoint("[::1]:1884").unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.port, 1884);

        assert!(parse_mqtt_endpoint("http://broker:1883").is_err());
        assert!(parse_mqtt_endpoint("mqtt://broker:notaport").is_err());
    }

    #[test]
    fn selects_transport_by_scheme() {
        let ws = build_push_transport("ws://localhost:3000/", None, "4").unwrap();
        assert_eq!(ws.endpoint(), "ws://localhost:3000/ai");

        let mqtt = build_push_transport("mqtt://broker:1883", Some("k"), "4").unwrap();
        assert_eq!(mqtt.endpoint(), "mqtt://broker:1883/smokewatch/4/detections");

        assert!(build_push_transport("localhost:3000", None, "4").is_err());
        assert!(build_push_transport("http://localhost:3000", None, "4").is_err());
    }
}
