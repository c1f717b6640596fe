//! A tokio event loop performing the I/O of a [`Connection`].
//!
//! BOSH requests go through [`reqwest`], the WebSocket through
//! [`tokio_tungstenite`] when the `websocket` feature is enabled.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

#[cfg(feature = "websocket")]
use futures::{SinkExt, StreamExt};
#[cfg(feature = "websocket")]
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Message};

use crate::{Connection, Error, Status, Transmission};

/// Period of [`Connection::on_idle`].
const TICK: Duration = Duration::from_millis(100);

/// Close code reported when the socket ends without a close frame.
#[cfg(feature = "websocket")]
const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug)]
enum IoEvent {
    Http {
        id: u64,
        status: u16,
        body: Option<String>,
    },
    SocketOpen,
    SocketMessage(String),
    SocketClose(u16),
    SocketError(String),
}

/// Owns a [`Connection`] and performs its I/O.
///
/// ```no_run
/// # use xmpp_session::{ConnectParams, Connection, ConnectionOptions, Driver, Error};
/// # async fn run() -> Result<(), Error> {
/// let conn = Connection::new("https://example.org/http-bind", ConnectionOptions::default());
/// let mut driver = Driver::new(conn)?;
/// driver.connection_mut().connect(
///     "user@example.org",
///     "password",
///     |_, status, condition, _| println!("{} {:?}", status, condition),
///     ConnectParams::default(),
/// )?;
/// driver.run().await
/// # }
/// ```
pub struct Driver {
    conn: Connection,
    http: reqwest::Client,
    content_type: String,
    custom_headers: Vec<(String, String)>,
    requests: HashMap<u64, AbortHandle>,
    events_tx: mpsc::UnboundedSender<IoEvent>,
    events_rx: mpsc::UnboundedReceiver<IoEvent>,
    #[cfg(feature = "websocket")]
    socket: Option<mpsc::UnboundedSender<Message>>,
}

impl Driver {
    /// Wraps `conn`, with a cookie jar if its options ask for one.
    pub fn new(conn: Connection) -> Result<Driver, Error> {
        let options = conn.options();
        let http = reqwest::Client::builder()
            .cookie_store(options.cookie_store)
            .build()?;
        let content_type = options.content_type.clone();
        let custom_headers = options.custom_headers.clone();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Driver {
            conn,
            http,
            content_type,
            custom_headers,
            requests: HashMap::new(),
            events_tx,
            events_rx,
            #[cfg(feature = "websocket")]
            socket: None,
        })
    }

    /// The driven connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// The driven connection, to connect it or send stanzas.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Gives the connection back, cancelling any I/O in flight.
    pub fn into_inner(mut self) -> Connection {
        for (_, request) in self.requests.drain() {
            request.abort();
        }
        self.conn
    }

    /// Runs the connection until it is disconnected.
    pub async fn run(&mut self) -> Result<(), Error> {
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            self.perform();
            if self.conn.status() == Status::Disconnected {
                log::debug!("Connection is disconnected, stopping the driver");
                return Ok(());
            }
            tokio::select! {
                _ = ticker.tick() => self.conn.on_idle(),
                Some(event) = self.events_rx.recv() => self.handle(event),
            }
        }
    }

    fn handle(&mut self, event: IoEvent) {
        match event {
            IoEvent::Http { id, status, body } => {
                self.requests.remove(&id);
                self.conn.handle_http_response(id, status, body);
            }
            IoEvent::SocketOpen => self.conn.handle_socket_open(),
            IoEvent::SocketMessage(data) => self.conn.handle_socket_message(&data),
            IoEvent::SocketClose(code) => self.conn.handle_socket_close(code),
            IoEvent::SocketError(error) => self.conn.handle_socket_error(&error),
        }
    }

    /// Performs everything the connection queued.
    fn perform(&mut self) {
        for transmission in self.conn.take_transmissions() {
            match transmission {
                Transmission::Post { id, body, delay } => self.post(id, body, delay),
                Transmission::Abort { id } => {
                    if let Some(request) = self.requests.remove(&id) {
                        log::debug!("Aborting request {}", id);
                        request.abort();
                    }
                }
                Transmission::Open { url } => self.open_socket(url),
                Transmission::Frame(data) => self.send_frame(data),
                Transmission::Close => self.close_socket(),
            }
        }
    }

    fn post(&mut self, id: u64, body: String, delay: Duration) {
        let mut request = self
            .http
            .post(self.conn.service())
            .header(CONTENT_TYPE, self.content_type.as_str())
            .body(body);
        for (name, value) in &self.custom_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let event = match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    IoEvent::Http {
                        id,
                        status,
                        body: response.text().await.ok(),
                    }
                }
                Err(e) => {
                    log::warn!("BOSH request {} failed: {}", id, e);
                    IoEvent::Http {
                        id,
                        status: 0,
                        body: None,
                    }
                }
            };
            if events.send(event).is_err() {
                log::debug!("Driver is gone, dropping the response to request {}", id);
            }
        });
        self.requests.insert(id, task.abort_handle());
    }

    #[cfg(feature = "websocket")]
    fn open_socket(&mut self, url: String) {
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Message>();
        self.socket = Some(frames_tx);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let stream = match connect_socket(&url).await {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("Couldn't open WebSocket {}: {}", url, e);
                    let _ = events.send(IoEvent::SocketError(e.to_string()));
                    return;
                }
            };
            let _ = events.send(IoEvent::SocketOpen);
            let (mut sink, mut source) = stream.split();

            let writer = async {
                while let Some(message) = frames_rx.recv().await {
                    if let Err(e) = sink.send(message).await {
                        log::warn!("WebSocket write failed: {}", e);
                        break;
                    }
                }
            };
            let reader = async {
                while let Some(message) = source.next().await {
                    let event = match message {
                        Ok(Message::Text(text)) => IoEvent::SocketMessage(text.to_string()),
                        Ok(Message::Close(frame)) => IoEvent::SocketClose(
                            frame.map_or(ABNORMAL_CLOSURE, |frame| frame.code.into()),
                        ),
                        Ok(_) => continue,
                        Err(e) => IoEvent::SocketError(e.to_string()),
                    };
                    let last = !matches!(event, IoEvent::SocketMessage(_));
                    if events.send(event).is_err() || last {
                        return;
                    }
                }
                let _ = events.send(IoEvent::SocketClose(ABNORMAL_CLOSURE));
            };
            tokio::select! {
                _ = writer => (),
                _ = reader => (),
            }
        });
    }

    #[cfg(not(feature = "websocket"))]
    fn open_socket(&mut self, url: String) {
        log::error!("Can't open {}: built without WebSocket support", url);
        self.conn
            .handle_socket_error("WebSocket support is not enabled");
    }

    #[cfg(feature = "websocket")]
    fn send_frame(&mut self, data: String) {
        match self.socket {
            Some(ref socket) => {
                if socket.send(Message::Text(data.into())).is_err() {
                    log::warn!("WebSocket is closed, dropping a frame");
                }
            }
            None => log::warn!("No WebSocket open, dropping a frame"),
        }
    }

    #[cfg(not(feature = "websocket"))]
    fn send_frame(&mut self, _data: String) {}

    #[cfg(feature = "websocket")]
    fn close_socket(&mut self) {
        if let Some(socket) = self.socket.take() {
            let _ = socket.send(Message::Close(None));
        }
    }

    #[cfg(not(feature = "websocket"))]
    fn close_socket(&mut self) {}
}

#[cfg(feature = "websocket")]
async fn connect_socket(
    url: &str,
) -> Result<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Error,
> {
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        http::HeaderValue::from_static("xmpp"),
    );
    let (stream, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}
