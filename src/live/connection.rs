//! WebSocket link to the live service

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::protocol::{ClientMessage, ServerMessage, Setup};
use crate::config::LiveConfig;
use crate::{Error, Result};

/// Inbound event from an open link
#[derive(Debug)]
pub enum LinkEvent {
    /// A parsed server message
    Message(ServerMessage),
    /// The remote side closed the connection
    Closed { reason: Option<String> },
    /// The connection failed
    Failed(String),
}

/// How long a closing link's tasks may run to finish the close handshake
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// An open duplex connection
///
/// Dropping the link closes it.
pub struct Link {
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    inbound: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Link {
    /// Assemble a link from its channels and the tasks pumping them
    #[must_use]
    pub fn new(
        outbound: mpsc::UnboundedSender<ClientMessage>,
        inbound: mpsc::UnboundedReceiver<LinkEvent>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound: Some(outbound),
            inbound: Some(inbound),
            tasks,
        }
    }

    /// Sender feeding the connection writer
    ///
    /// After `close` the returned sender is already disconnected.
    #[must_use]
    pub fn sender(&self) -> mpsc::UnboundedSender<ClientMessage> {
        self.outbound
            .clone()
            .unwrap_or_else(|| mpsc::unbounded_channel().0)
    }

    /// Take the inbound event stream; only the first call gets it
    pub fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        self.inbound.take()
    }

    /// Close the connection, discarding unsent messages
    ///
    /// Dropping the outbound sender lets the writer send a close frame once
    /// every other sender is gone. Tasks still running after `CLOSE_GRACE`
    /// are aborted.
    pub fn close(&mut self) {
        self.outbound = None;
        self.inbound = None;
        if self.tasks.is_empty() {
            return;
        }

        let tasks: Vec<_> = self.tasks.drain(..).collect();
        if tokio::runtime::Handle::try_current().is_err() {
            for task in tasks {
                task.abort();
            }
            return;
        }

        tokio::spawn(async move {
            for mut task in tasks {
                if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                    task.abort();
                }
            }
        });
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens links to the live service
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and send `setup`
    ///
    /// Resolves once the connection is open and the setup message is on
    /// its way; the ready acknowledgment arrives later as a `LinkEvent`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Handshake` if the service cannot be reached or
    /// rejects the connection
    async fn connect(&self, setup: Setup) -> Result<Link>;
}

/// Connector for the Gemini live WebSocket endpoint
pub struct GeminiConnector {
    endpoint: String,
    api_key: Option<SecretString>,
}

impl GeminiConnector {
    /// Create a connector from live configuration
    #[must_use]
    pub fn new(config: &LiveConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn url(&self) -> Result<Url> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Handshake("GEMINI_API_KEY is not set".to_string()))?;

        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("invalid live endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("key", api_key.expose_secret());
        Ok(url)
    }
}

#[async_trait]
impl Connector for GeminiConnector {
    async fn connect(&self, setup: Setup) -> Result<Link> {
        let url = self.url()?;

        tracing::debug!(endpoint = %self.endpoint, model = %setup.model, "connecting to live service");

        let (socket, response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Handshake(e.to_string()))?;

        tracing::debug!(status = %response.status(), "live socket open");

        let (mut sink, mut stream) = socket.split();

        let setup_frame = serde_json::to_string(&ClientMessage::Setup(setup))?;
        sink.send(Message::Text(setup_frame))
            .await
            .map_err(|e| Error::Handshake(e.to_string()))?;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let writer_events = inbound_tx.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let frame = match serde_json::to_string(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to serialize outbound message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    let _ = writer_events.send(LinkEvent::Failed(e.to_string()));
                    return;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let payload = match frame {
                    Ok(Message::Text(text)) => text.into_bytes(),
                    Ok(Message::Binary(bytes)) => bytes,
                    Ok(Message::Close(frame)) => {
                        let reason = frame.map(|f| format!("{} {}", f.code, f.reason));
                        let _ = inbound_tx.send(LinkEvent::Closed { reason });
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = inbound_tx.send(LinkEvent::Failed(e.to_string()));
                        return;
                    }
                };

                match ServerMessage::from_slice(&payload) {
                    Ok(message) => {
                        if inbound_tx.send(LinkEvent::Message(message)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, bytes = payload.len(), "skipping unparseable server frame");
                    }
                }
            }
            let _ = inbound_tx.send(LinkEvent::Closed { reason: None });
        });

        Ok(Link::new(outbound_tx, inbound_rx, vec![writer, reader]))
    }
}
