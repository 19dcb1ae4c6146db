//! WebSocket transport over `tokio-tungstenite`.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Transport, TransportParts, TransportReceiver};
use crate::error::{Error, ErrorKind, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a gateway router over WebSocket.
pub struct WebSocketTransport;

impl WebSocketTransport {
	/// Opens `url`, failing with [`ErrorKind::ConnectTimeout`] if the handshake
	/// does not finish within `timeout`.
	///
	/// `max_message_size` bounds inbound messages and frames in bytes; a larger
	/// one ends the receiver with [`Error::Protocol`]. `None` keeps the
	/// tungstenite defaults.
	pub async fn connect(url: &str, timeout: Duration, max_message_size: Option<usize>) -> Result<TransportParts> {
		tracing::debug!(target = "gw.connection", url, ?timeout, ?max_message_size, "connecting");
		let mut config = WebSocketConfig::default();
		if let Some(limit) = max_message_size {
			config.max_message_size = Some(limit);
			config.max_frame_size = Some(limit);
		}
		let connected = tokio::time::timeout(timeout, tokio_tungstenite::connect_async_with_config(url, Some(config), false))
			.await
			.map_err(|_| Error::rpc(ErrorKind::ConnectTimeout, format!("no handshake from {url} within {timeout:?}")))?;
		let (stream, _response) = connected.map_err(|err| classify_connect_error(url, err))?;

		let (sink, stream) = stream.split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		Ok(TransportParts {
			sender: Box::new(WebSocketSender { sink }),
			receiver: Box::new(WebSocketReceiver { stream, message_tx }),
			message_rx,
		})
	}
}

fn classify_connect_error(url: &str, err: tungstenite::Error) -> Error {
	match err {
		tungstenite::Error::Io(io_err) => match io_err.kind() {
			io::ErrorKind::ConnectionRefused => Error::rpc(ErrorKind::ConnectionRefused, format!("{url}: {io_err}")),
			io::ErrorKind::TimedOut => Error::rpc(ErrorKind::ConnectTimeout, format!("{url}: {io_err}")),
			io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe => {
				Error::rpc(ErrorKind::ConnectionLost, format!("{url}: {io_err}"))
			}
			_ => Error::Transport(format!("{url}: {io_err}")),
		},
		tungstenite::Error::Url(url_err) => Error::Config(format!("invalid router endpoint {url}: {url_err}")),
		other => Error::Transport(format!("{url}: {other}")),
	}
}

struct WebSocketSender {
	sink: SplitSink<WsStream, Message>,
}

impl Transport for WebSocketSender {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			let text = serde_json::to_string(&message)?;
			self.sink
				.send(Message::Text(text))
				.await
				.map_err(|err| Error::rpc(ErrorKind::ConnectionLost, err.to_string()))
		})
	}

	fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move { self.sink.close().await.map_err(|err| Error::Transport(err.to_string())) })
	}
}

struct WebSocketReceiver {
	stream: SplitStream<WsStream>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for WebSocketReceiver {
	fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async move {
			while let Some(frame) = self.stream.next().await {
				let frame = frame.map_err(|err| match err {
					tungstenite::Error::Capacity(capacity) => Error::Protocol(format!("inbound message rejected: {capacity}")),
					other => Error::rpc(ErrorKind::ConnectionLost, other.to_string()),
				})?;
				let parsed = match frame {
					Message::Text(text) => serde_json::from_str::<Value>(&text),
					Message::Binary(bytes) => serde_json::from_slice::<Value>(&bytes),
					Message::Close(_) => break,
					_ => continue,
				};
				let value = match parsed {
					Ok(value) => value,
					Err(err) => {
						tracing::warn!(target = "gw.connection", error = %err, "dropping malformed frame");
						continue;
					}
				};
				if self.message_tx.send(value).is_err() {
					break;
				}
			}
			Ok(())
		})
	}
}
