// WebSocket client helpers for driving the ingress listener in tests.
use anyhow::{Context, Result};
use http::HeaderValue;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use drover_wire::StreamMessage;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a WebSocket against `wss://{addr}/` with extra request headers.
pub async fn connect(
    addr: SocketAddr,
    tls: rustls::ClientConfig,
    headers: &[(&'static str, String)],
) -> Result<WsClient> {
    let mut request = format!("wss://{addr}/")
        .into_client_request()
        .context("build upgrade request")?;
    for (name, value) in headers {
        request
            .headers_mut()
            .insert(*name, HeaderValue::from_str(value).context("header value")?);
    }
    let (stream, _response) =
        connect_async_tls_with_config(request, None, false, Some(Connector::Rustls(Arc::new(tls))))
            .await
            .context("websocket connect")?;
    Ok(stream)
}

/// Binary telemetry frame carrying one envelope.
pub fn telemetry_frame(topic: &str, txid: &str, device_id: &str, payload: &[u8]) -> Message {
    let envelope = StreamMessage {
        txid: txid.as_bytes().to_vec(),
        sender_id: format!("vehicle_device.{device_id}").into_bytes(),
        device_id: device_id.as_bytes().to_vec(),
        device_type: b"vehicle_device".to_vec(),
        topic: topic.as_bytes().to_vec(),
        payload: payload.to_vec(),
        created_at: 1_700_000_000,
    };
    Message::Binary(envelope.to_bytes().to_vec())
}
