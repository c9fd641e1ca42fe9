#![allow(dead_code)]

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use inspector::Endpoint;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

pub type AgentSocket = WebSocketStream<TcpStream>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Accepts one websocket connection on an ephemeral port and hands it to
/// `script`, which plays the agent's side.
pub async fn spawn_agent<F, Fut>(script: F) -> (Endpoint, JoinHandle<()>)
where
    F: FnOnce(AgentSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let ws = accept_async(stream).await.expect("handshake");
        script(ws).await;
    });
    (Endpoint::new(port).with_host("127.0.0.1"), handle)
}

/// Reads frames until the first JSON text frame.
pub async fn next_json(ws: &mut AgentSocket) -> Value {
    while let Some(msg) = ws.next().await {
        if let Ok(Message::Text(txt)) = msg {
            return serde_json::from_str(&txt).expect("client sent JSON");
        }
    }
    panic!("client went away before sending a request");
}

pub async fn send_json(ws: &mut AgentSocket, value: Value) {
    ws.send(Message::Text(value.to_string())).await.expect("send");
}

pub async fn send_raw(ws: &mut AgentSocket, text: &str) {
    ws.send(Message::Text(text.to_string())).await.expect("send");
}

/// Keeps reading until the client finishes the close handshake.
pub async fn drain(ws: &mut AgentSocket) {
    while let Some(Ok(_)) = ws.next().await {}
}
