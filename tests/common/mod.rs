//! Stub stream hub for integration tests.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use sensor_stream::Config;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// What the hub does after sending its scripted frames.
#[derive(Clone, Copy)]
pub enum AfterScript {
    /// Keep the connection open until the viewer closes it
    WaitForViewer,
    /// Close the connection from the hub side
    Close,
}

/// Start a hub that accepts one viewer, records its announcement, sends
/// `frames` as text messages and then follows `after`. Resolves to the
/// announcement text.
pub async fn stub_hub(frames: Vec<String>, after: AfterScript) -> (String, JoinHandle<Option<String>>) {
    let messages = frames.into_iter().map(|f| Message::Text(f.into())).collect();
    stub_hub_messages(messages, after).await
}

/// Like [`stub_hub`], sending raw WebSocket messages.
pub async fn stub_hub_messages(
    messages: Vec<Message>,
    after: AfterScript,
) -> (String, JoinHandle<Option<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.ok()?;
        let mut ws = accept_async(stream).await.ok()?;

        let announcement = match ws.next().await {
            Some(Ok(Message::Text(text))) => text.as_str().to_string(),
            _ => return None,
        };

        for message in messages {
            ws.send(message).await.ok()?;
        }

        match after {
            AfterScript::Close => {
                let _ = ws.close(None).await;
                while let Some(Ok(_)) = ws.next().await {}
            }
            AfterScript::WaitForViewer => {
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_close() {
                        break;
                    }
                }
            }
        }

        Some(announcement)
    });

    (format!("ws://{addr}/ws"), task)
}

/// A valid frame whose accel X carries `seq`.
pub fn frame(device_id: &str, seq: u32) -> String {
    serde_json::json!({
        "deviceId": device_id,
        "accel": [seq as f64, 0.5, 9.8],
        "gyro": [0.01, 0.02, 0.03],
        "mag": [30.0, -12.0, 44.0],
    })
    .to_string()
}

pub fn test_config(endpoint: String, dir: &Path) -> Config {
    Config {
        endpoint,
        export_path: dir.join("exports"),
        data_path: dir.join("data"),
        connect_timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

/// Poll `cond` until it holds, failing the test after five seconds.
pub async fn wait_until<F: Fn() -> bool>(cond: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
