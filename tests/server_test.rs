//! Integration tests for the selection HTTP API

#[cfg(feature = "server")]
mod common;

#[cfg(feature = "server")]
mod server_tests {
    use super::common::{frame, stub_hub, test_config, wait_until, AfterScript};
    use sensor_stream::server::{run, ServerConfig};
    use sensor_stream::StreamSession;
    use std::sync::Arc;
    use std::time::Duration;

    /// Session fed with five samples of ESP1 and two of ESP2, plus an API
    /// server on a random port.
    async fn serve(
        dir: &std::path::Path,
    ) -> (
        Arc<StreamSession>,
        std::net::SocketAddr,
        tokio::sync::oneshot::Sender<()>,
    ) {
        let mut frames: Vec<String> = (1..=5).map(|i| frame("ESP1", i)).collect();
        frames.extend((1..=2).map(|i| frame("ESP2", i)));

        let (endpoint, _hub) = stub_hub(frames, AfterScript::WaitForViewer).await;
        let session = Arc::new(
            StreamSession::start(&test_config(endpoint, dir))
                .await
                .expect("session should start"),
        );
        wait_until(|| session.stats().samples_appended == 7).await;

        let (addr, shutdown_tx) = run(ServerConfig::new(0), session.clone())
            .await
            .expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        (session, addr, shutdown_tx)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (session, addr, shutdown_tx) = serve(dir.path()).await;

        let response = reqwest::get(format!("http://{}/health", addr))
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let body: serde_json::Value = reqwest::get(format!("http://{}/status", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "open");
        assert_eq!(body["sessionId"], session.id().to_string());

        let _ = shutdown_tx.send(());
        session.stop().await;
    }

    #[tokio::test]
    async fn test_devices_window_and_select() {
        let dir = tempfile::tempdir().unwrap();
        let (session, addr, shutdown_tx) = serve(dir.path()).await;
        let client = reqwest::Client::new();

        let body: serde_json::Value = client
            .get(format!("http://{}/devices", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["devices"], serde_json::json!(["ESP1", "ESP2"]));
        assert_eq!(body["selected"], "ESP1");

        let window: Vec<serde_json::Value> = client
            .get(format!("http://{}/window?k=2", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0]["accel"][0], 4.0);
        assert_eq!(window[1]["accel"][0], 5.0);
        assert_eq!(window[1]["deviceId"], "ESP1");

        let response = client
            .post(format!("http://{}/select", addr))
            .json(&serde_json::json!({ "deviceId": "ESP2" }))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["selected"], "ESP2");

        let latest: serde_json::Value = client
            .get(format!("http://{}/latest", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(latest["deviceId"], "ESP2");
        assert_eq!(latest["accel"][0], 2.0);

        let response = client
            .post(format!("http://{}/select", addr))
            .json(&serde_json::json!({ "deviceId": "" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], "INVALID_DEVICE");

        let _ = shutdown_tx.send(());
        session.stop().await;
    }

    #[tokio::test]
    async fn test_export_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (session, addr, shutdown_tx) = serve(dir.path()).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/export", addr))
            .json(&serde_json::json!({ "deviceId": "ESP1", "filename": "esp1.csv" }))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "exported");

        let path = dir.path().join("exports").join("esp1.csv");
        assert_eq!(body["path"].as_str(), path.to_str());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 6);

        let body: serde_json::Value = client
            .post(format!("http://{}/export", addr))
            .json(&serde_json::json!({ "deviceId": "unknown-device" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "empty");
        assert!(body["path"].is_null());

        let response = client
            .post(format!("http://{}/export", addr))
            .json(&serde_json::json!({ "deviceId": "ESP1", "filename": "../escape.csv" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], "INVALID_FILENAME");

        let stats: serde_json::Value = client
            .get(format!("http://{}/stats", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats["manual_exports"], 1);
        assert_eq!(stats["samples_appended"], 7);

        let _ = shutdown_tx.send(());
        session.stop().await;
    }
}
