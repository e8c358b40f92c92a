use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use fieldeyes_ingest::{
    routes, BackgroundTasks, CacheInvalidator, IngestPipeline, MemoryCache, MemoryStore,
    NewDevice,
};

#[derive(Debug, Deserialize)]
struct LogResponse {
    message: String,
    device_id: i64,
    serial_number: String,
    registered: bool,
    user_assigned: bool,
}

#[derive(Debug, Deserialize)]
struct Stats {
    ingested: u64,
    decode_failures: u64,
    devices_registered: u64,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    stats: Stats,
}

struct TestServer {
    base: String,
    store: Arc<MemoryStore>,
    cache: Arc<MemoryCache>,
    pipeline: Arc<IngestPipeline>,
}

/// Serve the router on an ephemeral port backed by in-memory collaborators.
async fn spawn_server() -> Result<TestServer> {
    // ---
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let invalidator = CacheInvalidator::new(cache.clone(), BackgroundTasks::new());
    let pipeline = Arc::new(IngestPipeline::new(store.clone(), invalidator));

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let addr = listener.local_addr()?;
    let app = routes::router(Arc::clone(&pipeline));
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    Ok(TestServer {
        base: format!("http://{addr}"),
        store,
        cache,
        pipeline,
    })
}

#[tokio::test]
async fn log_endpoint_registers_and_stores() -> Result<()> {
    // ---
    let server = spawn_server().await?;
    let client = Client::new();
    let url = format!("{}/api/v1/devices/log", server.base);

    let response = client
        .post(&url)
        .header("content-type", "application/json")
        .body(r#"{"serial_number":"SN-HTTP","temperature":19.0,"soil_moisture":15.0}"#)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: LogResponse = response.json().await?;
    assert_eq!(body.message, "device data logged successfully");
    assert_eq!(body.serial_number, "SN-HTTP");
    assert!(body.registered);
    assert!(!body.user_assigned, "auto-registered devices are unclaimed");

    assert!(
        server
            .pipeline
            .invalidator()
            .tasks()
            .shutdown(Duration::from_secs(2))
            .await
    );

    let readings = server.store.readings().await;
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].device_id, body.device_id);
    assert_eq!(readings[0].soil_moisture, 15.0);
    assert_eq!(
        server.cache.deleted().await,
        vec![
            format!("device-logs:{}", body.device_id),
            "device-logs-by-serial:SN-HTTP".to_string(),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn log_endpoint_reports_owned_device() -> Result<()> {
    // ---
    let server = spawn_server().await?;
    let owned = server
        .store
        .insert_device(NewDevice {
            device_type: "weather_station".into(),
            serial_number: "SN-OWNED".into(),
            user_id: Some(5),
        })
        .await;

    let body: LogResponse = Client::new()
        .post(format!("{}/api/v1/devices/log", server.base))
        .body(r#"{"serial_number":"SN-OWNED","humidity":70.0}"#)
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(body.device_id, owned.id);
    assert!(body.user_assigned);
    assert_eq!(server.store.devices().await, vec![owned]);

    Ok(())
}

#[tokio::test]
async fn log_endpoint_rejects_bad_payloads() -> Result<()> {
    // ---
    let server = spawn_server().await?;
    let client = Client::new();
    let url = format!("{}/api/v1/devices/log", server.base);

    for body in ["", "{}", "not json", r#"{"serial_number":"   "}"#] {
        let response = client.post(&url).body(body).send().await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body:?}");

        let error: serde_json::Value = response.json().await?;
        assert!(error.get("error").is_some());
    }

    assert!(server.store.devices().await.is_empty());
    assert!(server.store.readings().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn log_endpoint_hides_storage_errors() -> Result<()> {
    // ---
    let server = spawn_server().await?;
    server.store.fail_appends(true).await;

    let response = Client::new()
        .post(format!("{}/api/v1/devices/log", server.base))
        .body(r#"{"serial_number":"SN-DOWN"}"#)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let error: serde_json::Value = response.json().await?;
    assert_eq!(error["error"], "failed to log device data");

    Ok(())
}

#[tokio::test]
async fn health_reports_counters() -> Result<()> {
    // ---
    let server = spawn_server().await?;
    let client = Client::new();

    client
        .post(format!("{}/api/v1/devices/log", server.base))
        .body(r#"{"serial_number":"SN-H"}"#)
        .send()
        .await?;
    client
        .post(format!("{}/api/v1/devices/log", server.base))
        .body("garbage")
        .send()
        .await?;

    let health: HealthResponse = client
        .get(format!("{}/health", server.base))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(health.status, "ok");
    assert_eq!(health.stats.ingested, 1);
    assert_eq!(health.stats.decode_failures, 1);
    assert_eq!(health.stats.devices_registered, 1);

    Ok(())
}
