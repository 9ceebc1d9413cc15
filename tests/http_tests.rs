use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use wabatar::api::DeviceRegistry;
use wabatar::http::HttpServer;
use wabatar::session::Session;
use wabatar::transport::RecordingTransport;

fn registry(names: &[&str]) -> DeviceRegistry<RecordingTransport> {
    let mut devices = BTreeMap::new();
    for name in names {
        let mut session = Session::new(*name, RecordingTransport::new(), 0);
        session.connection_made();
        session.data_received_at(b"DE0=7-\r\nSP0\r\nSP2\r\nSP3\r\nSP4\r\n", 10);
        session.transport_mut().clear();
        devices.insert(name.to_string(), Arc::new(Mutex::new(session)));
    }
    devices
}

fn start(devices: Arc<DeviceRegistry<RecordingTransport>>) -> SocketAddr {
    let server = HttpServer::bind("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();
    let runtime = Handle::current();
    std::thread::spawn(move || server.run(devices, runtime));
    addr
}

async fn post_setpoint(addr: SocketAddr, body: &'static str) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("http://{}/v1/setpoint", addr))
        .body(body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    let body = serde_json::from_str(&response.text().await.unwrap()).unwrap();
    (status, body)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_uses_dashboard_layout() {
    let devices = Arc::new(registry(&["bay-2", "bay-1"]));
    devices["bay-2"]
        .lock()
        .await
        .data_received_at(b"25.0 00 0.5 20.9 1.2 45.0\r\nSP0=21.5\r\n", 1000);
    let addr = start(Arc::clone(&devices));

    let response = reqwest::get(format!("http://{}/v1/status", addr)).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();

    let statuses = body.as_array().unwrap();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0]["name"], "bay-1");
    assert_eq!(statuses[1]["name"], "bay-2");

    // No reading yet serializes as an empty object.
    assert_eq!(statuses[0]["sensors"].as_object().map(|o| o.len()), Some(0));
    assert_eq!(statuses[0]["setpoints"]["time"].as_u64(), Some(0));
    assert_eq!(statuses[0]["setpoints"]["values"].as_array().map(Vec::len), Some(6));

    assert_eq!(statuses[1]["sensors"]["time"].as_u64(), Some(1000));
    assert_eq!(statuses[1]["sensors"]["values"][0].as_f64(), Some(25.0));
    assert_eq!(statuses[1]["sensors"]["values"][5].as_f64(), Some(45.0));
    assert_eq!(statuses[1]["setpoints"]["time"].as_u64(), Some(1000));
    assert_eq!(statuses[1]["setpoints"]["values"][0].as_f64(), Some(21.5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_post_setpoint_writes_then_polls() {
    let devices = Arc::new(registry(&["avatar"]));
    let addr = start(Arc::clone(&devices));

    let (status, body) = post_setpoint(addr, r#"{"name":"avatar","index":2,"value":30}"#).await;
    assert_eq!(status, 200);
    assert_eq!(body, serde_json::json!({ "ok": true }));

    let session = devices["avatar"].lock().await;
    assert_eq!(session.transport().written_lines(), vec!["SP2=30.0"]);
    assert_eq!(session.pending_commands(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_post_setpoint_errors() {
    let devices = Arc::new(registry(&["avatar"]));
    let addr = start(Arc::clone(&devices));

    let (status, body) = post_setpoint(addr, r#"{"name":"missing","index":0,"value":20}"#).await;
    assert_eq!(status, 404);
    assert_eq!(body["ok"], false);

    let (status, _) = post_setpoint(addr, r#"{"name":"avatar","index":1,"value":20}"#).await;
    assert_eq!(status, 400);

    let (status, body) = post_setpoint(addr, "not json").await;
    assert_eq!(status, 400);
    assert!(body["message"].as_str().unwrap().starts_with("invalid request"));

    assert!(devices["avatar"].lock().await.transport().ops.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_route_is_not_found() {
    let addr = start(Arc::new(registry(&["avatar"])));

    let response = reqwest::get(format!("http://{}/v1/setpoint", addr)).await.unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let response = reqwest::get(format!("http://{}/v2/status", addr)).await.unwrap();
    assert_eq!(response.status().as_u16(), 404);
}
