//! End-to-end gateway tests: real listener, real HTTP client, temp-dir store.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use voxline_call::{CallSequencer, CallStore, SequencerConfig};
use voxline_gateway::serve_gateway;

async fn spawn_gateway() -> (SocketAddr, TempDir) {
    let temp = TempDir::new().expect("tempdir");
    let store = CallStore::open(temp.path()).expect("open store");
    let sequencer = CallSequencer::new(store, SequencerConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = serve_gateway(listener, sequencer).await;
    });
    (addr, temp)
}

/// Reconciliation runs detached from the webhook ack, so reads poll until
/// the record reaches the expected version.
async fn wait_for_record(
    client: &reqwest::Client,
    addr: SocketAddr,
    call_id: &str,
    min_version: u64,
) -> Value {
    for _ in 0..100 {
        let response = client
            .get(format!("http://{addr}/calls/{call_id}"))
            .send()
            .await
            .expect("get call");
        if response.status().is_success() {
            let record: Value = response.json().await.expect("record json");
            if record["version"].as_u64().unwrap_or(0) >= min_version {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("call '{call_id}' never reached version {min_version}");
}

async fn post_webhook(client: &reqwest::Client, addr: SocketAddr, payload: Value) -> reqwest::Response {
    client
        .post(format!("http://{addr}/webhooks/vapi"))
        .header("content-type", "application/json")
        .body(payload.to_string())
        .send()
        .await
        .expect("post webhook")
}

#[tokio::test]
async fn functional_webhook_lifecycle_reconciles_into_readable_record() {
    let (addr, _temp) = spawn_gateway().await;
    let client = reqwest::Client::new();

    let response = post_webhook(
        &client,
        addr,
        json!({
            "type": "call-started",
            "timestamp": 0,
            "call": {
                "id": "call-1",
                "assistantId": "agent-1",
                "customer": {"number": "+15550001111"}
            }
        }),
    )
    .await;
    assert_eq!(response.status(), 200);
    let ack: Value = response.json().await.expect("ack json");
    assert_eq!(ack["success"], json!(true));
    assert_eq!(ack["call_id"], json!("call-1"));
    assert_eq!(ack["kind"], json!("started"));

    post_webhook(
        &client,
        addr,
        json!({
            "type": "transcript",
            "timestamp": 1_000,
            "transcript": "hello",
            "call": {"id": "call-1"}
        }),
    )
    .await;
    post_webhook(
        &client,
        addr,
        json!({
            "type": "call-ended",
            "timestamp": 5_000,
            "call": {"id": "call-1"}
        }),
    )
    .await;

    let record = wait_for_record(&client, addr, "call-1", 3).await;
    assert_eq!(record["status"], json!("ended"));
    assert_eq!(record["duration_seconds"], json!(5));
    assert_eq!(record["transcript"], json!(["hello"]));
    assert_eq!(record["agent_id"], json!("agent-1"));
    assert_eq!(record["phone_number"], json!("+15550001111"));
}

#[tokio::test]
async fn functional_webhook_rejects_malformed_payload_without_side_effects() {
    let (addr, _temp) = spawn_gateway().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/webhooks/vapi"))
        .body("{not-json")
        .send()
        .await
        .expect("post webhook");
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.expect("error json");
    assert_eq!(body["error"]["code"], json!("malformed_payload"));

    let response = client
        .get(format!("http://{addr}/calls"))
        .send()
        .await
        .expect("list calls");
    let body: Value = response.json().await.expect("list json");
    assert_eq!(body["total"], json!(0));
}

#[tokio::test]
async fn functional_webhook_rejects_payload_without_call_id() {
    let (addr, _temp) = spawn_gateway().await;
    let client = reqwest::Client::new();

    let response = post_webhook(
        &client,
        addr,
        json!({"type": "call-started", "call": {"status": "ringing"}}),
    )
    .await;
    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.expect("error json");
    assert_eq!(body["error"]["code"], json!("missing_call_id"));
}

#[tokio::test]
async fn functional_unknown_event_kind_is_acknowledged_and_recorded() {
    let (addr, _temp) = spawn_gateway().await;
    let client = reqwest::Client::new();

    let response = post_webhook(
        &client,
        addr,
        json!({"type": "speech-update", "call": {"id": "call-9"}}),
    )
    .await;
    assert_eq!(response.status(), 200);
    let ack: Value = response.json().await.expect("ack json");
    assert_eq!(ack["kind"], json!("unknown"));

    let record = wait_for_record(&client, addr, "call-9", 1).await;
    assert_eq!(record["status"], json!("unknown"));
    assert_eq!(record["last_raw_event"]["type"], json!("speech-update"));
}

#[tokio::test]
async fn functional_call_list_filters_and_detail_not_found() {
    let (addr, _temp) = spawn_gateway().await;
    let client = reqwest::Client::new();

    post_webhook(
        &client,
        addr,
        json!({"type": "call-started", "timestamp": 0, "call": {"id": "call-live"}}),
    )
    .await;
    post_webhook(
        &client,
        addr,
        json!({"type": "call-ended", "timestamp": 5_000, "call": {"id": "call-done"}}),
    )
    .await;
    wait_for_record(&client, addr, "call-live", 1).await;
    wait_for_record(&client, addr, "call-done", 1).await;

    let active: Value = client
        .get(format!("http://{addr}/calls?filter=active"))
        .send()
        .await
        .expect("list active")
        .json()
        .await
        .expect("json");
    assert_eq!(active["total"], json!(1));
    assert_eq!(active["calls"][0]["call_id"], json!("call-live"));

    let inactive: Value = client
        .get(format!("http://{addr}/calls?filter=inactive"))
        .send()
        .await
        .expect("list inactive")
        .json()
        .await
        .expect("json");
    assert_eq!(inactive["total"], json!(1));
    assert_eq!(inactive["calls"][0]["call_id"], json!("call-done"));

    let response = client
        .get(format!("http://{addr}/calls?filter=bogus"))
        .send()
        .await
        .expect("bad filter");
    assert_eq!(response.status(), 400);

    let response = client
        .get(format!("http://{addr}/calls/never-seen"))
        .send()
        .await
        .expect("missing call");
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.expect("error json");
    assert_eq!(body["error"]["code"], json!("call_not_found"));
}

#[tokio::test]
async fn functional_health_reports_sequencer_stats() {
    let (addr, _temp) = spawn_gateway().await;
    let client = reqwest::Client::new();

    post_webhook(
        &client,
        addr,
        json!({"type": "call-started", "timestamp": 0, "call": {"id": "call-1"}}),
    )
    .await;
    wait_for_record(&client, addr, "call-1", 1).await;

    let health: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .expect("health")
        .json()
        .await
        .expect("json");
    assert_eq!(health["status"], json!("ok"));
    assert_eq!(health["service"], json!("voxline-gateway"));
    assert_eq!(health["stats"]["created"], json!(1));
    assert_eq!(health["stats"]["dropped_events"], json!(0));
}
