use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;

use mailqueue_api::app::{AppServices, SharedStore};
use mailqueue_core::EmailTask;
use mailqueue_infra::mail::{EmailSender, MailTransport, TemplateRegistry, TransportError};
use mailqueue_infra::queue::{
    EMAIL_QUEUE, EmailQueue, InMemoryQueueStore, QueueStore, QueueStoreError, QueueWorker,
    RetryPolicy, WorkerConfig,
};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(store: SharedStore) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let services = Arc::new(AppServices::new(EmailQueue::new(store)));
        let app = mailqueue_api::app::build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Store that is always down.
struct UnreachableStore;

impl QueueStore for UnreachableStore {
    fn append(&self, _: &str, _: &[u8]) -> Result<(), QueueStoreError> {
        Err(QueueStoreError::Connection("connection refused".into()))
    }

    fn blocking_pop(&self, _: &str, _: Duration) -> Result<Option<Vec<u8>>, QueueStoreError> {
        Err(QueueStoreError::Connection("connection refused".into()))
    }

    fn len(&self, _: &str) -> Result<usize, QueueStoreError> {
        Err(QueueStoreError::Connection("connection refused".into()))
    }
}

fn queued(store: &InMemoryQueueStore) -> Vec<EmailTask> {
    store
        .snapshot(EMAIL_QUEUE)
        .iter()
        .map(|p| EmailTask::decode(p).unwrap())
        .collect()
}

fn send_body() -> serde_json::Value {
    json!({
        "to": "a@x.com",
        "subject": "S",
        "templateName": "welcome",
        "data": {"name": "  Bob  "},
    })
}

#[tokio::test]
async fn health_reports_ok_with_utc_time() {
    let srv = TestServer::spawn(InMemoryQueueStore::arc()).await;

    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["timestamp"]["server"]["timezone"], "UTC");
    let time = body["timestamp"]["server"]["time"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(time).is_ok());
}

#[tokio::test]
async fn send_enqueues_a_sanitized_task() {
    let store = InMemoryQueueStore::arc();
    let srv = TestServer::spawn(store.clone()).await;

    let res = reqwest::Client::new()
        .post(srv.url("/api/send"))
        .json(&send_body())
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["message"], "email was successfully added to the queue");
    assert_eq!(body["details"]["recipient"], "a@x.com");
    assert_eq!(body["details"]["subject"], "S");

    let tasks = queued(&store);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].template_name, "welcome");
    assert_eq!(tasks[0].retries, 0);
    assert_eq!(tasks[0].data["name"].as_str(), Some("Bob"));
}

#[tokio::test]
async fn malformed_json_is_an_invalid_request() {
    let store = InMemoryQueueStore::arc();
    let srv = TestServer::spawn(store.clone()).await;

    let res = reqwest::Client::new()
        .post(srv.url("/api/send"))
        .header("content-type", "application/json")
        .body("{\"to\": ")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let request_id = res.headers()["x-request-id"].to_str().unwrap().to_string();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid request");
    assert_eq!(body["requestId"], request_id.as_str());
    assert!(queued(&store).is_empty());
}

#[tokio::test]
async fn validation_failures_list_each_field() {
    let store = InMemoryQueueStore::arc();
    let srv = TestServer::spawn(store.clone()).await;

    let res = reqwest::Client::new()
        .post(srv.url("/api/send"))
        .json(&json!({
            "to": "not-an-address",
            "subject": "x".repeat(201),
            "templateName": "welcome",
            "data": {},
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation failed");
    assert_eq!(body["details"]["to"], "invalid email format");
    assert_eq!(body["details"]["subject"], "value is too long");
    assert!(body["details"].get("templateName").is_none());
    assert!(body["requestId"].is_string());
    assert!(queued(&store).is_empty());
}

#[tokio::test]
async fn empty_recipient_is_required() {
    let store = InMemoryQueueStore::arc();
    let srv = TestServer::spawn(store.clone()).await;

    let mut body = send_body();
    body["to"] = json!("   ");
    let res = reqwest::Client::new()
        .post(srv.url("/api/send"))
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["details"]["to"], "this field is required");
    assert_eq!(store.len(EMAIL_QUEUE).unwrap(), 0);
}

#[tokio::test]
async fn store_outage_is_reported_as_500() {
    let srv = TestServer::spawn(Arc::new(UnreachableStore)).await;

    let res = reqwest::Client::new()
        .post(srv.url("/api/send"))
        .json(&send_body())
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "failed to queue email");
    assert!(body["details"]["reason"]
        .as_str()
        .unwrap()
        .contains("connection refused"));
    assert!(body["requestId"].is_string());
}

#[tokio::test]
async fn bulk_send_reports_partial_success() {
    let store = InMemoryQueueStore::arc();
    let srv = TestServer::spawn(store.clone()).await;

    let mut bad = send_body();
    bad["to"] = json!("nope");
    let res = reqwest::Client::new()
        .post(srv.url("/api/bulk-send"))
        .json(&json!({ "emails": [send_body(), bad] }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["successCount"], 1);
    assert_eq!(body["failedCount"], 1);
    assert_eq!(body["successEmails"], json!(["a@x.com"]));
    assert_eq!(body["failedEmails"], json!(["nope"]));
    assert_eq!(queued(&store).len(), 1);
}

#[tokio::test]
async fn bulk_send_all_ok_is_accepted() {
    let store = InMemoryQueueStore::arc();
    let srv = TestServer::spawn(store.clone()).await;

    let emails: Vec<_> = (0..50)
        .map(|i| {
            let mut body = send_body();
            body["to"] = json!(format!("user{i}@x.com"));
            body
        })
        .collect();
    let res = reqwest::Client::new()
        .post(srv.url("/api/bulk-send"))
        .json(&json!({ "emails": emails }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["successCount"], 50);
    assert!(body.get("failedCount").is_none());
    assert_eq!(store.len(EMAIL_QUEUE).unwrap(), 50);
}

#[tokio::test]
async fn bulk_send_rejects_empty_and_oversized_batches() {
    let store = InMemoryQueueStore::arc();
    let srv = TestServer::spawn(store.clone()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/bulk-send"))
        .json(&json!({ "emails": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid bulk email request");

    let emails: Vec<_> = (0..51).map(|_| send_body()).collect();
    let res = client
        .post(srv.url("/api/bulk-send"))
        .json(&json!({ "emails": emails }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(store.len(EMAIL_QUEUE).unwrap(), 0);
}

#[tokio::test]
async fn cors_headers_and_options() {
    let srv = TestServer::spawn(InMemoryQueueStore::arc()).await;
    let client = reqwest::Client::new();

    let preflight = client
        .request(reqwest::Method::OPTIONS, srv.url("/api/send"))
        .header("origin", "https://app.example.com")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status(), StatusCode::OK);
    assert_eq!(preflight.headers()["access-control-allow-origin"], "*");

    let bare = client
        .request(reqwest::Method::OPTIONS, srv.url("/api/send"))
        .send()
        .await
        .unwrap();
    assert_eq!(bare.status(), StatusCode::OK);

    let res = client
        .get(srv.url("/health"))
        .header("origin", "https://app.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
}

/// Records every delivery; fails the first `failures` attempts.
struct RecordingTransport {
    failures: AtomicUsize,
    sent: Mutex<Vec<(String, String)>>,
}

impl MailTransport for RecordingTransport {
    fn deliver(&self, to: &str, _subject: &str, html_body: &str) -> Result<(), TransportError> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Build("421 try again later".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), html_body.to_string()));
        Ok(())
    }
}

#[tokio::test]
async fn intake_to_delivery_with_one_retry() {
    let store = InMemoryQueueStore::arc();
    let srv = TestServer::spawn(store.clone()).await;

    let transport = Arc::new(RecordingTransport {
        failures: AtomicUsize::new(1),
        sent: Mutex::new(Vec::new()),
    });
    let worker = QueueWorker::new(
        EmailQueue::new(store.clone()),
        EmailSender::new(TemplateRegistry::builtin().unwrap(), transport.clone()),
        WorkerConfig::default()
            .with_poll_interval(Duration::from_millis(20))
            .with_retry(RetryPolicy::fixed(3, Duration::ZERO)),
    )
    .spawn()
    .unwrap();

    let res = reqwest::Client::new()
        .post(srv.url("/api/send"))
        .json(&send_body())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    for _ in 0..250 {
        if worker.stats().delivered == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let stats = worker.stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.requeued, 1);
    tokio::task::spawn_blocking(move || worker.shutdown())
        .await
        .unwrap();

    let sent = transport.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "a@x.com");
    assert!(sent[0].1.contains("Bob"));
    assert!(store.is_empty(EMAIL_QUEUE).unwrap());
}
