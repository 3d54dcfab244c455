//! Running service, origin server and SSE helpers

use bulkzip::{BulkZip, Config, ProgressEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A service listening on an ephemeral local port
pub struct TestServer {
    pub service: Arc<BulkZip>,
    pub address: SocketAddr,
    pub handle: JoinHandle<bulkzip::Result<()>>,
    pub client: reqwest::Client,
    pub dir: TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    /// Register links and return the collection id
    pub async fn create_collection(&self, links: &[String]) -> String {
        let response = self
            .client
            .post(self.url("/api/collections"))
            .json(&serde_json::json!({ "links": links }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);

        let body: serde_json::Value = response.json().await.unwrap();
        body["id"].as_str().unwrap().to_string()
    }

    /// Run a build to the end and return its events
    pub async fn build(&self, collection_id: &str) -> Vec<ProgressEvent> {
        let response = self
            .client
            .get(self.url(&format!("/api/zip-progress/{}", collection_id)))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        parse_sse(&response.text().await.unwrap())
    }
}

/// Start a service with test paths, letting `customize` adjust the config
pub async fn start_server(customize: impl FnOnce(&mut Config)) -> TestServer {
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.storage.blob_dir = dir.path().join("blobs");
    config.persistence.database_path = dir.path().join("bulkzip.db");
    customize(&mut config);

    let service = Arc::new(BulkZip::new(config).await.unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let handle = tokio::spawn(bulkzip::api::serve(listener, service.clone()));

    TestServer {
        service,
        address,
        handle,
        client: reqwest::Client::new(),
        dir,
    }
}

/// Decode the `data:` records of an SSE body
pub fn parse_sse(body: &str) -> Vec<ProgressEvent> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim_start()).unwrap())
        .collect()
}

/// Serve `body` at `route` on the origin
pub async fn mount_file(origin: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(origin)
        .await;
}

/// Answer `route` with an error status
pub async fn mount_status(origin: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(origin)
        .await;
}

/// Deterministic, poorly compressible payload
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    let mut state = u32::from(seed) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xff) as u8
        })
        .collect()
}

/// Assert start-first, non-decreasing `current`, terminal-last ordering
pub fn assert_well_ordered(events: &[ProgressEvent]) {
    assert!(
        matches!(events.first(), Some(ProgressEvent::Start { .. })),
        "first event must be start: {:?}",
        events.first()
    );

    let mut last_current = 0;
    for (index, event) in events.iter().enumerate() {
        let current = match event {
            ProgressEvent::Progress { current, .. } | ProgressEvent::Warning { current, .. } => {
                *current
            }
            _ => last_current,
        };
        assert!(current >= last_current, "current went backwards at {index}");
        last_current = current;

        if event.is_terminal() {
            assert_eq!(index, events.len() - 1, "terminal event must be last");
        }
    }
}
