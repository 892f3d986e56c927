use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::{json, Value};

/// Fixed admin secret installed via POSTGATE_ADMIN_TOKEN so the suite can
/// authenticate without scraping the startup log.
pub const ADMIN_TOKEN: &str =
    "pg_deadbeefcafebabedeadbeefcafebabedeadbeefcafebabedeadbeefcafebabe";

static SERVER: OnceLock<TestServer> = OnceLock::new();

/// Suites that need a live host database skip themselves without one.
pub fn database_available() -> bool {
    std::env::var("DATABASE_URL").is_ok()
}

pub struct TestServer {
    pub base_url: String,
    #[allow(dead_code)]
    child: Child,
}

impl TestServer {
    fn spawn() -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        // Spawn the already-built binary to keep start fast during tests.
        // Assumes debug profile; adjust if you run tests with --release.
        let mut cmd = Command::new("target/debug/postgate");
        cmd.env("POSTGATE_HOST", "127.0.0.1")
            .env("POSTGATE_PORT", port.to_string())
            .env("POSTGATE_ADMIN_TOKEN", ADMIN_TOKEN)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        // DATABASE_URL is inherited from the environment.
        let child = cmd.spawn().context("failed to spawn server binary")?;

        Ok(Self { base_url, child })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!(
            "server did not become ready on {} within {:?}",
            self.base_url,
            timeout
        )
    }
}

pub async fn ensure_server() -> Result<&'static TestServer> {
    let server = SERVER.get_or_init(|| TestServer::spawn().expect("failed to spawn server binary"));
    server.wait_ready(Duration::from_secs(15)).await?;
    Ok(server)
}

/// POST /query with a bearer token.
pub async fn post_query(
    base_url: &str,
    token: &str,
    sql: &str,
    params: Value,
) -> Result<reqwest::Response> {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/query", base_url))
        .bearer_auth(token)
        .json(&json!({ "sql": sql, "params": params }))
        .send()
        .await?;
    Ok(resp)
}

/// POST /query expecting success; returns the parsed body.
pub async fn query_ok(base_url: &str, token: &str, sql: &str, params: Value) -> Result<Value> {
    let resp = post_query(base_url, token, sql, params).await?;
    let status = resp.status();
    let body: Value = resp.json().await?;
    anyhow::ensure!(
        status == StatusCode::OK,
        "expected 200 for {sql:?}, got {status}: {body}"
    );
    Ok(body)
}

/// POST /query expecting a failure; returns `(status, code, body)`.
pub async fn query_err(
    base_url: &str,
    token: &str,
    sql: &str,
    params: Value,
) -> Result<(StatusCode, String, Value)> {
    let resp = post_query(base_url, token, sql, params).await?;
    let status = resp.status();
    let body: Value = resp.json().await?;
    anyhow::ensure!(
        status != StatusCode::OK,
        "expected failure for {sql:?}, got 200: {body}"
    );
    let code = body["code"].as_str().unwrap_or_default().to_string();
    Ok((status, code, body))
}
