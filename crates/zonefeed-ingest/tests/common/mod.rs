//! Shared fixtures for the integration tests

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zonefeed_ingest::config::{IngestConfig, ParallelConfig, ProcessorConfig, RetryConfig};
use zonefeed_ingest::czds::CzdsClient;

pub const AUTH_PATH: &str = "/api/authenticate";
pub const LINKS_PATH: &str = "/czds/downloads/links";
pub const TOKEN: &str = "token-1";

pub fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// Three ingestible records, one unsupported record and some noise
pub fn zone_file(tld: &str) -> Vec<u8> {
    gzip(&format!(
        "; {tld} zone\n\
         $ORIGIN {tld}.\n\
         example.{tld}. 172800 IN NS a.iana-servers.net.\n\
         example.{tld}. 172800 IN NS b.iana-servers.net.\n\
         \n\
         shop.{tld}. 3600 IN A 192.0.2.1\n\
         srv.{tld}. 3600 IN SRV 0 0 443 target.{tld}.\n"
    ))
}

pub async fn mount_auth(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path(AUTH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": token })))
        .mount(server)
        .await;
}

pub async fn mount_links(server: &MockServer, tlds: &[&str]) {
    let links: Vec<String> = tlds
        .iter()
        .map(|tld| format!("{}/czds/downloads/{tld}.zone", server.uri()))
        .collect();
    Mock::given(method("GET"))
        .and(path(LINKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(links))
        .mount(server)
        .await;
}

pub async fn mount_zone(server: &MockServer, tld: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/czds/downloads/{tld}.zone")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

pub async fn mount_status(server: &MockServer, tld: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/czds/downloads/{tld}.zone")))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Raw HTTP server that announces `announced` body bytes, sends `body` and
/// closes the connection
///
/// Returns the base URL and the number of accepted connections.
pub async fn short_body_server(body: Vec<u8>, announced: usize) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let accepted = connections.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            accepted.fetch_add(1, Ordering::SeqCst);
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {announced}\r\nConnection: close\r\n\r\n"
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{addr}"), connections)
}

/// Number of requests the server received for `request_path`
pub async fn request_count(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == request_path)
        .count()
}

/// Configuration pointed at the mock server, with short delays
pub fn test_config(server: &MockServer, temp_dir: &Path) -> IngestConfig {
    let mut config = IngestConfig::default();
    config.czds.username = "user@example.com".to_string();
    config.czds.password = "secret".to_string();
    config.czds.auth_url = format!("{}{AUTH_PATH}", server.uri());
    config.czds.api_url = server.uri();
    config.czds.request_timeout_secs = 5;
    config.czds.download_timeout_secs = 5;
    config.retry = RetryConfig {
        max_retries: 3,
        base_delay_ms: 10,
        max_delay_ms: 50,
        default_retry_after_secs: 0,
        max_rate_limit_waits: 10,
    };
    config.temp_dir = temp_dir.to_path_buf();
    config.batch_size = 2;
    config.processor = ProcessorConfig {
        workers: 2,
        chunk_size: 2,
        chunk_delay_ms: 0,
        gc_interval: 1,
        insert_attempts: 2,
        insert_backoff_ms: 10,
    };
    config.parallel = ParallelConfig {
        download_workers: 2,
        parse_workers: 2,
        chunk_size: 2,
    };
    config
}

pub fn client(config: &IngestConfig) -> Arc<CzdsClient> {
    Arc::new(CzdsClient::new(config.czds.clone(), config.retry).unwrap())
}
