//! Shared fixtures for tests that talk to a model server.

use crate::config::Config;
use httpmock::prelude::*;
use httpmock::Mock;
use tokio::net::TcpListener;

/// Client config pointed at a local port, with autostart off.
pub fn local_config(port: u16) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port,
        autostart: false,
        ..Config::default()
    }
}

/// Serves `lines` as an NDJSON body for every `POST /api/generate`.
pub async fn mock_generate<'a>(server: &'a MockServer, lines: &[&str]) -> Mock<'a> {
    let body: String = lines.iter().map(|line| format!("{line}\n")).collect();
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200)
                .header("content-type", "application/x-ndjson")
                .body(&body);
        })
        .await
}

/// A port nothing is listening on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    listener
        .local_addr()
        .expect("listener should have an address")
        .port()
}
