//! HTTP surface tests against a real listener.

use std::io::Write;
use std::sync::Arc;

use profile_vault::config::Config;
use profile_vault::lifecycle::Lifecycle;
use profile_vault::server::router;
use profile_vault_core::store::memory::{InMemoryBackupStore, InMemoryObjectStore};
use serde_json::Value;

fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, data) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(data.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

async fn spawn_server() -> String {
    let config: Config =
        toml::from_str("[db]\npath = \"unused.sqlite\"\n[storage]\nroot = \"unused\"\n").unwrap();
    let lifecycle = Lifecycle::new(
        Arc::new(InMemoryBackupStore::new()),
        Arc::new(InMemoryObjectStore::new()),
        Arc::new(config),
    );
    let app = router(Arc::new(lifecycle));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn export() -> Vec<u8> {
    build_zip(&[
        (
            "Connections.csv",
            "First Name,Last Name,URL,Email Address,Company,Position,Connected On\n\
             Grace,Hopper,https://x/g,,Navy,Admiral,01 Jan 2023\n",
        ),
        ("Skills.csv", "Name\nCOBOL\nCompilers\n"),
    ])
}

#[tokio::test]
async fn test_health() {
    let base = spawn_server().await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_submit_process_snapshot_flow() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/backups", base))
        .header("x-user-id", "grace")
        .header("x-tier", "enriched")
        .body(export())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["duplicate"], false);
    assert_eq!(body["backup"]["status"], "pending");
    assert_eq!(body["backup"]["tier"], "enriched");
    let id = body["backup"]["id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{}/backups/{}/process", base, id))
        .header("x-user-id", "grace")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["outcome"], "processed");
    assert_eq!(body["backup"]["status"], "ready");
    assert_eq!(body["backup"]["contains"]["skills"], true);
    assert_eq!(body["backup"]["contains"]["positions"], false);

    let snapshot: Value = client
        .get(format!("{}/backups/{}/snapshot", base, id))
        .header("x-user-id", "grace")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(snapshot["stats"]["counts"]["skills"], 2);
    assert_eq!(snapshot["report"]["source"], "fallback");

    let body: Value = client
        .post(format!("{}/backups/{}/process", base, id))
        .header("x-user-id", "grace")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["outcome"], "already_ready");
}

#[tokio::test]
async fn test_error_contract() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    // Missing identity
    let resp = client
        .post(format!("{}/backups", base))
        .body(export())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    // Bad tier
    let resp = client
        .post(format!("{}/backups", base))
        .header("x-user-id", "grace")
        .header("x-tier", "platinum")
        .body(export())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Unknown id
    let resp = client
        .get(format!("{}/backups/nope", base))
        .header("x-user-id", "grace")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_other_users_backups_are_hidden() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/backups", base))
        .header("x-user-id", "grace")
        .body(export())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = body["backup"]["id"].as_str().unwrap().to_string();

    for (method, path) in [
        ("GET", format!("/backups/{}", id)),
        ("POST", format!("/backups/{}/process", id)),
    ] {
        let url = format!("{}{}", base, path);
        let request = if method == "GET" {
            client.get(url)
        } else {
            client.post(url)
        };
        let resp = request.header("x-user-id", "mallory").send().await.unwrap();
        assert_eq!(resp.status(), 404, "{} {}", method, path);
    }
}

#[tokio::test]
async fn test_rejected_archive_reports_error_status() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let evil = build_zip(&[("/etc/cron.d/job", "* * * * * root true")]);
    let body: Value = client
        .post(format!("{}/backups", base))
        .header("x-user-id", "grace")
        .body(evil)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = body["backup"]["id"].as_str().unwrap().to_string();

    let body: Value = client
        .post(format!("{}/backups/{}/process", base, id))
        .header("x-user-id", "grace")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["outcome"], "failed");
    assert_eq!(body["backup"]["status"], "error");
    assert!(body["backup"]["error_message"]
        .as_str()
        .unwrap()
        .contains("escapes"));

    let resp = client
        .get(format!("{}/backups/{}/snapshot", base, id))
        .header("x-user-id", "grace")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
