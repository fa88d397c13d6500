#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::{json, Value};
use thinktest_ingest::config::Config;
use thinktest_ingest::{create_app, AppState, RepositoryStore, SqliteStore};
use tower::ServiceExt;

pub mod test_helpers {
    use super::*;

    pub const HELLO_PHP: &str = "<?php\n/**\n * Plugin Name: Hello Dolly\n * Version: 1.7.2\n */\nfunction hello_dolly() {\n    echo 'Hello, Dolly';\n}\nadd_action( 'admin_notices', 'hello_dolly' );\n";
    pub const README_TXT: &str = "=== Hello Dolly ===\nContributors: matt\n";
    pub const COMPOSER_JSON: &str = "{\"name\": \"wordpress/hello-dolly\"}\n";

    /// Default config pointed at the mock server, with an in-memory database
    pub fn create_test_config(server: &ServerGuard) -> Config {
        let mut config = Config::default();
        config.github.api_base_url = server.url();
        config.github.token = Some("ghp_test".to_string());
        config.database.url = "sqlite::memory:".to_string();
        config
    }

    /// State and store wired around an in-memory SQLite database
    pub async fn create_test_state(config: Config) -> (AppState, Arc<dyn RepositoryStore>) {
        let store: Arc<dyn RepositoryStore> =
            Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
        let state = AppState::new(config, Arc::clone(&store)).unwrap();
        (state, store)
    }

    pub async fn create_test_app(config: Config) -> (Router, Arc<dyn RepositoryStore>) {
        let (state, store) = create_test_state(config).await;
        (create_app(state), store)
    }

    /// Sends one request and decodes the JSON body
    pub async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        user_id: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user) = user_id {
            builder = builder.header("x-user-id", user);
        }
        let body = match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn mock_repository(
        server: &mut ServerGuard,
        owner: &str,
        repo: &str,
        default_branch: &str,
    ) -> Mock {
        server
            .mock("GET", format!("/repos/{}/{}", owner, repo).as_str())
            .with_status(200)
            .with_header("content-type", "application/json; charset=utf-8")
            .with_body(
                json!({
                    "id": 1296269,
                    "name": repo,
                    "full_name": format!("{}/{}", owner, repo),
                    "description": "This is your first repo!",
                    "private": false,
                    "default_branch": default_branch,
                    "size": 108,
                    "language": "PHP",
                    "clone_url": format!("https://github.com/{}/{}.git", owner, repo),
                    "html_url": format!("https://github.com/{}/{}", owner, repo),
                    "updated_at": "2024-01-26T19:14:43Z"
                })
                .to_string(),
            )
            .create_async()
            .await
    }

    pub async fn mock_tree(
        server: &mut ServerGuard,
        owner: &str,
        repo: &str,
        branch: &str,
        paths: &[&str],
    ) -> Mock {
        let items: Vec<Value> = paths
            .iter()
            .map(|path| {
                json!({
                    "path": path,
                    "mode": "100644",
                    "type": "blob",
                    "sha": format!("sha-{}", path),
                    "size": 120,
                    "url": format!("https://api.github.com/repos/{}/{}/git/blobs/sha", owner, repo)
                })
            })
            .collect();

        server
            .mock(
                "GET",
                format!("/repos/{}/{}/git/trees/{}", owner, repo, branch).as_str(),
            )
            .match_query(Matcher::UrlEncoded("recursive".into(), "1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "sha": "abc", "tree": items, "truncated": false }).to_string())
            .create_async()
            .await
    }

    pub async fn mock_file(
        server: &mut ServerGuard,
        owner: &str,
        repo: &str,
        path: &str,
        content: &str,
    ) -> Mock {
        let name = path.rsplit('/').next().unwrap_or(path);
        server
            .mock(
                "GET",
                format!("/repos/{}/{}/contents/{}", owner, repo, path).as_str(),
            )
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "type": "file",
                    "encoding": "base64",
                    "size": content.len(),
                    "name": name,
                    "path": path,
                    "content": encode_wrapped(content),
                    "sha": format!("sha-{}", path),
                    "url": format!("https://api.github.com/repos/{}/{}/contents/{}", owner, repo, path),
                    "html_url": format!("https://github.com/{}/{}/blob/trunk/{}", owner, repo, path),
                    "download_url": format!("https://raw.githubusercontent.com/{}/{}/trunk/{}", owner, repo, path)
                })
                .to_string(),
            )
            .create_async()
            .await
    }

    /// Mocks the repository, its `trunk` tree and three files
    pub async fn mock_hello_dolly(server: &mut ServerGuard) -> Vec<Mock> {
        let (owner, repo) = ("WordPress", "hello-dolly");
        vec![
            mock_repository(server, owner, repo, "trunk").await,
            mock_tree(
                server,
                owner,
                repo,
                "trunk",
                &["composer.json", "hello.php", "readme.txt"],
            )
            .await,
            mock_file(server, owner, repo, "hello.php", HELLO_PHP).await,
            mock_file(server, owner, repo, "readme.txt", README_TXT).await,
            mock_file(server, owner, repo, "composer.json", COMPOSER_JSON).await,
        ]
    }

    /// Base64 with GitHub's 60 column line wrapping
    pub fn encode_wrapped(content: &str) -> String {
        let encoded = STANDARD.encode(content.as_bytes());
        encoded
            .as_bytes()
            .chunks(60)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
