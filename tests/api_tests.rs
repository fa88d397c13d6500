use axum::http::StatusCode;
use mockito::Server;
use pretty_assertions::assert_eq;
use serde_json::json;

mod common;
use common::test_helpers::*;

#[tokio::test]
async fn test_validate_returns_default_branch() {
    let mut server = Server::new_async().await;
    let repo_mock = mock_repository(&mut server, "octocat", "Hello-World", "master").await;
    let (app, _store) = create_test_app(create_test_config(&server)).await;

    let (status, body) = send(
        &app,
        "POST",
        "/thinktest/github/validate",
        Some("7"),
        Some(json!({ "repository_url": "https://github.com/octocat/Hello-World" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["repository"]["full_name"], "octocat/Hello-World");
    assert_eq!(body["repository"]["default_branch"], "master");
    assert_eq!(body["repository"]["size"], 108 * 1024);
    repo_mock.assert_async().await;
}

#[tokio::test]
async fn test_missing_user_header_is_unauthenticated() {
    let server = Server::new_async().await;
    let (app, _store) = create_test_app(create_test_config(&server)).await;

    for user in [None, Some("not-a-number")] {
        let (status, body) = send(
            &app,
            "POST",
            "/thinktest/github/validate",
            user,
            Some(json!({ "repository_url": "octocat/Hello-World" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "unauthenticated");
    }
}

#[tokio::test]
async fn test_invalid_url_is_422_without_network() {
    let mut server = Server::new_async().await;
    let untouched = server
        .mock("GET", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let (app, _store) = create_test_app(create_test_config(&server)).await;

    for url in ["javascript:alert(1)", "https://gitlab.com/a/b", "octocat", ""] {
        let (status, body) = send(
            &app,
            "POST",
            "/thinktest/github/validate",
            Some("7"),
            Some(json!({ "repository_url": url })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", url);
        assert_eq!(body["error_code"], "validation_error");
        assert_eq!(body["retry_possible"], false);
        assert!(body["errors"]["repository_url"].is_array());
    }
    untouched.assert_async().await;
}

#[tokio::test]
async fn test_unknown_repository_is_404() {
    let mut server = Server::new_async().await;
    let _m = server
        .mock("GET", "/repos/octocat/missing")
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message": "Not Found"}"#)
        .create_async()
        .await;
    let (app, _store) = create_test_app(create_test_config(&server)).await;

    let (status, body) = send(
        &app,
        "POST",
        "/thinktest/github/validate",
        Some("7"),
        Some(json!({ "repository_url": "octocat/missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "not_found");
}

#[tokio::test]
async fn test_rate_limit_rejects_the_extra_request() {
    let mut server = Server::new_async().await;
    let _m = mock_repository(&mut server, "octocat", "Hello-World", "master").await;
    let mut config = create_test_config(&server);
    config.rate_limits.per_minute = 3;
    let (app, _store) = create_test_app(config).await;

    let request = json!({ "repository_url": "octocat/Hello-World" });
    for _ in 0..3 {
        let (status, _) = send(&app, "POST", "/thinktest/github/validate", Some("9"), Some(request.clone())).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&app, "POST", "/thinktest/github/validate", Some("9"), Some(request.clone())).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error_code"], "rate_limit_exceeded");
    assert_eq!(body["retry_possible"], true);
    let retry_after = body["retry_after"].as_u64().unwrap();
    assert!((1..=60).contains(&retry_after));

    // Another user has their own budget.
    let (status, _) = send(&app, "POST", "/thinktest/github/validate", Some("10"), Some(request)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_url_does_not_spend_rate_budget() {
    let mut server = Server::new_async().await;
    let _m = mock_repository(&mut server, "octocat", "Hello-World", "master").await;
    let mut config = create_test_config(&server);
    config.rate_limits.per_minute = 1;
    let (app, _store) = create_test_app(config).await;

    for _ in 0..3 {
        let (status, _) = send(
            &app,
            "POST",
            "/thinktest/github/validate",
            Some("9"),
            Some(json!({ "repository_url": "javascript:alert(1)" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    let (status, _) = send(
        &app,
        "POST",
        "/thinktest/github/validate",
        Some("9"),
        Some(json!({ "repository_url": "octocat/Hello-World" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_single_branch_repository_lists_one_branch() {
    let mut server = Server::new_async().await;
    let _m = server
        .mock("GET", "/repos/acme/solo/branches")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"name": "main", "commit": {"sha": "c0ffee", "url": "https://api.github.com/c"}, "protected": false}]"#)
        .expect(1)
        .create_async()
        .await;
    let (app, _store) = create_test_app(create_test_config(&server)).await;
    let request = json!({ "owner": "acme", "repo": "solo" });

    let (status, body) = send(&app, "POST", "/thinktest/github/branches", Some("3"), Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["branches"].as_array().unwrap().len(), 1);
    assert_eq!(body["branches"][0]["name"], "main");
    assert_eq!(body["cached"], false);

    // Second call is served from the cache.
    let (status, body) = send(&app, "POST", "/thinktest/github/branches", Some("3"), Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cached"], true);
    assert_eq!(body["branches"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_file_endpoint_strips_nul_bytes() {
    let mut server = Server::new_async().await;
    let _m = mock_file(&mut server, "acme", "plugin", "src/evil.php", "<?php\0 echo 1;\0").await;
    let (app, _store) = create_test_app(create_test_config(&server)).await;

    let (status, body) = send(
        &app,
        "POST",
        "/thinktest/github/file",
        Some("3"),
        Some(json!({ "owner": "acme", "repo": "plugin", "path": "src/evil.php", "branch": "main" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["file"]["content"], "<?php echo 1;");
    assert_eq!(body["file"]["path"], "src/evil.php");
}

#[tokio::test]
async fn test_file_endpoint_rejects_traversal() {
    let server = Server::new_async().await;
    let (app, _store) = create_test_app(create_test_config(&server)).await;

    let (status, body) = send(
        &app,
        "POST",
        "/thinktest/github/file",
        Some("3"),
        Some(json!({ "owner": "acme", "repo": "plugin", "path": "../../etc/passwd", "branch": "main" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_process_hello_dolly() {
    let mut server = Server::new_async().await;
    let _mocks = mock_hello_dolly(&mut server).await;
    let (app, store) = create_test_app(create_test_config(&server)).await;

    let (status, body) = send(
        &app,
        "POST",
        "/thinktest/github/process",
        Some("5"),
        Some(json!({
            "owner": "WordPress",
            "repo": "hello-dolly",
            "branch": "trunk",
            "provider": "openai",
            "framework": "phpunit"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert!(body["conversation_id"].as_str().is_some_and(|id| !id.is_empty()));

    let repository = &body["repository"];
    assert_eq!(repository["processing_status"], "completed");
    assert_eq!(repository["file_count"], 3);
    assert_eq!(repository["plugin_structure"]["has_manifest"], true);
    assert_eq!(repository["plugin_structure"]["main_file"], "hello.php");

    let metadata = &body["metadata"];
    // No LLM endpoint in tests, so the offline scaffold answers.
    assert_eq!(metadata["provider"], "scaffold");
    assert_eq!(metadata["model"], "scaffold");
    assert_eq!(metadata["framework"], "phpunit");
    assert_eq!(metadata["files_processed"], 3);
    assert_eq!(metadata["files_skipped"], 0);
    assert_eq!(metadata["content_hash"].as_str().unwrap().len(), 64);

    assert_eq!(body["analysis"]["functions"][0], "hello_dolly");
    assert!(body["tests"].as_str().unwrap().contains("WP_UnitTestCase"));
    assert_eq!(store.count_repositories(5).await.unwrap(), 1);
}

#[tokio::test]
async fn test_reprocessing_updates_instead_of_duplicating() {
    let mut server = Server::new_async().await;
    let _mocks = mock_hello_dolly(&mut server).await;
    let (app, store) = create_test_app(create_test_config(&server)).await;

    let request = |provider: &str| {
        json!({
            "owner": "WordPress",
            "repo": "hello-dolly",
            "branch": "trunk",
            "provider": provider,
            "framework": "pest"
        })
    };

    let (status, first) = send(&app, "POST", "/thinktest/github/process", Some("5"), Some(request("openai"))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, second) = send(&app, "POST", "/thinktest/github/process", Some("5"), Some(request("anthropic"))).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(first["repository"]["id"], second["repository"]["id"]);
    assert_eq!(first["metadata"]["content_hash"], second["metadata"]["content_hash"]);
    assert_eq!(store.count_repositories(5).await.unwrap(), 1);
    assert_eq!(store.count_analyses().await.unwrap(), 1);

    let hash = second["metadata"]["content_hash"].as_str().unwrap();
    let analysis = store.find_analysis_by_hash(hash).await.unwrap().unwrap();
    assert_eq!(analysis.provider, "anthropic");
    assert_eq!(analysis.framework, "pest");
}

#[tokio::test]
async fn test_process_rejects_unknown_provider() {
    let server = Server::new_async().await;
    let (app, store) = create_test_app(create_test_config(&server)).await;

    let (status, body) = send(
        &app,
        "POST",
        "/thinktest/github/process",
        Some("5"),
        Some(json!({
            "owner": "WordPress",
            "repo": "hello-dolly",
            "branch": "trunk",
            "provider": "mystery",
            "framework": "phpunit"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["provider"].is_array());
    assert_eq!(store.count_repositories(5).await.unwrap(), 0);
}

#[tokio::test]
async fn test_health_needs_no_user() {
    let server = Server::new_async().await;
    let (app, _store) = create_test_app(create_test_config(&server)).await;

    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_rate_limit_diagnostics() {
    let mut server = Server::new_async().await;
    let _m = server
        .mock("GET", "/rate_limit")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"resources": {"core": {"limit": 5000, "remaining": 4999, "reset": 1700000000, "used": 1}}}"#)
        .create_async()
        .await;
    let (app, _store) = create_test_app(create_test_config(&server)).await;

    let (status, body) = send(&app, "GET", "/thinktest/github/diagnostics/rate-limit", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rate_limit"]["limit"], 5000);
    assert_eq!(body["rate_limit"]["remaining"], 4999);
}
