//! End-to-end tests driving a started mock server over localhost.

use anyhow::Result;
use serde_json::{json, Value};
use standin::{InteractionSpec, MockServer, Settings};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn interaction(value: Value) -> InteractionSpec {
    serde_json::from_value(value).expect("valid interaction json")
}

async fn started() -> (MockServer, String) {
    let server = MockServer::default();
    let addr = server.start_on(0, "127.0.0.1").await.expect("start");
    let base = format!("http://{addr}");
    (server, base)
}

#[tokio::test]
async fn serves_canned_response_for_matching_request() -> Result<()> {
    let (server, base) = started().await;
    let id = server.add_interaction(interaction(json!({
        "request": { "method": "GET", "path": "/api/projects/1" },
        "response": {
            "status": 200,
            "headers": { "content-type": "application/json" },
            "body": { "id": 1, "name": "fake" }
        }
    })))?;

    let response = reqwest::get(format!("{base}/api/projects/1")).await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body, json!({ "id": 1, "name": "fake" }));

    assert_eq!(server.get_interaction(&id).unwrap().exercised_calls(), 1);
    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn unmatched_request_returns_default_not_found_and_is_logged() -> Result<()> {
    let (server, base) = started().await;

    let response = reqwest::get(format!("{base}/api/unknown")).await?;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await?;
    assert_eq!(body["error"], "No interaction found");
    assert_eq!(body["method"], "GET");
    assert_eq!(body["path"], "/api/unknown");

    let unmatched = server.unmatched_requests();
    assert_eq!(unmatched.len(), 1);
    assert_eq!(unmatched[0].method, "GET");
    assert_eq!(unmatched[0].path, "/api/unknown");

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn most_recently_added_interaction_wins_ties() -> Result<()> {
    let (server, base) = started().await;
    server.add_interaction(interaction(json!({
        "request": { "method": "GET", "path": "/api/projects/1" },
        "response": { "body": { "from": "A" } }
    })))?;
    server.add_interaction(interaction(json!({
        "request": { "method": "GET", "path": "/api/projects/1" },
        "response": { "body": { "from": "B" } }
    })))?;

    let body: Value = reqwest::get(format!("{base}/api/projects/1"))
        .await?
        .json()
        .await?;
    assert_eq!(body, json!({ "from": "B" }));

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn removed_interaction_no_longer_matches() -> Result<()> {
    let (server, base) = started().await;
    let id = server.add_interaction(interaction(json!({
        "request": { "method": "GET", "path": "/api/projects/1" },
        "response": { "body": { "id": 1 } }
    })))?;

    server.remove_interaction(&id);
    assert!(server.get_interaction(&id).is_none());
    assert!(server.store().is_empty());

    let response = reqwest::get(format!("{base}/api/projects/1")).await?;
    assert_eq!(response.status(), 404);

    // Removing again is a no-op.
    server.remove_interaction(&id);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn batch_registration_returns_ids_in_array_order() -> Result<()> {
    let (server, base) = started().await;
    let ids = server.add_interactions(vec![
        interaction(json!({
            "request": { "method": "GET", "path": "/api/projects/1" },
            "response": { "body": { "name": "fake" } }
        })),
        interaction(json!({
            "request": { "method": "GET", "path": "/api/projects/2" },
            "response": { "body": { "name": "bake" } }
        })),
    ])?;
    assert_eq!(ids.len(), 2);
    assert_eq!(server.get_interaction(&ids[0]).unwrap().request.path, "/api/projects/1");
    assert_eq!(server.get_interaction(&ids[1]).unwrap().request.path, "/api/projects/2");

    let body: Value = reqwest::get(format!("{base}/api/projects/2"))
        .await?
        .json()
        .await?;
    assert_eq!(body, json!({ "name": "bake" }));

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn persistent_interactions_survive_the_sweep() -> Result<()> {
    let (server, base) = started().await;
    server.add_interaction(interaction(json!({
        "request": { "method": "GET", "path": "/api/ephemeral" },
        "response": { "body": "gone" }
    })))?;
    server.add_interaction(interaction(json!({
        "persistent": true,
        "request": { "method": "GET", "path": "/api/fixture" },
        "response": { "body": "kept" }
    })))?;

    server.clear_interactions();
    assert_eq!(server.store().len(), 1);

    assert_eq!(
        reqwest::get(format!("{base}/api/ephemeral")).await?.status(),
        404
    );
    assert_eq!(
        reqwest::get(format!("{base}/api/fixture")).await?.status(),
        200
    );

    server.clear_all_interactions();
    assert!(server.store().is_empty());

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn response_delay_is_applied_before_writing() -> Result<()> {
    let (server, base) = started().await;
    server.add_interaction(interaction(json!({
        "request": { "method": "GET", "path": "/api/slow" },
        "response": { "status": 200, "delay": 150 }
    })))?;

    let started_at = Instant::now();
    let response = reqwest::get(format!("{base}/api/slow")).await?;
    assert_eq!(response.status(), 200);
    assert!(started_at.elapsed() >= Duration::from_millis(150));

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn templated_body_substitutes_request_and_store_tokens() -> Result<()> {
    let (server, base) = started().await;
    server.data().set("token", "s3cret");
    server.add_interaction(interaction(json!({
        "request": { "method": "GET", "path": "/api/projects/{id}" },
        "response": {
            "body": {
                "id": "${request.pathParams.id}",
                "path": "${request.path}",
                "auth": "Bearer ${stores.token}"
            }
        }
    })))?;

    let body: Value = reqwest::get(format!("{base}/api/projects/42"))
        .await?
        .json()
        .await?;
    assert_eq!(
        body,
        json!({
            "id": "42",
            "path": "/api/projects/42",
            "auth": "Bearer s3cret"
        })
    );

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn function_produced_body_and_on_call_callback() -> Result<()> {
    let (server, base) = started().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);

    let mut spec = interaction(json!({
        "request": { "method": "GET", "path": "/api/echo" }
    }));
    spec.response.render = Some(standin::BodyFn(Arc::new(|observed| {
        json!({ "echo": observed.path })
    })));
    spec.response.on_call = Some(standin::OnCallFn(Arc::new(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    })));
    server.add_interaction(spec)?;

    let body: Value = reqwest::get(format!("{base}/api/echo")).await?.json().await?;
    assert_eq!(body, json!({ "echo": "/api/echo" }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn default_headers_are_added_to_every_response() -> Result<()> {
    let mut settings = Settings::default();
    settings
        .default_headers
        .insert("x-powered-by".to_string(), "standin".to_string());
    let server = MockServer::new(settings);
    let addr = server.start_on(0, "127.0.0.1").await?;

    server.add_interaction(interaction(json!({
        "request": { "method": "GET", "path": "/api" },
        "response": { "body": "ok" }
    })))?;

    let response = reqwest::get(format!("http://{addr}/api")).await?;
    assert_eq!(response.headers()["x-powered-by"], "standin");

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn response_header_overrides_default_of_the_same_name() -> Result<()> {
    let mut settings = Settings::default();
    settings
        .default_headers
        .insert("content-type".to_string(), "text/plain".to_string());
    let server = MockServer::new(settings);
    let addr = server.start_on(0, "127.0.0.1").await?;

    server.add_interaction(interaction(json!({
        "request": { "method": "GET", "path": "/api" },
        "response": {
            "headers": { "content-type": "application/json" },
            "body": { "ok": true }
        }
    })))?;

    let response = reqwest::get(format!("http://{addr}/api")).await?;
    let values: Vec<_> = response
        .headers()
        .get_all("content-type")
        .iter()
        .map(|v| v.to_str().unwrap_or(""))
        .collect();
    assert_eq!(values, vec!["application/json"]);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn call_count_expectations_are_tracked() -> Result<()> {
    let (server, base) = started().await;
    let exact_two = server.add_interaction(interaction(json!({
        "request": { "method": "GET", "path": "/api/twice" },
        "expectedCalls": 2,
        "response": { "body": "ok" }
    })))?;
    server.add_interaction(interaction(json!({
        "request": { "method": "GET", "path": "/api/optional" },
        "expectedCalls": 0,
        "response": { "body": "ok" }
    })))?;

    // Exercised once: the exact-two expectation is still unsatisfied, the
    // any-count one is satisfied without a single call.
    reqwest::get(format!("{base}/api/twice")).await?;
    let unsatisfied = server.unsatisfied_interactions();
    assert_eq!(unsatisfied.len(), 1);
    assert_eq!(unsatisfied[0].id, exact_two);

    reqwest::get(format!("{base}/api/twice")).await?;
    assert!(server.unsatisfied_interactions().is_empty());
    assert_eq!(server.get_interaction(&exact_two).unwrap().exercised_calls(), 2);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn evaluation_fault_returns_500_and_server_keeps_serving() -> Result<()> {
    let (server, base) = started().await;
    server.add_interaction(interaction(json!({
        "request": {
            "method": "GET",
            "path": "/api/broken",
            "queryParams": { "q": { "$match": "regex", "pattern": "[unclosed" } }
        }
    })))?;
    server.add_interaction(interaction(json!({
        "request": { "method": "GET", "path": "/api/healthy" },
        "response": { "body": "ok" }
    })))?;

    let response = reqwest::get(format!("{base}/api/broken?q=x")).await?;
    assert_eq!(response.status(), 500);

    // Subsequent requests are unaffected.
    let response = reqwest::get(format!("{base}/api/healthy")).await?;
    assert_eq!(response.status(), 200);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn registration_is_rejected_without_request_section() {
    let server = MockServer::default();
    let err = server
        .add_interaction(InteractionSpec::default())
        .unwrap_err();
    assert_eq!(err.to_string(), "`request` is required");
}

#[tokio::test]
async fn stopped_server_refuses_connections() -> Result<()> {
    let (server, base) = started().await;
    server.stop().await?;

    let result = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()?
        .get(format!("{base}/api"))
        .send()
        .await;
    assert!(result.is_err());
    Ok(())
}
