//! HTTP surface of the orchestrator, driven through the router in-process.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{HarnessBuilder, ScriptedExecutor};
use forge_core::domain::pipeline::{PhaseName, PhaseStatus, RunStatus};
use forge_core::dto::log::PipelineLogs;
use forge_core::dto::pipeline::{
    CancelAccepted, PageQuery, PipelinePage, PipelineRunView, RunAccepted,
};
use forge_orchestrator::store::PipelineStore;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

fn trigger_body() -> Value {
    json!({
        "repo_id": 7,
        "commit_sha": "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3",
        "notebook_ref": "notebooks/train.ipynb"
    })
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn read_json<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = HarnessBuilder::new(0.95).build();

    let response = h.router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_ready_reports_unreachable_model_server() {
    let h = HarnessBuilder::new(0.95).build();

    let response = h.router().oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = read_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["store"], true);
    assert_eq!(body["model_server"], false);
}

#[tokio::test]
async fn test_trigger_queues_run() {
    let h = HarnessBuilder::new(0.95).build();

    let response = h
        .router()
        .oneshot(post("/pipelines/runs", trigger_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let accepted: RunAccepted = read_json(response).await;
    assert_eq!(accepted.status, RunStatus::Queued);

    let run = h.wait_terminal(accepted.pipeline_id).await;
    assert_eq!(run.repo_id, 7);
    assert_eq!(run.status, RunStatus::Success);
}

#[tokio::test]
async fn test_invalid_trigger_is_rejected_and_not_stored() {
    let h = HarnessBuilder::new(0.95).build();

    let mut body = trigger_body();
    body["commit_sha"] = json!("not a sha");
    let response = h
        .router()
        .oneshot(post("/pipelines/runs", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let error: Value = read_json(response).await;
    assert!(error["error"].as_str().unwrap().contains("hex digest"));

    let (runs, total) = h.store.list(PageQuery::default()).await.unwrap();
    assert!(runs.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_get_unknown_pipeline_is_not_found() {
    let h = HarnessBuilder::new(0.95).build();
    let id = Uuid::new_v4();

    for uri in [format!("/pipelines/{}", id), format!("/pipelines/{}/logs", id)] {
        let response = h.router().oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }

    let response = h
        .router()
        .oneshot(post(&format!("/pipelines/{}/cancel", id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_pipeline_and_logs_after_completion() {
    let h = HarnessBuilder::new(0.95).build();
    let id = h.trigger().await;
    h.wait_terminal(id).await;

    let response = h
        .router()
        .oneshot(get(&format!("/pipelines/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let view: PipelineRunView = read_json(response).await;
    assert_eq!(view.run.id, id);
    assert_eq!(view.run.status, RunStatus::Success);
    assert!(!view.possibly_orphaned);
    assert_eq!(view.run.deployed(), Some(true));

    let response = h
        .router()
        .oneshot(get(&format!("/pipelines/{}/logs", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let logs: PipelineLogs = read_json(response).await;
    assert_eq!(logs.pipeline_id, id);
    assert_eq!(logs.logs.len(), 10);
    assert!(logs.logs.last().unwrap().is_terminal());
}

#[tokio::test]
async fn test_list_pipelines_pages_newest_first() {
    let h = HarnessBuilder::new(0.95).build();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(h.trigger().await);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let response = h
        .router()
        .oneshot(get("/pipelines?page=1&size=2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page: PipelinePage = read_json(response).await;
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].run.id, ids[2]);
    assert_eq!(page.items[1].run.id, ids[1]);

    let response = h
        .router()
        .oneshot(get("/pipelines?page=2&size=2"))
        .await
        .unwrap();
    let page: PipelinePage = read_json(response).await;
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].run.id, ids[0]);
}

#[tokio::test]
async fn test_list_pipelines_rejects_bad_paging() {
    let h = HarnessBuilder::new(0.95).build();

    for uri in ["/pipelines?size=0", "/pipelines?page=0", "/pipelines?size=1000"] {
        let response = h.router().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
    }
}

#[tokio::test]
async fn test_cancel_endpoint() {
    let (executor, gate) = ScriptedExecutor::held(0.95);
    let h = HarnessBuilder::new(0.95).executor(executor).workers(1).build();

    let first = h.trigger().await;
    h.wait_executing().await;
    let queued = h.trigger().await;

    let response = h
        .router()
        .oneshot(post(&format!("/pipelines/{}/cancel", queued), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted: CancelAccepted = read_json(response).await;
    assert_eq!(accepted.pipeline_id, queued);
    assert_eq!(accepted.status, RunStatus::Failed);

    gate.add_permits(1);
    h.wait_terminal(first).await;

    let response = h
        .router()
        .oneshot(post(&format!("/pipelines/{}/cancel", first), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let run = h.store.get(queued).await.unwrap().unwrap();
    assert_eq!(run.phase(PhaseName::Download).unwrap().status, PhaseStatus::Failed);
}
