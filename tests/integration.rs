//! Integration tests for the wafer yield HTTP server.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;

use waferyield::config::PipelineConfig;
use waferyield::model::{LabelEncoding, ModelArtifact, OutputConvention};
use waferyield::reports::ReportProfile;
use waferyield::server::{build_router, ServerConfig, ServerState};

// ---------------------------------------------------------------------------
// Helper: spin up a test server on an ephemeral port
// ---------------------------------------------------------------------------

struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    dir: TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// High `s1` drives failure; `s3` is in the schema but unused by the model.
fn artifact(convention: OutputConvention) -> ModelArtifact {
    ModelArtifact {
        name: "yield-lr".into(),
        version: "1".into(),
        features: vec!["s1".into(), "s2".into()],
        impute_means: vec![4.0, 0.2],
        scale_means: vec![4.0, 0.2],
        scale_stds: vec![2.0, 0.1],
        weights: vec![3.0, 0.5],
        intercept: 0.0,
        threshold: 0.5,
        output_convention: convention,
        label_encoding: LabelEncoding::Integer,
    }
}

fn write_model(dir: &Path, convention: OutputConvention) {
    std::fs::write(
        dir.join("model.json"),
        serde_json::to_string(&artifact(convention)).unwrap(),
    )
    .unwrap();
}

struct Options {
    api_key: Option<String>,
    with_model: bool,
    rate_limit_rpm: u32,
    report_profile: ReportProfile,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            api_key: None,
            with_model: true,
            rate_limit_rpm: 0, // no rate limiting in tests
            report_profile: ReportProfile::Full,
        }
    }
}

async fn spawn_test_server(options: Options) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("schema.json"), r#"["s1", "s2", "s3"]"#).unwrap();
    if options.with_model {
        write_model(dir.path(), OutputConvention::Current);
    }
    let reports = dir.path().join("reports");
    std::fs::create_dir_all(&reports).unwrap();
    std::fs::write(reports.join("AUC.png"), b"\x89PNG\r\n\x1a\nfake").unwrap();
    std::fs::write(reports.join("model_comparison.csv"), "model,auc\nlr,0.81\n").unwrap();
    std::fs::write(reports.join("secret.txt"), "not a report").unwrap();

    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        rate_limit_rpm: options.rate_limit_rpm,
        access_log_path: "/dev/null".to_string(),
        max_access_log_bytes: 0,
        api_key: options.api_key,
        cache_dir: dir.path().join("cache").to_string_lossy().to_string(),
    };
    let pipeline_config = PipelineConfig {
        schema_candidates: vec![dir.path().join("schema.json")],
        model_candidates: vec![dir.path().join("model.json")],
        reports_dir: reports,
        report_profile: options.report_profile,
        ..Default::default()
    };
    let state = Arc::new(ServerState::new(config, pipeline_config));
    let app = build_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer { addr, state, dir }
}

const BATCH_CSV: &str = "lot,s1,s2,s3\nA1,1.0,0.1,0\nA2,5.0,0.2,0\nA3,9.0,0.3,0\n";

// ---------------------------------------------------------------------------
// Health, stats, schema
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_reports_loaded_model() {
    let server = spawn_test_server(Options::default()).await;
    let body: Value = reqwest::get(server.url("/health")).await.unwrap().json().await.unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_loaded"], true);
    assert!(body["model_hash"].as_str().unwrap().starts_with("sha256:"));
    assert!(body.get("load_error").is_none());
}

#[tokio::test]
async fn test_index_page_served() {
    let server = spawn_test_server(Options::default()).await;
    let resp = reqwest::get(server.url("/")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.text().await.unwrap().contains("Wafer Yield Dashboard"));
}

#[tokio::test]
async fn test_schema_endpoint() {
    let server = spawn_test_server(Options::default()).await;
    let body: Value = reqwest::get(server.url("/api/v1/schema"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["field_count"], 3);
    assert_eq!(body["fields"], json!(["s1", "s2", "s3"]));
    assert_eq!(body["manual_fields"], json!(["s1", "s2", "s3"]));
    assert_eq!(body["source"]["kind"], "artifact");
    assert!(body["single_record_notice"].as_str().unwrap().contains("0.0"));
}

// ---------------------------------------------------------------------------
// Single record
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_predict_single_record() {
    let server = spawn_test_server(Options::default()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/api/v1/predict"))
        .json(&json!({ "values": { "s1": 9.0, "s2": 0.3 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();

    assert_eq!(body["success"], true);
    assert_eq!(body["result"]["label"], 1);
    let score = body["result"]["score"].as_f64().unwrap();
    assert!((0.5..=1.0).contains(&score));
    assert_eq!(body["result"]["record"]["defaulted_fields"], 1);
    assert!(body["processing_time_ms"].is_u64());
}

#[tokio::test]
async fn test_predict_rejects_unknown_field_and_bad_json() {
    let server = spawn_test_server(Options::default()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/api/v1/predict"))
        .json(&json!({ "values": { "s9": 1.0 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("s9"));

    let resp = client
        .post(server.url("/api/v1/predict"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON"));
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_batch_summary_and_ranking() {
    let server = spawn_test_server(Options::default()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/api/v1/batch?top_n=1"))
        .body(BATCH_CSV)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();

    assert_eq!(body["summary"]["total"], 3);
    assert_eq!(body["summary"]["fail_count"], 2);
    assert_eq!(body["summary"]["pass_count"], 1);
    assert_eq!(body["view"]["kind"], "fail_ranking");
    let rows = body["view"]["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    // The most extreme reading is the most confident fail.
    assert_eq!(rows[0]["index"], 2);
    assert_eq!(body["predictions"].as_array().unwrap().len(), 3);
    assert_eq!(body["extra_columns"], json!(["lot"]));
    assert!(body["notices"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_missing_field_lists_names() {
    let server = spawn_test_server(Options::default()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/api/v1/batch"))
        .body("s1,s2\n1,2\n")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["missing_fields"], json!(["s3"]));

    // Nothing was scored.
    let stats: Value = reqwest::get(server.url("/stats")).await.unwrap().json().await.unwrap();
    assert_eq!(stats["predictions"]["rows_scored"], 0);
    assert_eq!(stats["requests"]["errors"], 1);
}

#[tokio::test]
async fn test_batch_rejects_malformed_csv() {
    let server = spawn_test_server(Options::default()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/api/v1/batch"))
        .body("s1,s2,s3\n1,2\n")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("line 2"));
}

#[tokio::test]
async fn test_non_utf8_upload_gets_json_envelope() {
    let server = spawn_test_server(Options::default()).await;
    let client = reqwest::Client::new();

    for path in ["/api/v1/batch", "/api/v1/batch/export"] {
        let resp = client
            .post(server.url(path))
            .body(b"s1,s2,s3\n\xff\xfe\n".to_vec())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "{path}");
        assert!(resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("application/json"));
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("UTF-8"));
        assert!(body["processing_time_ms"].is_u64());
    }

    let stats: Value = reqwest::get(server.url("/stats")).await.unwrap().json().await.unwrap();
    assert_eq!(stats["requests"]["errors"], 2);
}

#[tokio::test]
async fn test_all_pass_batch_returns_watch_list() {
    let server = spawn_test_server(Options::default()).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(server.url("/api/v1/batch"))
        .body("s1,s2,s3\n1.0,0.1,0\n3.8,0.2,0\n2.0,0.1,0\n")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["summary"]["fail_count"], 0);
    assert_eq!(body["view"]["kind"], "watch_list");
    let scores: Vec<f64> = body["view"]["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["score"].as_f64().unwrap())
        .collect();
    assert_eq!(scores.len(), 3);
    assert!(scores.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(body["notices"][0]["kind"], "no_fails_found");
}

#[tokio::test]
async fn test_empty_batch_is_not_an_error() {
    let server = spawn_test_server(Options::default()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/api/v1/batch"))
        .body("s1,s2,s3\n")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["summary"]["total"], 0);
    assert_eq!(body["summary"]["fail_rate"], 0.0);
    assert_eq!(body["notices"][0]["kind"], "empty_batch");
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_export_full_and_ranked() {
    let server = spawn_test_server(Options::default()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/api/v1/batch/export?view=full"))
        .body(BATCH_CSV)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"].to_str().unwrap().starts_with("text/csv"));
    assert!(resp.headers()["content-disposition"]
        .to_str()
        .unwrap()
        .contains("yield_prediction_results.csv"));
    let full = resp.text().await.unwrap();
    let lines: Vec<&str> = full.lines().collect();
    assert_eq!(lines[0], "prediction_label,prediction_score,lot,s1,s2,s3");
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("0,"));

    let ranked = client
        .post(server.url("/api/v1/batch/export?view=ranked&top_n=1"))
        .body(BATCH_CSV)
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let lines: Vec<&str> = ranked.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].contains(",A3,"));

    // The export parses back to the same predictions.
    let back = waferyield::export::read_results(&full).unwrap();
    assert_eq!(back.len(), 3);
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_report_catalog_and_files() {
    let server = spawn_test_server(Options::default()).await;

    let body: Value = reqwest::get(server.url("/api/v1/reports"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entries = body["entries"].as_array().unwrap();
    let find = |title: &str| entries.iter().find(|e| e["title"] == title).unwrap().clone();

    assert_eq!(find("ROC Curve")["present"], true);
    let shap = find("SHAP Summary");
    assert_eq!(shap["present"], false);
    assert!(shap["notice"].as_str().unwrap().contains("not been generated"));
    assert!(shap["guide"].is_string());

    let resp = reqwest::get(server.url("/reports/AUC.png")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "image/png");
    assert!(resp.bytes().await.unwrap().starts_with(b"\x89PNG"));

    let resp = reqwest::get(server.url("/reports/model_comparison.csv")).await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "model,auc\nlr,0.81\n");

    for path in ["/reports/secret.txt", "/reports/SHAP%20Summary.png", "/reports/..%2Fschema.json"] {
        let resp = reqwest::get(server.url(path)).await.unwrap();
        assert_eq!(resp.status(), 404, "{path}");
    }
}

#[tokio::test]
async fn test_basic_report_profile_lists_first_revision_charts() {
    let server = spawn_test_server(Options {
        report_profile: ReportProfile::Basic,
        ..Default::default()
    })
    .await;

    let body: Value = reqwest::get(server.url("/api/v1/reports"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["profile"], "basic");
    let titles: Vec<&str> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Feature Importance", "Confusion Matrix", "ROC Curve"]);

    // Full-profile artifacts are not reachable under the basic profile.
    let resp = reqwest::get(server.url("/reports/model_comparison.csv")).await.unwrap();
    assert_eq!(resp.status(), 404);
    let resp = reqwest::get(server.url("/reports/AUC.png")).await.unwrap();
    assert_eq!(resp.status(), 200);
}

// ---------------------------------------------------------------------------
// Degraded mode and reload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_degraded_without_model() {
    let server = spawn_test_server(Options {
        with_model: false,
        ..Default::default()
    })
    .await;
    let client = reqwest::Client::new();

    let health: Value = reqwest::get(server.url("/health")).await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "degraded");
    assert!(health["load_error"].as_str().unwrap().contains("not found"));

    let resp = client
        .post(server.url("/api/v1/batch"))
        .body(BATCH_CSV)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);

    // Schema and reports still work.
    let schema: Value = reqwest::get(server.url("/api/v1/schema")).await.unwrap().json().await.unwrap();
    assert_eq!(schema["model_loaded"], false);
    assert_eq!(schema["field_count"], 3);
    let resp = reqwest::get(server.url("/api/v1/reports")).await.unwrap();
    assert_eq!(resp.status(), 200);

    // Dropping the artifact in and reloading brings prediction up.
    write_model(server.dir.path(), OutputConvention::Current);
    let resp = client.post(server.url("/api/v1/reload")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(server.state.current_pipeline().is_some());
    let resp = client
        .post(server.url("/api/v1/batch"))
        .body(BATCH_CSV)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_reload_requires_api_key() {
    let server = spawn_test_server(Options {
        api_key: Some("test-key".to_string()),
        ..Default::default()
    })
    .await;
    let client = reqwest::Client::new();
    let before = server.state.current_pipeline().unwrap().model_hash().to_string();

    let resp = client.post(server.url("/api/v1/reload")).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(server.url("/api/v1/reload"))
        .header("authorization", "Bearer wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Prediction endpoints stay open.
    let resp = client
        .post(server.url("/api/v1/batch"))
        .body(BATCH_CSV)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    write_model(server.dir.path(), OutputConvention::Legacy);
    let resp = client
        .post(server.url("/api/v1/reload"))
        .header("authorization", "Bearer test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["previous_model_hash"], before.as_str());
    assert_ne!(body["model_hash"], before.as_str());

    // The legacy output naming normalizes to the same predictions.
    let after: Value = client
        .post(server.url("/api/v1/batch"))
        .body(BATCH_CSV)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after["summary"]["fail_count"], 2);
}

// ---------------------------------------------------------------------------
// Rate limiting and stats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rate_limit_enforced() {
    let server = spawn_test_server(Options {
        rate_limit_rpm: 2,
        ..Default::default()
    })
    .await;

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let resp = reqwest::get(server.url("/api/v1/schema")).await.unwrap();
        statuses.push(resp.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 429]);

    // Health is not rate limited.
    let resp = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_stats_count_predictions() {
    let server = spawn_test_server(Options::default()).await;
    let client = reqwest::Client::new();

    client
        .post(server.url("/api/v1/batch"))
        .body(BATCH_CSV)
        .send()
        .await
        .unwrap();
    client
        .post(server.url("/api/v1/predict"))
        .json(&json!({ "values": { "s1": 1.0 } }))
        .send()
        .await
        .unwrap();

    let stats: Value = reqwest::get(server.url("/stats")).await.unwrap().json().await.unwrap();
    assert_eq!(stats["predictions"]["rows_scored"], 4);
    assert_eq!(stats["predictions"]["fail"], 2);
    assert_eq!(stats["predictions"]["pass"], 2);
    assert_eq!(stats["endpoints"]["batch"], 1);
    assert_eq!(stats["endpoints"]["predict"], 1);
    assert_eq!(stats["requests"]["errors"], 0);
}
