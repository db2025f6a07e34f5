mod error;
mod routes;
mod state;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use state::AppState;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64_or(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/upload", post(routes::upload))
        .route("/clear", post(routes::clear))
        .route("/data", get(routes::legacy_data))
        .route("/metadata", get(routes::metadata))
        .route("/channel-data/{channel_id}", get(routes::channel_data))
        .route(
            "/channel-data-by-time/{channel_id}",
            get(routes::channel_data_by_time),
        )
        .route("/channels", get(routes::channels))
        .route(
            "/multi-channel/datasets",
            get(routes::multi_channel_datasets),
        )
        .route(
            "/multi-channel/data/{dataset_id}",
            get(routes::multi_channel_data),
        )
        .route(
            "/multi-channel/dataset-name",
            post(routes::rename_dataset),
        )
        .route("/align", post(routes::align))
        .route(
            "/multi-channel/align-datasets",
            post(routes::align_datasets),
        )
        .route(
            "/channel-names",
            post(routes::set_channel_names).get(routes::get_channel_names),
        )
        .route("/channel-offset", post(routes::set_channel_offset))
        .route("/channel-offsets", get(routes::get_channel_offsets))
        .route("/channel-cut-range", post(routes::set_channel_cut_range))
        .route(
            "/channel-cut-ranges",
            get(routes::get_channel_cut_ranges),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let bind_addr = env_or("BIND_ADDR", "127.0.0.1:8080");
    let cache_dir = env_or("CACHE_DIR", "./.cache");
    let upload_dir = env_or("UPLOAD_DIR", "./.uploads");
    let large_file_threshold_bytes = env_u64_or("LARGE_FILE_THRESHOLD_BYTES", 50_000_000);
    let max_upload_bytes = env_u64_or("MAX_UPLOAD_BYTES", 1_073_741_824);

    let state = AppState::new(
        cache_dir.into(),
        upload_dir.into(),
        large_file_threshold_bytes,
        max_upload_bytes,
    )
    .context("failed to initialize application state")?;

    let router = app(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "tsviz-api listening");
    axum::serve(listener, router.into_make_service()).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::util::ServiceExt;

    fn test_state() -> (AppState, tempfile::TempDir, tempfile::TempDir) {
        let cache_dir = tempfile::tempdir().unwrap();
        let upload_dir = tempfile::tempdir().unwrap();
        let state = AppState::new(
            cache_dir.path().to_path_buf(),
            upload_dir.path().to_path_buf(),
            50_000_000,
            1_073_741_824,
        )
        .unwrap();
        (state, cache_dir, upload_dir)
    }

    fn multipart_body(boundary: &str, fields: &[(&str, &str)], file: Option<(&str, &str)>) -> String {
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        if let Some((filename, content)) = file {
            body.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{boundary}--\r\n"));
        body
    }

    async fn post_multipart(router: Router, uri: &str, body: String, boundary: &str) -> Value {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn get_json(router: Router, uri: &str) -> Value {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn upload_single_column_then_data_returns_series() {
        let (state, _cache, _upload) = test_state();
        let router = app(state);

        let boundary = "singlecol";
        let body = multipart_body(
            boundary,
            &[("multi_channel_mode", "false")],
            Some(("temp.csv", "1.0\n2.0\n3.0\n")),
        );
        let upload_response = post_multipart(router.clone(), "/upload", body, boundary).await;
        assert_eq!(upload_response["error"], Value::Null);

        let data = get_json(router, "/data").await;
        let series = &data["temp"];
        assert_eq!(series["y"], serde_json::json!([1.0, 2.0, 3.0]));
    }

    #[tokio::test]
    async fn upload_multi_channel_then_metadata_reports_16_channels() {
        let (state, _cache, _upload) = test_state();
        let router = app(state);

        let header = tsviz_parser::multi_channel_header().join(",");
        let row: Vec<String> = (0..=16).map(|i| i.to_string()).collect();
        let content = format!("{header}\n{}\n", row.join(","));

        let boundary = "multichan";
        let body = multipart_body(
            boundary,
            &[("multi_channel_mode", "true")],
            Some(("recording.csv", &content)),
        );
        let upload_response = post_multipart(router.clone(), "/upload", body, boundary).await;
        let dataset_id = upload_response["dataset_id"].clone();
        assert_ne!(dataset_id, Value::Null);
        assert_eq!(upload_response["channels"].as_array().unwrap().len(), 16);

        let metadata = get_json(router, &format!("/metadata?dataset_id={}", dataset_id.as_str().unwrap())).await;
        assert_eq!(metadata["total_rows"], 1);
    }

    #[tokio::test]
    async fn clear_removes_uploaded_files_and_empties_registry() {
        let (state, _cache, upload) = test_state();
        let router = app(state);

        let boundary = "clearcase";
        let body = multipart_body(
            boundary,
            &[("multi_channel_mode", "false")],
            Some(("a.csv", "1.0\n2.0\n")),
        );
        post_multipart(router.clone(), "/upload", body, boundary).await;
        assert!(std::fs::read_dir(upload.path()).unwrap().next().is_some());

        let clear_response = post_multipart(router.clone(), "/clear", String::new(), "x").await;
        assert!(clear_response["deleted"].as_array().unwrap().contains(&Value::from("a.csv")));
        assert!(std::fs::read_dir(upload.path()).unwrap().next().is_none());

        let data = get_json(router, "/data").await;
        assert!(data.as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn align_hierarchical_applies_inter_group_delta() {
        let (state, _cache, _upload) = test_state();
        let router = app(state);

        let sine = |n: usize| -> Vec<f64> {
            (0..n)
                .map(|i| (2.0 * std::f64::consts::PI * i as f64 / 50.0).sin())
                .collect()
        };
        let shift = |signal: &[f64], k: i64| -> Vec<f64> {
            let n = signal.len() as i64;
            (0..n)
                .map(|i| {
                    let src = i - k;
                    if src >= 0 && src < n {
                        signal[src as usize]
                    } else {
                        0.0
                    }
                })
                .collect()
        };

        let a = sine(300);
        let b = shift(&a, 3);
        let c = shift(&a, 10);

        for (filename, y) in [("a.csv", &a), ("b.csv", &b), ("c.csv", &c)] {
            let content = y.iter().map(f64::to_string).collect::<Vec<_>>().join("\n");
            let boundary = "alignupload";
            let body = multipart_body(
                boundary,
                &[("multi_channel_mode", "false")],
                Some((filename, &content)),
            );
            post_multipart(router.clone(), "/upload", body, boundary).await;
        }

        let mut groups = std::collections::HashMap::new();
        groups.insert("Normal".to_string(), vec!["a".to_string(), "b".to_string()]);
        groups.insert("Abn".to_string(), vec!["c".to_string()]);

        let request_body = serde_json::json!({
            "groups": groups,
            "cut_ranges": {},
            "reference_group": "Normal",
        });
        let request = Request::builder()
            .method("POST")
            .uri("/align")
            .header("content-type", "application/json")
            .body(Body::from(request_body.to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        let offsets = value["offsets"].as_object().unwrap();
        assert_eq!(offsets.get("a").and_then(Value::as_i64), Some(0));
        assert_eq!(offsets.get("b").and_then(Value::as_i64), Some(3));
        assert_eq!(offsets.get("c").and_then(Value::as_i64), Some(10));
    }
}
