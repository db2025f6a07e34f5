use std::collections::HashMap;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use tsviz_core::{
    by_index, by_time, dataset_align, hierarchical_align, prepare_ingest, DatasetBackend,
    DatasetId, DatasetRecord, RegistryError, SizeClass, DEFAULT_TARGET_POINTS,
};
use tsviz_parser::ParseError;

use crate::error::{error_json, ApiError};
use crate::state::AppState;

/// `field.chunk()` hands back whatever the multipart decoder currently
/// has buffered; we flush to disk in 1 MiB chunks once that accumulates
/// past this size, without holding an entire upload in memory.
const UPLOAD_FLUSH_BYTES: usize = 1024 * 1024;

fn sanitize_filename(name: &str) -> String {
    let base = std::path::Path::new(name)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload.csv".to_string());
    if base.is_empty() {
        "upload.csv".to_string()
    } else {
        base
    }
}

fn record_metadata_json(record: &DatasetRecord) -> Value {
    json!({
        "dataset_id": record.id,
        "name": record.name,
        "total_rows": record.total_rows,
        "channels": record.channels,
        "time_range": [record.time_range.0, record.time_range.1],
        "is_large_file": record.size_class == SizeClass::Large,
    })
}

fn empty_metadata_json() -> Value {
    json!({
        "total_rows": 0,
        "channels": Vec::<String>::new(),
        "time_range": [0.0, 0.0],
        "is_large_file": false,
    })
}

// ---- POST /upload ----

pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> impl IntoResponse {
    let mut multi_channel_mode = false;
    let mut dest_path: Option<std::path::PathBuf> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(_) => {
                return ApiError(StatusCode::BAD_REQUEST, "invalid multipart payload".to_string())
                    .into_response()
            }
        };

        match field.name().map(str::to_string).as_deref() {
            Some("multi_channel_mode") => {
                if let Ok(text) = field.text().await {
                    multi_channel_mode =
                        matches!(text.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes");
                }
            }
            Some("file") => {
                let filename = sanitize_filename(field.file_name().unwrap_or("upload.csv"));
                let path = state.upload_dir.join(&filename);
                let mut field = field;
                let mut file = match tokio::fs::File::create(&path).await {
                    Ok(file) => file,
                    Err(err) => {
                        return ApiError(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
                            .into_response()
                    }
                };

                let mut total: u64 = 0;
                let mut buffer: Vec<u8> = Vec::with_capacity(UPLOAD_FLUSH_BYTES);
                let mut oversize = false;

                loop {
                    match field.chunk().await {
                        Ok(Some(chunk)) => {
                            total += chunk.len() as u64;
                            if total > state.max_upload_bytes {
                                oversize = true;
                                break;
                            }
                            buffer.extend_from_slice(chunk.as_ref());
                            if buffer.len() >= UPLOAD_FLUSH_BYTES {
                                if file.write_all(&buffer).await.is_err() {
                                    return ApiError(
                                        StatusCode::INTERNAL_SERVER_ERROR,
                                        "failed to write upload".to_string(),
                                    )
                                    .into_response();
                                }
                                buffer.clear();
                            }
                        }
                        Ok(None) => break,
                        Err(_) => {
                            return ApiError(StatusCode::BAD_REQUEST, "failed to read upload".to_string())
                                .into_response()
                        }
                    }
                }

                if !oversize && !buffer.is_empty() && file.write_all(&buffer).await.is_err() {
                    return ApiError(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "failed to write upload".to_string(),
                    )
                    .into_response();
                }
                let _ = file.flush().await;
                drop(file);

                if oversize {
                    let _ = tokio::fs::remove_file(&path).await;
                    return (StatusCode::OK, error_json("upload exceeds maximum size")).into_response();
                }
                dest_path = Some(path);
            }
            _ => {}
        }
    }

    let Some(dest_path) = dest_path else {
        return (StatusCode::BAD_REQUEST, error_json("no file field in upload")).into_response();
    };

    let prepared = match prepare_ingest(
        &dest_path,
        multi_channel_mode,
        &state.cache,
        state.large_file_threshold_bytes,
    ) {
        Ok(prepared) => prepared,
        Err(err) => {
            warn!(error = %err, path = %dest_path.display(), "ingest failed");
            let format_error = matches!(&err, RegistryError::Parse(ParseError::FormatMismatch { .. }));
            return Json(json!({
                "error": true,
                "format_error": format_error,
                "message": err.to_string(),
            }))
            .into_response();
        }
    };

    let dataset_id = {
        let mut registry = state.registry.write().await;
        registry.commit(prepared)
    };
    info!(%dataset_id, multi_channel_mode, "upload ingested");

    let body = if multi_channel_mode {
        let registry = state.registry.read().await;
        registry
            .get(&dataset_id)
            .map(record_metadata_json)
            .unwrap_or_else(empty_metadata_json)
    } else {
        let registry = state.registry.read().await;
        registry
            .datasets()
            .last()
            .map(record_metadata_json)
            .unwrap_or_else(empty_metadata_json)
    };

    Json(body).into_response()
}

// ---- POST /clear ----

pub async fn clear(State(state): State<AppState>) -> impl IntoResponse {
    let mut registry = state.registry.write().await;
    let deleted_cache_files = registry.clear(&state.cache).unwrap_or_default();
    drop(registry);

    let mut deleted_uploads = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(&state.upload_dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().map(|ext| ext == "csv").unwrap_or(false) {
                if tokio::fs::remove_file(&path).await.is_ok() {
                    deleted_uploads.push(entry.file_name().to_string_lossy().to_string());
                }
            }
        }
    }

    info!(
        cache_files = deleted_cache_files.len(),
        uploads = deleted_uploads.len(),
        "registry cleared"
    );
    Json(json!({ "deleted": deleted_uploads }))
}

// ---- GET /data ----

pub async fn legacy_data(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.registry.read().await;
    let data: HashMap<&String, Value> = registry
        .legacy_map()
        .iter()
        .map(|(id, series)| (id, json!({ "x": series.x, "y": series.y })))
        .collect();
    Json(data)
}

// ---- GET /metadata ----

#[derive(Debug, Deserialize)]
pub struct MetadataQuery {
    dataset_id: Option<Uuid>,
}

pub async fn metadata(
    State(state): State<AppState>,
    Query(query): Query<MetadataQuery>,
) -> impl IntoResponse {
    let registry = state.registry.read().await;
    let body = registry
        .resolve(query.dataset_id.as_ref())
        .map(record_metadata_json)
        .unwrap_or_else(empty_metadata_json);
    Json(body)
}

// ---- GET /channel-data/{channel_id}, /channel-data-by-time/{channel_id} ----

#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    dataset_id: Option<Uuid>,
    #[serde(default)]
    start_idx: usize,
    end_idx: Option<usize>,
    target_points: Option<usize>,
}

pub async fn channel_data(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Query(query): Query<IndexQuery>,
) -> impl IntoResponse {
    let registry = state.registry.read().await;
    let Some(record) = registry.resolve(query.dataset_id.as_ref()).cloned() else {
        return Json(json!({ "x": Vec::<f64>::new(), "y": Vec::<f64>::new() }));
    };
    drop(registry);

    let end_idx = query.end_idx.unwrap_or(record.total_rows);
    let target_points = query.target_points.unwrap_or(DEFAULT_TARGET_POINTS);
    match by_index(&record, &channel_id, query.start_idx, end_idx, target_points, &state.cache) {
        Ok(series) => Json(json!({ "x": series.x, "y": series.y })),
        Err(err) => {
            warn!(error = %err, channel_id, "channel-data query failed");
            Json(json!({ "x": Vec::<f64>::new(), "y": Vec::<f64>::new() }))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TimeQuery {
    dataset_id: Option<Uuid>,
    #[serde(default = "default_start_time")]
    start_time: f64,
    #[serde(default = "default_end_time")]
    end_time: f64,
    target_points: Option<usize>,
}

fn default_start_time() -> f64 {
    0.0
}

fn default_end_time() -> f64 {
    1e10
}

pub async fn channel_data_by_time(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Query(query): Query<TimeQuery>,
) -> impl IntoResponse {
    let registry = state.registry.read().await;
    let Some(record) = registry.resolve(query.dataset_id.as_ref()).cloned() else {
        return Json(json!({ "x": Vec::<f64>::new(), "y": Vec::<f64>::new() }));
    };
    drop(registry);

    let target_points = query.target_points.unwrap_or(DEFAULT_TARGET_POINTS);
    match by_time(
        &record,
        &channel_id,
        query.start_time,
        query.end_time,
        target_points,
        &state.cache,
    ) {
        Ok(series) => Json(json!({ "x": series.x, "y": series.y })),
        Err(err) => {
            warn!(error = %err, channel_id, "channel-data-by-time query failed");
            Json(json!({ "x": Vec::<f64>::new(), "y": Vec::<f64>::new() }))
        }
    }
}

// ---- GET /channels ----

pub async fn channels(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.registry.read().await;
    let mut channel_ids: Vec<String> =
        registry.datasets().flat_map(|d| d.channels.clone()).collect();
    channel_ids.extend(registry.legacy_map().keys().cloned());
    channel_ids.sort();
    channel_ids.dedup();

    let multi_channel_mode = registry.datasets().any(|d| d.size_class == SizeClass::Large);

    Json(json!({
        "channels": channel_ids,
        "channel_names": registry.channel_names(),
        "multi_channel_mode": multi_channel_mode,
    }))
}

// ---- GET /multi-channel/datasets ----

pub async fn multi_channel_datasets(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.registry.read().await;
    let datasets: Vec<Value> = registry.datasets().map(record_metadata_json).collect();
    Json(json!({ "datasets": datasets }))
}

// ---- GET /multi-channel/data/{dataset_id} ----

pub async fn multi_channel_data(
    State(state): State<AppState>,
    Path(dataset_id): Path<Uuid>,
) -> impl IntoResponse {
    let registry = state.registry.read().await;
    let Some(record) = registry.get(&dataset_id) else {
        return Json(json!({}));
    };
    match &record.backend {
        DatasetBackend::Small { series } => {
            let data: HashMap<&String, Value> = series
                .iter()
                .map(|(channel, series)| (channel, json!({ "x": series.x, "y": series.y })))
                .collect();
            Json(json!(data))
        }
        DatasetBackend::Large { .. } => Json(json!({})),
    }
}

// ---- POST /multi-channel/dataset-name ----

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    dataset_id: Uuid,
    name: String,
}

pub async fn rename_dataset(
    State(state): State<AppState>,
    Json(body): Json<RenameRequest>,
) -> impl IntoResponse {
    let mut registry = state.registry.write().await;
    match registry.rename(&body.dataset_id, body.name) {
        Ok(()) => Json(json!({ "success": true })),
        Err(_) => Json(json!({ "error": true, "message": "dataset not found" })),
    }
}

// ---- POST /align ----

#[derive(Debug, Deserialize)]
pub struct AlignRequest {
    groups: HashMap<String, Vec<String>>,
    #[serde(default)]
    cut_ranges: HashMap<String, (i64, i64)>,
    reference_group: String,
}

pub async fn align(
    State(state): State<AppState>,
    Json(body): Json<AlignRequest>,
) -> impl IntoResponse {
    let registry = state.registry.read().await;
    let legacy = registry.legacy_map().clone();
    drop(registry);

    let offsets =
        hierarchical_align(&body.groups, &body.cut_ranges, &body.reference_group, |id| {
            legacy.get(id).cloned()
        });
    Json(json!({ "offsets": offsets }))
}

// ---- POST /multi-channel/align-datasets ----

#[derive(Debug, Deserialize)]
pub struct DatasetAlignRequest {
    dataset_ids: Vec<DatasetId>,
    channel_id: String,
    reference_dataset_id: Option<DatasetId>,
    cut_range: Option<(f64, f64)>,
    target_points: Option<usize>,
}

pub async fn align_datasets(
    State(state): State<AppState>,
    Json(body): Json<DatasetAlignRequest>,
) -> impl IntoResponse {
    let registry = state.registry.read().await;
    let records: HashMap<DatasetId, DatasetRecord> = body
        .dataset_ids
        .iter()
        .filter_map(|id| registry.get(id).cloned().map(|record| (*id, record)))
        .collect();
    drop(registry);

    match dataset_align(
        &body.dataset_ids,
        &body.channel_id,
        body.reference_dataset_id,
        body.cut_range,
        body.target_points,
        &records,
        &state.cache,
    ) {
        Ok(offsets) => Json(json!({ "offsets": offsets })),
        Err(err) => Json(json!({ "error": true, "message": err.to_string(), "offsets": {} })),
    }
}

// ---- UI side-tables: channel-names, channel-offset(s), channel-cut-range(s) ----

#[derive(Debug, Deserialize)]
pub struct ChannelNamesRequest {
    channel_names: HashMap<String, String>,
}

pub async fn set_channel_names(
    State(state): State<AppState>,
    Json(body): Json<ChannelNamesRequest>,
) -> impl IntoResponse {
    let mut registry = state.registry.write().await;
    registry.set_channel_names(body.channel_names);
    Json(json!({ "success": true }))
}

pub async fn get_channel_names(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.registry.read().await;
    Json(json!({ "channel_names": registry.channel_names() }))
}

#[derive(Debug, Deserialize)]
pub struct ChannelOffsetRequest {
    channel_id: String,
    offset: f64,
}

pub async fn set_channel_offset(
    State(state): State<AppState>,
    Json(body): Json<ChannelOffsetRequest>,
) -> impl IntoResponse {
    let mut registry = state.registry.write().await;
    registry.set_channel_offset(body.channel_id, body.offset);
    Json(json!({ "success": true }))
}

pub async fn get_channel_offsets(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.registry.read().await;
    Json(json!({ "channel_offsets": registry.channel_offsets() }))
}

#[derive(Debug, Deserialize)]
pub struct ChannelCutRangeRequest {
    channel_id: String,
    start: i64,
    end: i64,
}

pub async fn set_channel_cut_range(
    State(state): State<AppState>,
    Json(body): Json<ChannelCutRangeRequest>,
) -> impl IntoResponse {
    let mut registry = state.registry.write().await;
    registry.set_channel_cut_range(body.channel_id, body.start, body.end);
    Json(json!({ "success": true }))
}

pub async fn get_channel_cut_ranges(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.registry.read().await;
    let ranges: HashMap<&String, [i64; 2]> = registry
        .channel_cut_ranges()
        .iter()
        .map(|(id, (start, end))| (id, [*start, *end]))
        .collect();
    Json(json!({ "channel_cut_ranges": ranges }))
}
