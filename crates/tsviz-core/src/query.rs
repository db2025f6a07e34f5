//! Slice/Query Engine (component E): serves index-range and time-range
//! queries over a resolved dataset and channel, downsampling via LTTB when
//! the slice exceeds the requested point budget.

use thiserror::Error;

use tsviz_parser::model::Series;

use crate::cache::{CacheError, ColumnarCache};
use crate::downsample::lttb;
use crate::registry::{DatasetBackend, DatasetRecord};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("channel '{0}' not found in dataset")]
    ChannelNotFound(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub type Result<T> = std::result::Result<T, QueryError>;

pub const DEFAULT_TARGET_POINTS: usize = 5000;

/// Loads the full `(x, channel)` arrays for `record`, reading from the
/// columnar cache on demand for large datasets so a single-channel query
/// never requires all channels to be resident.
fn load_full_series(
    record: &DatasetRecord,
    channel_id: &str,
    cache: &ColumnarCache,
) -> Result<(Vec<f64>, Vec<f64>)> {
    match &record.backend {
        DatasetBackend::Small { series } => {
            let series = series
                .get(channel_id)
                .ok_or_else(|| QueryError::ChannelNotFound(channel_id.to_string()))?;
            Ok((series.x.clone(), series.y.clone()))
        }
        DatasetBackend::Large { stem, cache_key } => {
            if !record.channels.iter().any(|c| c == channel_id) {
                return Err(QueryError::ChannelNotFound(channel_id.to_string()));
            }
            let time = cache.read_channel(stem, "time", cache_key)?;
            let y = cache.read_channel(stem, channel_id, cache_key)?;
            Ok((
                time.into_iter().map(|v| v as f64).collect(),
                y.into_iter().map(|v| v as f64).collect(),
            ))
        }
    }
}

fn finish(x: Vec<f64>, y: Vec<f64>, target_points: usize) -> Series {
    if x.len() > target_points && target_points >= 3 {
        let (x, y) = lttb(&x, &y, target_points);
        Series { x, y }
    } else {
        Series { x, y }
    }
}

/// `start` and `end` are row indices into the dataset's time axis. `end` is
/// clipped to `total_rows`; `start > end` yields an empty series.
pub fn by_index(
    record: &DatasetRecord,
    channel_id: &str,
    start: usize,
    end: usize,
    target_points: usize,
    cache: &ColumnarCache,
) -> Result<Series> {
    let (x, y) = load_full_series(record, channel_id, cache)?;
    let end = end.min(x.len());
    if start > end {
        return Ok(Series::default());
    }
    Ok(finish(x[start..end].to_vec(), y[start..end].to_vec(), target_points))
}

/// Locates `[lower_bound(x, t_start), upper_bound(x, t_end))` via binary
/// search, then delegates to [`by_index`].
pub fn by_time(
    record: &DatasetRecord,
    channel_id: &str,
    t_start: f64,
    t_end: f64,
    target_points: usize,
    cache: &ColumnarCache,
) -> Result<Series> {
    let (x, y) = load_full_series(record, channel_id, cache)?;
    let start = x.partition_point(|&v| v < t_start);
    let end = x.partition_point(|&v| v <= t_end);
    if start > end {
        return Ok(Series::default());
    }
    Ok(finish(x[start..end].to_vec(), y[start..end].to_vec(), target_points))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SizeClass;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn small_record() -> DatasetRecord {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| v * 2.0).collect();
        let mut series = HashMap::new();
        series.insert("ch".to_string(), Series { x, y });
        DatasetRecord {
            id: uuid::Uuid::new_v4(),
            name: "d".to_string(),
            source_path: PathBuf::from("d.csv"),
            size_class: SizeClass::Small,
            total_rows: 20,
            channels: vec!["ch".to_string()],
            time_range: (0.0, 19.0),
            backend: DatasetBackend::Small { series },
        }
    }

    #[test]
    fn by_index_clips_end_to_total_rows() {
        let record = small_record();
        let cache = ColumnarCache::new(std::env::temp_dir());
        let series = by_index(&record, "ch", 15, 1000, DEFAULT_TARGET_POINTS, &cache).unwrap();
        assert_eq!(series.x, vec![15.0, 16.0, 17.0, 18.0, 19.0]);
    }

    #[test]
    fn by_index_start_after_end_is_empty() {
        let record = small_record();
        let cache = ColumnarCache::new(std::env::temp_dir());
        let series = by_index(&record, "ch", 10, 5, DEFAULT_TARGET_POINTS, &cache).unwrap();
        assert!(series.x.is_empty());
    }

    #[test]
    fn by_time_uses_lower_and_upper_bound() {
        let record = small_record();
        let cache = ColumnarCache::new(std::env::temp_dir());
        let series = by_time(&record, "ch", 5.0, 10.0, DEFAULT_TARGET_POINTS, &cache).unwrap();
        assert_eq!(series.x, vec![5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn unknown_channel_is_an_error() {
        let record = small_record();
        let cache = ColumnarCache::new(std::env::temp_dir());
        let err = by_index(&record, "missing", 0, 10, DEFAULT_TARGET_POINTS, &cache).unwrap_err();
        assert!(matches!(err, QueryError::ChannelNotFound(_)));
    }

    #[test]
    fn downsamples_when_slice_exceeds_target_points() {
        let record = small_record();
        let cache = ColumnarCache::new(std::env::temp_dir());
        let series = by_index(&record, "ch", 0, 20, 5, &cache).unwrap();
        assert_eq!(series.x.len(), 5);
    }
}
