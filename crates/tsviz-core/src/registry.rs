//! Dataset Registry (component C): owns loaded datasets, classifies each as
//! small or large, and resolves queries to a dataset.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tsviz_parser::model::Series;
use tsviz_parser::{parse, peek_header, validate_multi_channel_header, ParseError};

use crate::cache::{CacheError, ColumnarCache};

pub const LARGE_FILE_THRESHOLD_BYTES: u64 = 50_000_000;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dataset not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, RegistryError>;

pub type DatasetId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Small,
    Large,
}

/// The in-memory or cache-backed representation of a dataset's channels.
///
/// `Small` keeps one [`Series`] per channel rather than a single shared `x`
/// plus per-channel `y`: a row missing one column's cell is still kept for
/// every other column, so sibling channels in the same file can legitimately
/// end up with different `x` arrays. Only the declared 16-channel format
/// guarantees a single shared time axis.
#[derive(Debug, Clone)]
pub enum DatasetBackend {
    Small {
        series: HashMap<String, Series>,
    },
    Large {
        stem: String,
        cache_key: String,
    },
}

#[derive(Debug, Clone)]
pub struct DatasetRecord {
    pub id: DatasetId,
    pub name: String,
    pub source_path: PathBuf,
    pub size_class: SizeClass,
    pub total_rows: usize,
    pub channels: Vec<String>,
    pub time_range: (f64, f64),
    pub backend: DatasetBackend,
}

/// The result of parsing and (for large files) cache-materializing a
/// source file, before it has been assigned an id or inserted into the
/// registry. Building this requires no lock; only [`Registry::commit`]
/// needs one, and only briefly.
pub struct PreparedDataset {
    name: String,
    source_path: PathBuf,
    size_class: SizeClass,
    total_rows: usize,
    channels: Vec<String>,
    time_range: (f64, f64),
    backend: DatasetBackend,
    multi_channel_mode: bool,
    legacy_series: Vec<(String, Series)>,
}

/// Owns every loaded dataset plus the legacy flat channel map and the UI
/// side-tables. A single `tokio::sync::RwLock<Registry>` is the only
/// synchronization primitive the API crate needs.
#[derive(Debug, Default)]
pub struct Registry {
    datasets: HashMap<DatasetId, DatasetRecord>,
    order: Vec<DatasetId>,
    /// Populated only by datasets ingested outside multi-channel mode.
    legacy: HashMap<String, Series>,
    channel_names: HashMap<String, String>,
    channel_offsets: HashMap<String, f64>,
    channel_cut_ranges: HashMap<String, (i64, i64)>,
}

/// Parses (and, for large files, cache-materializes) `path` into a
/// [`PreparedDataset`]. Performs no registry mutation and needs no lock;
/// callers hold only a read lock, if any, while this runs. Size-classifies
/// per spec: `large` only when the file is at least `threshold_bytes` AND
/// `multi_channel_mode` is set; everything else is parsed fully into memory.
pub fn prepare_ingest(
    path: &Path,
    multi_channel_mode: bool,
    cache: &ColumnarCache,
    threshold_bytes: u64,
) -> Result<PreparedDataset> {
    let file_size = std::fs::metadata(path)?.len();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "dataset".to_string());

    let is_large = multi_channel_mode && file_size >= threshold_bytes;

    let (size_class, total_rows, channels, time_range, backend, legacy_series) = if is_large {
        let (size_class, total_rows, channels, time_range, backend) =
            prepare_large(path, &stem, cache)?;
        (size_class, total_rows, channels, time_range, backend, Vec::new())
    } else {
        prepare_small(path, &stem, multi_channel_mode)?
    };

    debug!(stem, rows = total_rows, large = is_large, "dataset prepared");
    Ok(PreparedDataset {
        name: stem,
        source_path: path.to_path_buf(),
        size_class,
        total_rows,
        channels,
        time_range,
        backend,
        multi_channel_mode,
        legacy_series,
    })
}

#[allow(clippy::type_complexity)]
fn prepare_large(
    path: &Path,
    stem: &str,
    cache: &ColumnarCache,
) -> Result<(SizeClass, usize, Vec<String>, (f64, f64), DatasetBackend)> {
    let first_line = read_first_line(path)?;
    let header = peek_header(&first_line)?;
    validate_multi_channel_header(&header)?;

    let key = cache.key_for(path)?;
    let meta = if cache.is_complete(stem, &key) {
        debug!(stem, key, "reusing existing cache entry");
        cache.load_metadata(stem, &key)?
    } else {
        cache.materialize(path, stem, &key)?
    };

    Ok((
        SizeClass::Large,
        meta.total_rows,
        meta.channels,
        meta.time_range,
        DatasetBackend::Large {
            stem: stem.to_string(),
            cache_key: key,
        },
    ))
}

/// Reads just the first line of `path`, so header validation for a
/// multi-gigabyte candidate doesn't require loading it into memory before
/// `ColumnarCache::materialize` streams it for real.
fn read_first_line(path: &Path) -> std::io::Result<String> {
    let file = std::fs::File::open(path)?;
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line)?;
    Ok(line)
}

#[allow(clippy::type_complexity)]
fn prepare_small(
    path: &Path,
    stem: &str,
    multi_channel_mode: bool,
) -> Result<(
    SizeClass,
    usize,
    Vec<String>,
    (f64, f64),
    DatasetBackend,
    Vec<(String, Series)>,
)> {
    let content = std::fs::read_to_string(path)?;
    let parsed = parse(&content, stem, multi_channel_mode)?;

    if parsed.channels.is_empty() {
        return Err(RegistryError::Parse(ParseError::Empty));
    }

    let total_rows = parsed.channels[0].1.len();
    let x = parsed.channels[0].1.x.clone();
    let time_range = (
        x.first().copied().unwrap_or(0.0),
        x.last().copied().unwrap_or(0.0),
    );

    let channels: Vec<String> = parsed.channel_names();
    let series: HashMap<String, Series> = parsed
        .channels
        .iter()
        .map(|(name, s)| (name.clone(), s.clone()))
        .collect();

    let legacy_series = if multi_channel_mode {
        Vec::new()
    } else {
        parsed.channels.clone()
    };

    Ok((
        SizeClass::Small,
        total_rows,
        channels,
        time_range,
        DatasetBackend::Small { series },
        legacy_series,
    ))
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commits an already-prepared dataset: the only registry mutation in
    /// the ingest path, intended to run under a short write-lock section.
    pub fn commit(&mut self, prepared: PreparedDataset) -> DatasetId {
        let id = Uuid::new_v4();
        if !prepared.multi_channel_mode {
            for (name, series) in prepared.legacy_series {
                self.legacy.insert(name, series);
            }
        }
        let record = DatasetRecord {
            id,
            name: prepared.name,
            source_path: prepared.source_path,
            size_class: prepared.size_class,
            total_rows: prepared.total_rows,
            channels: prepared.channels,
            time_range: prepared.time_range,
            backend: prepared.backend,
        };
        info!(dataset_id = %id, rows = record.total_rows, "dataset committed");
        self.datasets.insert(id, record);
        self.order.push(id);
        id
    }

    /// Convenience wrapper for call sites (tests, CLI-style one-shot
    /// ingestion) that don't need the prepare/commit split a shared
    /// registry lock requires.
    pub fn ingest(
        &mut self,
        path: &Path,
        multi_channel_mode: bool,
        cache: &ColumnarCache,
        threshold_bytes: u64,
    ) -> Result<DatasetId> {
        let prepared = prepare_ingest(path, multi_channel_mode, cache, threshold_bytes)?;
        Ok(self.commit(prepared))
    }

    /// Resolves `dataset_id`, falling back to the most recently added
    /// dataset when it is absent or unknown.
    pub fn resolve(&self, dataset_id: Option<&DatasetId>) -> Option<&DatasetRecord> {
        if let Some(id) = dataset_id {
            if let Some(record) = self.datasets.get(id) {
                return Some(record);
            }
        }
        self.order.last().and_then(|id| self.datasets.get(id))
    }

    pub fn get(&self, id: &DatasetId) -> Option<&DatasetRecord> {
        self.datasets.get(id)
    }

    pub fn rename(&mut self, id: &DatasetId, name: String) -> Result<()> {
        self.datasets
            .get_mut(id)
            .map(|record| record.name = name)
            .ok_or(RegistryError::NotFound)
    }

    pub fn datasets(&self) -> impl Iterator<Item = &DatasetRecord> {
        self.order.iter().filter_map(|id| self.datasets.get(id))
    }

    pub fn legacy_map(&self) -> &HashMap<String, Series> {
        &self.legacy
    }

    pub fn channel_names(&self) -> &HashMap<String, String> {
        &self.channel_names
    }

    pub fn set_channel_names(&mut self, names: HashMap<String, String>) {
        self.channel_names.extend(names);
    }

    pub fn channel_offsets(&self) -> &HashMap<String, f64> {
        &self.channel_offsets
    }

    pub fn set_channel_offset(&mut self, channel_id: String, offset: f64) {
        self.channel_offsets.insert(channel_id, offset);
    }

    pub fn channel_cut_ranges(&self) -> &HashMap<String, (i64, i64)> {
        &self.channel_cut_ranges
    }

    pub fn set_channel_cut_range(&mut self, channel_id: String, start: i64, end: i64) {
        self.channel_cut_ranges.insert(channel_id, (start, end));
    }

    /// Empties every registry map and UI side-table, and deletes every
    /// cache file owned by a dataset this process had loaded. Returns the
    /// deleted cache file paths.
    pub fn clear(&mut self, cache: &ColumnarCache) -> std::io::Result<Vec<PathBuf>> {
        let mut deleted = Vec::new();
        for record in self.datasets.values() {
            if let DatasetBackend::Large { stem, .. } = &record.backend {
                match cache.delete_for_stem(stem) {
                    Ok(mut files) => deleted.append(&mut files),
                    Err(err) => warn!(stem, error = %err, "failed to delete cache entry"),
                }
            }
        }
        self.datasets.clear();
        self.order.clear();
        self.legacy.clear();
        self.channel_names.clear();
        self.channel_offsets.clear();
        self.channel_cut_ranges.clear();
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn single_column_small_file_populates_legacy_map() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_csv(tmp.path(), "temp.csv", "1.0\n2.0\n3.0");
        let cache = ColumnarCache::new(tmp.path().join("cache"));

        let mut registry = Registry::new();
        let id = registry.ingest(&path, false, &cache, LARGE_FILE_THRESHOLD_BYTES).unwrap();

        let record = registry.get(&id).unwrap();
        assert_eq!(record.size_class, SizeClass::Small);
        assert_eq!(record.total_rows, 3);
        assert!(registry.legacy_map().contains_key("temp"));
    }

    #[test]
    fn multi_channel_small_file_does_not_populate_legacy_map() {
        let tmp = tempfile::tempdir().unwrap();
        let header = tsviz_parser::multi_channel_header().join(",");
        let row: Vec<String> = (0..=16).map(|i| i.to_string()).collect();
        let content = format!("{header}\n{}\n", row.join(","));
        let path = write_csv(tmp.path(), "rec.csv", &content);
        let cache = ColumnarCache::new(tmp.path().join("cache"));

        let mut registry = Registry::new();
        registry.ingest(&path, true, &cache, LARGE_FILE_THRESHOLD_BYTES).unwrap();

        assert!(registry.legacy_map().is_empty());
    }

    #[test]
    fn resolve_falls_back_to_most_recently_added() {
        let tmp = tempfile::tempdir().unwrap();
        let path_a = write_csv(tmp.path(), "a.csv", "1.0\n2.0");
        let path_b = write_csv(tmp.path(), "b.csv", "3.0\n4.0");
        let cache = ColumnarCache::new(tmp.path().join("cache"));

        let mut registry = Registry::new();
        registry.ingest(&path_a, false, &cache, LARGE_FILE_THRESHOLD_BYTES).unwrap();
        let id_b = registry.ingest(&path_b, false, &cache, LARGE_FILE_THRESHOLD_BYTES).unwrap();

        let resolved = registry.resolve(None).unwrap();
        assert_eq!(resolved.id, id_b);

        let unknown = Uuid::new_v4();
        let resolved = registry.resolve(Some(&unknown)).unwrap();
        assert_eq!(resolved.id, id_b);
    }

    #[test]
    fn clear_empties_everything_and_deletes_owned_cache_files() {
        let tmp = tempfile::tempdir().unwrap();
        let header = tsviz_parser::multi_channel_header().join(",");
        let row: Vec<String> = (0..=16).map(|i| i.to_string()).collect();
        let content = format!("{header}\n{}\n", row.join(","));
        let path = write_csv(tmp.path(), "rec.csv", &content);
        let cache = ColumnarCache::new(tmp.path().join("cache"));

        let mut registry = Registry::new();
        // Force the large path regardless of actual file size for this test.
        registry.ingest(&path, true, &cache, 0).unwrap();
        registry.set_channel_offset("AI2-01".to_string(), 2.5);

        let deleted = registry.clear(&cache).unwrap();
        assert_eq!(deleted.len(), 17);
        assert!(registry.datasets().next().is_none());
        assert!(registry.channel_offsets().is_empty());
    }
}
