//! Columnar cache (component B): materializes a recognized 16-channel CSV
//! file into fixed-width binary column files under a process-owned cache
//! directory, and serves them back on demand.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

use tsviz_parser::model::MULTI_CHANNEL_COUNT;
use tsviz_parser::{validate_multi_channel_header, ParseError};

const ROWS_PER_CHUNK: usize = 100_000;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{0}")]
    Format(#[from] ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("row {row}: {message}")]
    BadRow { row: usize, message: String },
    #[error("cache file missing for channel '{channel}'")]
    Missing { channel: String },
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Clone)]
pub struct CacheMetadata {
    pub total_rows: usize,
    pub channels: Vec<String>,
    pub time_range: (f64, f64),
}

/// Owns the on-disk cache directory. Exclusively written by this component;
/// the query engine only reads the files it names.
#[derive(Debug, Clone)]
pub struct ColumnarCache {
    dir: PathBuf,
}

impl ColumnarCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Derives the cache key from the source file's absolute path and mtime.
    /// Any change to either value changes the key, invalidating stale cache
    /// entries without explicit bookkeeping.
    pub fn key_for(&self, path: &Path) -> std::io::Result<String> {
        let canonical = fs::canonicalize(path)?;
        let mtime_nanos = fs::metadata(path)?
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let digest_input = format!("{}|{}", canonical.display(), mtime_nanos);
        let digest = Sha256::digest(digest_input.as_bytes());
        Ok(format!("{:x}", digest)[..16].to_string())
    }

    fn channel_names() -> Vec<String> {
        (1..=MULTI_CHANNEL_COUNT).map(|i| format!("AI2-{i:02}")).collect()
    }

    pub fn time_path(&self, stem: &str, key: &str) -> PathBuf {
        self.dir.join(format!("{stem}_time_{key}.bin"))
    }

    pub fn channel_path(&self, stem: &str, channel: &str, key: &str) -> PathBuf {
        self.dir.join(format!("{stem}_{channel}_{key}.bin"))
    }

    /// A dataset is cache-complete iff the time file and every declared
    /// channel file exist under the current key.
    pub fn is_complete(&self, stem: &str, key: &str) -> bool {
        if !self.time_path(stem, key).exists() {
            return false;
        }
        Self::channel_names()
            .iter()
            .all(|channel| self.channel_path(stem, channel, key).exists())
    }

    /// Reuses an existing cache entry, deriving metadata from the cached
    /// time array.
    pub fn load_metadata(&self, stem: &str, key: &str) -> Result<CacheMetadata> {
        let time = self.read_channel(stem, "time", key)?;
        let total_rows = time.len();
        let time_range = match (time.first(), time.last()) {
            (Some(first), Some(last)) => (*first as f64, *last as f64),
            _ => (0.0, 0.0),
        };
        Ok(CacheMetadata {
            total_rows,
            channels: Self::channel_names(),
            time_range,
        })
    }

    /// Reads a channel's cached array, either `"time"` or an `AI2-xx` id.
    pub fn read_channel(&self, stem: &str, channel: &str, key: &str) -> Result<Vec<f32>> {
        let path = if channel == "time" {
            self.time_path(stem, key)
        } else {
            self.channel_path(stem, channel, key)
        };
        if !path.exists() {
            return Err(CacheError::Missing {
                channel: channel.to_string(),
            });
        }
        read_f32_array(&path)
    }

    /// Streams `csv_path` in fixed row-count chunks and writes the time
    /// column plus 16 channel columns as contiguous little-endian f32
    /// arrays. Idempotent: if the entry already exists under `key`, the
    /// caller should check [`ColumnarCache::is_complete`] first and skip
    /// this call entirely.
    ///
    /// A row missing any of the 17 required cells is dropped in its
    /// entirety (not just the missing cell) — unlike the small-file parser,
    /// these arrays are addressed by position with no stored index, so every
    /// column must stay the same length as every other.
    pub fn materialize(&self, csv_path: &Path, stem: &str, key: &str) -> Result<CacheMetadata> {
        fs::create_dir_all(&self.dir)?;

        let file = File::open(csv_path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(BufReader::new(file));

        let header: Vec<String> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let cell = if i == 0 {
                    cell.trim_start_matches('\u{feff}')
                } else {
                    cell
                };
                cell.trim().to_string()
            })
            .collect();
        validate_multi_channel_header(&header)?;

        let channels = Self::channel_names();
        let mut time_chunk: Vec<f32> = Vec::with_capacity(ROWS_PER_CHUNK);
        let mut channel_chunks: Vec<Vec<f32>> =
            channels.iter().map(|_| Vec::with_capacity(ROWS_PER_CHUNK)).collect();

        let time_tmp = self.time_path(stem, key).with_extension("bin.tmp");
        let mut time_writer = BufWriter::new(File::create(&time_tmp)?);
        let channel_tmps: Vec<PathBuf> = channels
            .iter()
            .map(|channel| self.channel_path(stem, channel, key).with_extension("bin.tmp"))
            .collect();
        let mut channel_writers: Vec<BufWriter<File>> = channel_tmps
            .iter()
            .map(|path| File::create(path).map(BufWriter::new))
            .collect::<std::io::Result<_>>()?;

        let mut total_rows = 0usize;
        let mut first_time = None;
        let mut last_time = 0.0f32;

        for (row_idx, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() != MULTI_CHANNEL_COUNT + 1 {
                continue;
            }
            if record.iter().any(|cell| cell.trim().is_empty()) {
                continue;
            }

            let mut values = [0.0f32; MULTI_CHANNEL_COUNT + 1];
            let mut row_ok = true;
            for (i, cell) in record.iter().enumerate() {
                match cell.trim().parse::<f32>() {
                    Ok(v) if v.is_finite() => values[i] = v,
                    _ => {
                        row_ok = false;
                        break;
                    }
                }
            }
            if !row_ok {
                return Err(CacheError::BadRow {
                    row: row_idx,
                    message: format!("non-numeric cell in row {row_idx}"),
                });
            }

            time_chunk.push(values[0]);
            for (i, chunk) in channel_chunks.iter_mut().enumerate() {
                chunk.push(values[i + 1]);
            }
            if first_time.is_none() {
                first_time = Some(values[0]);
            }
            last_time = values[0];
            total_rows += 1;

            if time_chunk.len() >= ROWS_PER_CHUNK {
                flush_chunk(&mut time_writer, &time_chunk)?;
                time_chunk.clear();
                for (writer, chunk) in channel_writers.iter_mut().zip(channel_chunks.iter_mut()) {
                    flush_chunk(writer, chunk)?;
                    chunk.clear();
                }
            }
        }

        flush_chunk(&mut time_writer, &time_chunk)?;
        for (writer, chunk) in channel_writers.iter_mut().zip(channel_chunks.iter()) {
            flush_chunk(writer, chunk)?;
        }
        time_writer.flush()?;
        for writer in channel_writers.iter_mut() {
            writer.flush()?;
        }
        drop(time_writer);
        drop(channel_writers);

        fs::rename(&time_tmp, self.time_path(stem, key))?;
        for (tmp, channel) in channel_tmps.iter().zip(channels.iter()) {
            fs::rename(tmp, self.channel_path(stem, channel, key))?;
        }

        Ok(CacheMetadata {
            total_rows,
            channels,
            time_range: (first_time.unwrap_or(0.0) as f64, last_time as f64),
        })
    }

    /// Deletes every cache file whose name starts with `stem` (used by
    /// clear; stems are derived from source file identity, so this only
    /// ever touches entries owned by datasets loaded in this process).
    pub fn delete_for_stem(&self, stem: &str) -> std::io::Result<Vec<PathBuf>> {
        let mut deleted = Vec::new();
        if !self.dir.exists() {
            return Ok(deleted);
        }
        let prefix = format!("{stem}_");
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&prefix) {
                fs::remove_file(entry.path())?;
                deleted.push(entry.path());
            }
        }
        Ok(deleted)
    }
}

fn flush_chunk(writer: &mut impl Write, chunk: &[f32]) -> std::io::Result<()> {
    for value in chunk {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

fn read_f32_array(path: &Path) -> Result<Vec<f32>> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    if bytes.len() % 4 != 0 {
        return Err(CacheError::BadRow {
            row: 0,
            message: format!("cache file {} has non-multiple-of-4 length", path.display()),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
