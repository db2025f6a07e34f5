//! Alignment Engine (component F): cross-correlation lag primitive plus the
//! hierarchical (legacy multi-file) and dataset (multi-channel) surfaces
//! built on it.

use std::collections::HashMap;

use num_complex::Complex;
use rustfft::FftPlanner;
use thiserror::Error;

use tsviz_parser::model::Series;

use crate::cache::ColumnarCache;
use crate::query::{self, DEFAULT_TARGET_POINTS};
use crate::registry::{DatasetId, DatasetRecord};

/// Inputs whose combined sample count is at or below this use direct
/// summation; above it, FFT-based convolution. Mirrors `scipy.signal`'s
/// length-based `method='auto'` choice.
const FFT_THRESHOLD: usize = 4096;

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("reference signal could not be resolved")]
    MissingReference,
}

pub type Result<T> = std::result::Result<T, AlignError>;

/// Zero-mean normalizes both inputs, computes the full linear
/// cross-correlation, and returns the index offset at which it peaks.
/// Positive means `target` must shift right to match `template`. Ties
/// break toward the smaller index. Empty inputs return 0.
pub fn lag(template: &[f64], target: &[f64]) -> i64 {
    if template.is_empty() || target.is_empty() {
        return 0;
    }

    let t = demean(template);
    let g = demean(target);

    let reversed_g: Vec<f64> = g.iter().rev().copied().collect();
    let correlation = if t.len() + g.len() > FFT_THRESHOLD {
        convolve_fft(&t, &reversed_g)
    } else {
        convolve_direct(&t, &reversed_g)
    };

    let mut best_idx = 0usize;
    let mut best_val = f64::NEG_INFINITY;
    for (idx, value) in correlation.iter().enumerate() {
        if *value > best_val {
            best_val = *value;
            best_idx = idx;
        }
    }

    (g.len() as i64 - 1) - best_idx as i64
}

fn demean(signal: &[f64]) -> Vec<f64> {
    let mean = signal.iter().sum::<f64>() / signal.len() as f64;
    signal.iter().map(|v| v - mean).collect()
}

fn convolve_direct(a: &[f64], b: &[f64]) -> Vec<f64> {
    let n = a.len() + b.len() - 1;
    let mut out = vec![0.0; n];
    for (i, av) in a.iter().enumerate() {
        if *av == 0.0 {
            continue;
        }
        for (j, bv) in b.iter().enumerate() {
            out[i + j] += av * bv;
        }
    }
    out
}

fn convolve_fft(a: &[f64], b: &[f64]) -> Vec<f64> {
    let n = a.len() + b.len() - 1;
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    let ifft = planner.plan_fft_inverse(n);

    let mut ca: Vec<Complex<f64>> = a.iter().map(|&v| Complex::new(v, 0.0)).collect();
    ca.resize(n, Complex::new(0.0, 0.0));
    let mut cb: Vec<Complex<f64>> = b.iter().map(|&v| Complex::new(v, 0.0)).collect();
    cb.resize(n, Complex::new(0.0, 0.0));

    fft.process(&mut ca);
    fft.process(&mut cb);
    let mut product: Vec<Complex<f64>> = ca.iter().zip(cb.iter()).map(|(x, y)| x * y).collect();
    ifft.process(&mut product);

    product.iter().map(|c| c.re / n as f64).collect()
}

fn cut(series: &Series, range: Option<&(i64, i64)>) -> Vec<f64> {
    let len = series.y.len();
    let (start, end) = match range {
        Some((s, e)) => (
            (*s).max(0) as usize,
            (*e).clamp(0, len as i64) as usize,
        ),
        None => (0, len),
    };
    if start >= end || start >= len {
        return Vec::new();
    }
    series.y[start..end.min(len)].to_vec()
}

/// Legacy multi-file alignment. `groups` maps a group name to its member
/// series ids in order (the first is that group's template); `lookup`
/// resolves a series id to its signal. Missing series receive offset 0.
pub fn hierarchical_align<F>(
    groups: &HashMap<String, Vec<String>>,
    cut_ranges: &HashMap<String, (i64, i64)>,
    reference_group: &str,
    lookup: F,
) -> HashMap<String, i64>
where
    F: Fn(&str) -> Option<Series>,
{
    let mut offsets: HashMap<String, i64> = HashMap::new();
    let mut templates: HashMap<String, Vec<f64>> = HashMap::new();

    for (group_name, members) in groups {
        let Some(template_id) = members.first() else {
            continue;
        };
        let template_cut = lookup(template_id)
            .map(|series| cut(&series, cut_ranges.get(template_id)))
            .unwrap_or_default();
        templates.insert(group_name.clone(), template_cut.clone());
        offsets.insert(template_id.clone(), 0);

        for member_id in &members[1..] {
            match lookup(member_id) {
                Some(series) => {
                    let target_cut = cut(&series, cut_ranges.get(member_id));
                    offsets.insert(member_id.clone(), lag(&template_cut, &target_cut));
                }
                None => {
                    offsets.insert(member_id.clone(), 0);
                }
            }
        }
    }

    if let Some(reference_members) = groups.get(reference_group) {
        if !reference_members.is_empty() {
            if let Some(reference_template) = templates.get(reference_group).cloned() {
                for (group_name, members) in groups {
                    if group_name == reference_group || members.is_empty() {
                        continue;
                    }
                    if let Some(other_template) = templates.get(group_name) {
                        let delta = lag(&reference_template, other_template);
                        for member_id in members {
                            if let Some(offset) = offsets.get_mut(member_id) {
                                *offset += delta;
                            }
                        }
                    }
                }
            }
        }
    }

    offsets
}

/// Multi-channel dataset alignment. Fetches `channel_id` from every
/// dataset in `dataset_ids` within `cut_range`, downsampled to
/// `target_points`, and converts each integer `lag` against the reference
/// into a time offset using the reference's median inter-sample `Δt`.
///
/// `records` is looked up by the caller ahead of time (typically while
/// holding the registry's read lock only long enough to clone the
/// relevant `DatasetRecord`s), so this function itself never needs the
/// registry lock while it performs cache reads and FFT work.
pub fn dataset_align(
    dataset_ids: &[DatasetId],
    channel_id: &str,
    reference_dataset_id: Option<DatasetId>,
    cut_range: Option<(f64, f64)>,
    target_points: Option<usize>,
    records: &HashMap<DatasetId, DatasetRecord>,
    cache: &ColumnarCache,
) -> Result<HashMap<DatasetId, f64>> {
    if dataset_ids.len() < 2 {
        return Err(AlignError::InvalidRequest(
            "at least two datasets are required".to_string(),
        ));
    }

    let target_points = target_points.unwrap_or(DEFAULT_TARGET_POINTS);
    let (t_start, t_end) = cut_range.unwrap_or((0.0, 1e10));
    let reference_id = reference_dataset_id
        .filter(|id| dataset_ids.contains(id))
        .unwrap_or(dataset_ids[0]);

    let mut series_by_id = HashMap::with_capacity(dataset_ids.len());
    for id in dataset_ids {
        let record = records.get(id).ok_or(AlignError::MissingReference)?;
        let series = query::by_time(record, channel_id, t_start, t_end, target_points, cache)
            .map_err(|_| AlignError::MissingReference)?;
        series_by_id.insert(*id, series);
    }

    let reference = series_by_id
        .get(&reference_id)
        .ok_or(AlignError::MissingReference)?;
    let dt = median_delta(&reference.x).filter(|d| d.is_finite() && *d > 0.0).unwrap_or(1.0);
    let reference_y = reference.y.clone();
    let reference_len = reference_y.len();

    let mut offsets = HashMap::with_capacity(dataset_ids.len());
    for id in dataset_ids {
        if *id == reference_id {
            offsets.insert(*id, 0.0);
            continue;
        }
        let target = &series_by_id[id];
        if reference_len < 2 || target.y.len() < 2 {
            offsets.insert(*id, 0.0);
            continue;
        }
        let shift = lag(&reference_y, &target.y);
        offsets.insert(*id, shift as f64 * dt);
    }

    Ok(offsets)
}

fn median_delta(x: &[f64]) -> Option<f64> {
    if x.len() < 2 {
        return None;
    }
    let mut deltas: Vec<f64> = x.windows(2).map(|pair| pair[1] - pair[0]).collect();
    deltas.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(deltas[deltas.len() / 2])
}
