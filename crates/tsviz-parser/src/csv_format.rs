//! CSV ingestion (component A): header detection, time-column detection,
//! and single-/multi-column channel extraction.

use crate::errors::{ParseError, Result};
use crate::model::{multi_channel_header, ParsedFile, Series, TIME_COLUMN_ALIASES};

/// Parses CSV `content` into named channel series.
///
/// `file_stem` names the single series produced by a single-column file, and
/// prefixes non-time columns of a multi-column file outside multi-channel
/// mode (`"<stem>:<column>"`). In multi-channel mode, channel ids are taken
/// verbatim from the (validated) header and `file_stem` is unused for naming.
pub fn parse(content: &str, file_stem: &str, multi_channel_mode: bool) -> Result<ParsedFile> {
    let rows = tokenize(content)?;
    let mut rows = rows.into_iter();

    let Some(first_row) = rows.next() else {
        return Err(ParseError::Empty);
    };

    let has_header = !first_row.iter().all(|cell| parse_finite_f64(cell).is_some());

    let (header, data_rows): (Option<Vec<String>>, Vec<Vec<String>>) = if has_header {
        let header: Vec<String> = first_row
            .iter()
            .map(|cell| cell.trim().trim_start_matches('\u{feff}').to_string())
            .collect();
        (Some(header), rows.collect())
    } else {
        let mut data_rows = vec![first_row];
        data_rows.extend(rows);
        (None, data_rows)
    };

    if multi_channel_mode {
        let header = header.ok_or_else(|| ParseError::FormatMismatch {
            reason: "file has no header row".to_string(),
        })?;
        validate_multi_channel_header(&header)?;
        return parse_multi_column(&header, &data_rows, true, file_stem);
    }

    if data_rows.is_empty() {
        return Err(ParseError::Empty);
    }

    let column_count = data_rows[0].len();
    if column_count == 1 {
        return parse_single_column(&data_rows, file_stem);
    }

    let header = header.unwrap_or_else(|| (0..column_count).map(|i| format!("col_{i}")).collect());
    parse_multi_column(&header, &data_rows, false, file_stem)
}

/// Splits `content` into non-empty CSV records, stripping a leading BOM from
/// the very first cell of the file.
fn tokenize(content: &str) -> Result<Vec<Vec<String>>> {
    let mut lines: Vec<&str> = content.lines().collect();
    if let Some(first) = lines.first_mut() {
        *first = first.trim_start_matches('\u{feff}');
    }
    let non_empty: Vec<&str> = lines.into_iter().filter(|l| !l.trim().is_empty()).collect();
    if non_empty.is_empty() {
        return Ok(Vec::new());
    }
    let joined = non_empty.join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(joined.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Reads and tokenizes just the first non-empty line of `content`, applying
/// the same BOM-stripping and trimming rules as [`parse`]. Used by the
/// columnar cache to validate a large file's header before committing to a
/// full streamed materialization.
pub fn peek_header(content: &str) -> Result<Vec<String>> {
    let rows = tokenize(content)?;
    let first = rows.into_iter().next().ok_or(ParseError::Empty)?;
    Ok(first
        .iter()
        .map(|cell| cell.trim().trim_start_matches('\u{feff}').to_string())
        .collect())
}

/// Validates a header against the exact 17-column multi-channel layout.
pub fn validate_multi_channel_header(header: &[String]) -> Result<()> {
    let expected = multi_channel_header();
    if header.len() != expected.len() {
        return Err(ParseError::FormatMismatch {
            reason: format!(
                "expected {} columns, found {}",
                expected.len(),
                header.len()
            ),
        });
    }
    for (actual, want) in header.iter().zip(expected.iter()) {
        if !actual.eq_ignore_ascii_case(want) {
            return Err(ParseError::FormatMismatch {
                reason: format!("expected column '{want}', found '{actual}'"),
            });
        }
    }
    Ok(())
}

fn find_time_column(header: &[String]) -> Option<usize> {
    header.iter().position(|name| {
        let lowered = name.trim().to_ascii_lowercase();
        TIME_COLUMN_ALIASES.contains(&lowered.as_str())
    })
}

fn parse_single_column(data_rows: &[Vec<String>], file_stem: &str) -> Result<ParsedFile> {
    let mut series = Series::default();
    for (row_idx, row) in data_rows.iter().enumerate() {
        let value = parse_required_f64(&row[0], row_idx)?;
        series.x.push(row_idx as f64);
        series.y.push(value);
    }
    Ok(ParsedFile {
        channels: vec![(file_stem.to_string(), series)],
    })
}

fn parse_multi_column(
    header: &[String],
    data_rows: &[Vec<String>],
    multi_channel_mode: bool,
    file_stem: &str,
) -> Result<ParsedFile> {
    let time_index = find_time_column(header);

    let mut names = Vec::with_capacity(header.len());
    for (col_idx, col_name) in header.iter().enumerate() {
        if Some(col_idx) == time_index {
            continue;
        }
        let id = if multi_channel_mode {
            col_name.trim().to_string()
        } else {
            format!("{file_stem}:{}", col_name.trim())
        };
        names.push((col_idx, id));
    }

    let mut channels: Vec<(String, Series)> = names
        .iter()
        .map(|(_, id)| (id.clone(), Series::default()))
        .collect();

    for (row_idx, row) in data_rows.iter().enumerate() {
        let x_value = match time_index {
            Some(idx) => {
                let cell = row.get(idx).map(String::as_str).unwrap_or("");
                if cell.trim().is_empty() {
                    continue;
                }
                parse_required_f64(cell, row_idx)?
            }
            None => row_idx as f64,
        };

        for (channel, (col_idx, _)) in channels.iter_mut().zip(names.iter()) {
            let cell = row.get(*col_idx).map(String::as_str).unwrap_or("");
            if cell.trim().is_empty() {
                continue;
            }
            let value = parse_required_f64(cell, row_idx)?;
            channel.1.x.push(x_value);
            channel.1.y.push(value);
        }
    }

    Ok(ParsedFile { channels })
}

fn parse_finite_f64(cell: &str) -> Option<f64> {
    let value: f64 = cell.trim().parse().ok()?;
    value.is_finite().then_some(value)
}

fn parse_required_f64(cell: &str, row: usize) -> Result<f64> {
    parse_finite_f64(cell).ok_or_else(|| ParseError::DataRow {
        row,
        message: format!("'{cell}' is not a finite number"),
    })
}
