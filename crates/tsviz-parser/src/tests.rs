use crate::csv_format::parse;
use crate::errors::ParseError;
use crate::model::multi_channel_header;

#[test]
fn single_column_file_uses_row_index_as_x() {
    let parsed = parse("1.0\n2.0\n3.0", "stem", false).expect("parse failed");
    assert_eq!(parsed.channels.len(), 1);
    let (name, series) = &parsed.channels[0];
    assert_eq!(name, "stem");
    assert_eq!(series.x, vec![0.0, 1.0, 2.0]);
    assert_eq!(series.y, vec![1.0, 2.0, 3.0]);
}

#[test]
fn multi_column_file_prefixes_channel_ids_with_stem() {
    let content = "time,a,b\n0,10,100\n1,20,200\n2,30,300";
    let parsed = parse(content, "stem", false).expect("parse failed");

    let a = parsed.get("stem:a").expect("missing channel a");
    assert_eq!(a.x, vec![0.0, 1.0, 2.0]);
    assert_eq!(a.y, vec![10.0, 20.0, 30.0]);

    let b = parsed.get("stem:b").expect("missing channel b");
    assert_eq!(b.y, vec![100.0, 200.0, 300.0]);
}

#[test]
fn header_detection_is_deterministic() {
    let numeric_only = "1.0,2.0\n3.0,4.0";
    let with_header = "col_0,col_1\n1.0,2.0\n3.0,4.0";

    let a = parse(numeric_only, "f", false).expect("parse failed");
    let b = parse(with_header, "f", false).expect("parse failed");

    assert_eq!(a.get("f:col_0").unwrap().y, b.get("f:col_0").unwrap().y);
    assert_eq!(a.get("f:col_1").unwrap().y, b.get("f:col_1").unwrap().y);
}

#[test]
fn missing_cell_is_skipped_but_row_survives_for_other_columns() {
    let content = "time,a,b\n0,10,100\n1,,200\n2,30,";
    let parsed = parse(content, "f", false).expect("parse failed");

    let a = parsed.get("f:a").unwrap();
    assert_eq!(a.x, vec![0.0, 2.0]);
    assert_eq!(a.y, vec![10.0, 30.0]);

    let b = parsed.get("f:b").unwrap();
    assert_eq!(b.x, vec![0.0, 1.0]);
    assert_eq!(b.y, vec![100.0, 200.0]);
}

#[test]
fn missing_time_cell_skips_the_whole_row() {
    let content = "time,a,b\n0,10,100\n,20,200\n2,30,300";
    let parsed = parse(content, "f", false).expect("parse failed");

    let a = parsed.get("f:a").unwrap();
    assert_eq!(a.x, vec![0.0, 2.0]);
    assert_eq!(a.y, vec![10.0, 30.0]);
}

#[test]
fn non_numeric_cell_fails_the_ingest() {
    let content = "time,a\n0,oops";
    let err = parse(content, "f", false).unwrap_err();
    assert!(matches!(err, ParseError::DataRow { .. }));
}

#[test]
fn multi_channel_mode_accepts_exact_header() {
    let header = multi_channel_header().join(",");
    let row: Vec<String> = (0..=16).map(|i| i.to_string()).collect();
    let content = format!("{header}\n{}", row.join(","));

    let parsed = parse(&content, "ignored", true).expect("parse failed");
    assert_eq!(parsed.channels.len(), 16);
    assert!(parsed.get("AI2-01").is_some());
    assert!(parsed.get("AI2-16").is_some());
}

#[test]
fn multi_channel_mode_rejects_wrong_header() {
    let content = "time[s],AI2-01\n0,1";
    let err = parse(content, "ignored", true).unwrap_err();
    assert!(matches!(err, ParseError::FormatMismatch { .. }));
}

#[test]
fn bom_is_stripped_from_first_cell() {
    let content = "\u{feff}time,a\n0,1\n1,2";
    let parsed = parse(content, "f", false).expect("parse failed");
    assert!(parsed.get("f:a").is_some());
}

#[test]
fn empty_rows_are_discarded() {
    let content = "time,a\n0,1\n\n1,2\n\n";
    let parsed = parse(content, "f", false).expect("parse failed");
    let a = parsed.get("f:a").unwrap();
    assert_eq!(a.y, vec![1.0, 2.0]);
}
