use serde::{Deserialize, Serialize};

pub const MULTI_CHANNEL_COUNT: usize = 16;
pub const TIME_COLUMN_ALIASES: [&str; 4] = ["time", "t", "timestamp", "time[s]"];

/// An ordered pair of equal-length numeric sequences. `x` is non-strictly
/// monotonically non-decreasing; `y` is the channel's values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Series {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Series {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// One CSV file parsed into its named channels, sharing one time axis when
/// the file has a time column (or a synthetic index otherwise).
#[derive(Debug, Clone)]
pub struct ParsedFile {
    /// channel id -> series. In multi-channel mode every series shares the
    /// same `x`; outside it, single-column files get one series per file
    /// and multi-column files may have distinct effective time bases only
    /// in the sense that a row missing the time cell is skipped entirely.
    pub channels: Vec<(String, Series)>,
}

impl ParsedFile {
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn get(&self, channel_id: &str) -> Option<&Series> {
        self.channels
            .iter()
            .find(|(name, _)| name == channel_id)
            .map(|(_, series)| series)
    }
}

/// The canonical multi-channel header, `time[s], AI2-01 .. AI2-16`, used to
/// validate files ingested in multi-channel mode.
pub fn multi_channel_header() -> Vec<String> {
    let mut header = vec!["time[s]".to_string()];
    header.extend((1..=MULTI_CHANNEL_COUNT).map(|i| format!("AI2-{i:02}")));
    header
}
