pub mod csv_format;
pub mod errors;
pub mod model;

pub use csv_format::{parse, peek_header, validate_multi_channel_header};
pub use errors::{ParseError, Result};
pub use model::{multi_channel_header, ParsedFile, Series, MULTI_CHANNEL_COUNT};

#[cfg(test)]
mod tests;
