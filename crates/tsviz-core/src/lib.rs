pub mod align;
pub mod cache;
pub mod downsample;
pub mod query;
pub mod registry;

pub use align::{dataset_align, hierarchical_align, lag, AlignError};
pub use cache::{CacheError, ColumnarCache};
pub use downsample::lttb;
pub use query::{by_index, by_time, QueryError, DEFAULT_TARGET_POINTS};
pub use registry::{
    prepare_ingest, DatasetBackend, DatasetId, DatasetRecord, PreparedDataset, Registry,
    RegistryError, SizeClass, LARGE_FILE_THRESHOLD_BYTES,
};
