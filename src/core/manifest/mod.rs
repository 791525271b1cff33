pub mod model;
pub mod report;

pub use model::{
    AggregatePolicy, FileRecord, Manifest, ManifestDocument, ManifestStatistics, RawFileRecord,
};
pub use report::scan_directory;
