// ─── Progress Aggregator ───
// Folds transfer events into session totals for an external observer.

mod aggregator;

pub use aggregator::{FileProgress, Phase, ProgressAggregator, ProgressEvent, SessionTotals};
