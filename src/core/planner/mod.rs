mod plan;

pub use plan::{classify, plan, plan_concurrent, FetchReason, SyncAction, SyncPlan};
