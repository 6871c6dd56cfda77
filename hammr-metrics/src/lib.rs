mod key;
mod metrics;
mod registry;
mod tags;

pub use key::{Interner, KeyId};
pub use metrics::{
    MetricHandle, MetricKind, MetricStorage, RateCounters, TrendSummary, percentile,
    summarize_trend,
};
pub use registry::{MetricAggregate, MetricDef, MetricId, Registry};
pub use tags::TagSet;
