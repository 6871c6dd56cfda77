use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::Ordering;

use crate::key::{Interner, KeyId};
use crate::metrics::{MetricHandle, MetricKind, MetricStorage, TrendSummary, summarize_trend};
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
pub struct MetricDef {
    pub name: KeyId,
    pub kind: MetricKind,
}

/// Merged (across all series of one metric) aggregate, as reported in the
/// run summary.
#[derive(Debug, Clone)]
pub enum MetricAggregate {
    Counter { total: u64 },
    Gauge { value: i64 },
    Rate { total: u64, hits: u64 },
    Trend(TrendSummary),
}

/// Shared metric storage: the single mutable state shared across workers.
///
/// All mutation goes through handles obtained from `handle()`; counter, gauge
/// and rate appends are lock-free, trend appends take a short per-series lock.
#[derive(Debug, Default)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Vec<MetricDef>>,
    storage: DashMap<MetricId, DashMap<TagSet, MetricStorage>>,
}

impl Registry {
    pub fn register(&self, name: &str, kind: MetricKind) -> MetricId {
        let name_id = self.interner.get_or_intern(name);

        let mut defs = self.defs.write();
        if let Some((idx, _)) = defs.iter().enumerate().find(|(_, d)| d.name == name_id) {
            return MetricId(idx as u32);
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: name_id,
            kind,
        });
        self.storage.insert(id, DashMap::new());
        id
    }

    pub fn lookup(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        let name_id = self.interner.get_or_intern(name);
        let defs = self.defs.read();
        defs.iter()
            .enumerate()
            .find(|(_, d)| d.name == name_id)
            .map(|(idx, d)| (MetricId(idx as u32), d.kind))
    }

    pub fn kind_of(&self, metric: MetricId) -> Option<MetricKind> {
        let defs = self.defs.read();
        defs.get(metric.0 as usize).map(|d| d.kind)
    }

    pub fn resolve_key(&self, key: &str) -> KeyId {
        self.interner.get_or_intern(key)
    }

    pub fn resolve_key_id(&self, id: KeyId) -> Option<std::sync::Arc<str>> {
        self.interner.resolve(id)
    }

    pub fn resolve_tags(&self, tags: &[(&str, &str)]) -> TagSet {
        let mut resolved: Vec<(KeyId, KeyId)> = tags
            .iter()
            .map(|(k, v)| (self.resolve_key(k), self.resolve_key(v)))
            .collect();
        resolved.sort_unstable();
        TagSet::from_sorted_iter(resolved)
    }

    pub fn handle(&self, metric: MetricId, tags: TagSet) -> Option<MetricHandle> {
        let series_map = self.storage.get(&metric)?;

        if let Some(storage) = series_map.get(&tags) {
            return Some(storage_to_handle(storage.value()));
        }

        let kind = self.kind_of(metric)?;

        let new_storage = MetricStorage::new(kind);
        let handle = storage_to_handle(&new_storage);
        series_map.insert(tags, new_storage);

        Some(handle)
    }

    fn visit_series(&self, metric: MetricId, mut f: impl FnMut(&TagSet, &MetricStorage)) {
        let Some(series_map) = self.storage.get(&metric) else {
            return;
        };
        for series in series_map.iter() {
            f(series.key(), series.value());
        }
    }

    /// Sum of all counter series matching `filter` (superset tag match).
    pub fn fold_counter_sum(&self, metric: MetricId, filter: &TagSet) -> u64 {
        let mut sum = 0u64;
        self.visit_series(metric, |tags, storage| {
            if !tags.is_superset_of(filter) {
                return;
            }
            if let MetricStorage::Counter(c) = storage {
                sum = sum.saturating_add(c.load(Ordering::Relaxed));
            }
        });
        sum
    }

    /// Merged `(total, hits)` of all rate series matching `filter`.
    pub fn fold_rate(&self, metric: MetricId, filter: &TagSet) -> (u64, u64) {
        let mut total = 0u64;
        let mut hits = 0u64;
        self.visit_series(metric, |tags, storage| {
            if !tags.is_superset_of(filter) {
                return;
            }
            if let MetricStorage::Rate(r) = storage {
                total = total.saturating_add(r.total.load(Ordering::Relaxed));
                hits = hits.saturating_add(r.hits.load(Ordering::Relaxed));
            }
        });
        (total, hits)
    }

    /// Merged raw values of all trend series matching `filter`.
    pub fn fold_trend_values(&self, metric: MetricId, filter: &TagSet) -> Vec<f64> {
        let mut out = Vec::new();
        self.visit_series(metric, |tags, storage| {
            if !tags.is_superset_of(filter) {
                return;
            }
            if let MetricStorage::Trend(t) = storage {
                out.extend_from_slice(&t.lock());
            }
        });
        out
    }

    pub fn fold_trend_summary(&self, metric: MetricId, filter: &TagSet) -> TrendSummary {
        summarize_trend(&self.fold_trend_values(metric, filter))
    }

    /// Largest gauge value across series matching `filter` (peak gauges).
    pub fn fold_gauge_max(&self, metric: MetricId, filter: &TagSet) -> Option<i64> {
        let mut max: Option<i64> = None;
        self.visit_series(metric, |tags, storage| {
            if !tags.is_superset_of(filter) {
                return;
            }
            if let MetricStorage::Gauge(g) = storage {
                let v = g.load(Ordering::Relaxed);
                max = Some(max.map_or(v, |cur| cur.max(v)));
            }
        });
        max
    }

    pub fn aggregate(&self, metric: MetricId, filter: &TagSet) -> Option<MetricAggregate> {
        match self.kind_of(metric)? {
            MetricKind::Counter => Some(MetricAggregate::Counter {
                total: self.fold_counter_sum(metric, filter),
            }),
            MetricKind::Gauge => self
                .fold_gauge_max(metric, filter)
                .map(|value| MetricAggregate::Gauge { value }),
            MetricKind::Rate => {
                let (total, hits) = self.fold_rate(metric, filter);
                Some(MetricAggregate::Rate { total, hits })
            }
            MetricKind::Trend => Some(MetricAggregate::Trend(
                self.fold_trend_summary(metric, filter),
            )),
        }
    }

    /// All registered metrics with their unfiltered merged aggregate, sorted
    /// by name. Only valid as a final snapshot once all workers terminated.
    pub fn snapshot(&self) -> Vec<(String, MetricKind, MetricAggregate)> {
        let names: Vec<(String, MetricId, MetricKind)> = {
            let defs = self.defs.read();
            defs.iter()
                .enumerate()
                .map(|(idx, d)| {
                    let name = self
                        .interner
                        .resolve(d.name)
                        .map(|s| s.to_string())
                        .unwrap_or_default();
                    (name, MetricId(idx as u32), d.kind)
                })
                .collect()
        };

        let empty = TagSet::default();
        let mut out: Vec<(String, MetricKind, MetricAggregate)> = names
            .into_iter()
            .filter_map(|(name, id, kind)| {
                self.aggregate(id, &empty).map(|agg| (name, kind, agg))
            })
            .collect();

        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

fn storage_to_handle(s: &MetricStorage) -> MetricHandle {
    match s {
        MetricStorage::Counter(a) => MetricHandle::Counter(a.clone()),
        MetricStorage::Gauge(a) => MetricHandle::Gauge(a.clone()),
        MetricStorage::Rate(a) => MetricHandle::Rate(a.clone()),
        MetricStorage::Trend(a) => MetricHandle::Trend(a.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent_per_name() {
        let reg = Registry::default();
        let a = reg.register("iterations", MetricKind::Counter);
        let b = reg.register("iterations", MetricKind::Counter);
        assert_eq!(a, b);
        assert_eq!(reg.lookup("iterations"), Some((a, MetricKind::Counter)));
        assert!(reg.lookup("nope").is_none());
    }

    #[test]
    fn counter_sum_is_order_and_series_independent() {
        let reg = Registry::default();
        let id = reg.register("errors", MetricKind::Counter);

        let t1 = reg.resolve_tags(&[("scenario", "smoke")]);
        let t2 = reg.resolve_tags(&[("scenario", "load")]);

        if let Some(h) = reg.handle(id, t2) {
            h.increment(3);
        }
        if let Some(h) = reg.handle(id, t1.clone()) {
            h.increment(2);
            h.increment(5);
        }

        assert_eq!(reg.fold_counter_sum(id, &TagSet::default()), 10);
        assert_eq!(reg.fold_counter_sum(id, &t1), 7);
    }

    #[test]
    fn concurrent_counter_appends_are_not_lost() {
        let reg = std::sync::Arc::new(Registry::default());
        let id = reg.register("hits", MetricKind::Counter);
        let tags = reg.resolve_tags(&[("scenario", "smoke")]);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let reg = reg.clone();
            let tags = tags.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    if let Some(h) = reg.handle(id, tags.clone()) {
                        h.increment(1);
                    }
                }
            }));
        }
        for h in handles {
            let _ = h.join();
        }

        assert_eq!(reg.fold_counter_sum(id, &TagSet::default()), 8000);
    }

    #[test]
    fn rate_bounds_hold_for_uniform_samples() {
        let reg = Registry::default();
        let id = reg.register("checks", MetricKind::Rate);
        let tags = reg.resolve_tags(&[("scenario", "smoke")]);

        let Some(h) = reg.handle(id, tags) else {
            panic!("expected rate handle");
        };
        for _ in 0..5 {
            h.add_rate(true);
        }
        let (total, hits) = reg.fold_rate(id, &TagSet::default());
        assert_eq!((total, hits), (5, 5));

        for _ in 0..5 {
            h.add_rate(false);
        }
        let (total, hits) = reg.fold_rate(id, &TagSet::default());
        assert_eq!((total, hits), (10, 5));
    }

    #[test]
    fn trend_fold_merges_series_and_is_idempotent() {
        let reg = Registry::default();
        let id = reg.register("http_req_duration", MetricKind::Trend);

        let t1 = reg.resolve_tags(&[("scenario", "smoke"), ("endpoint", "/posts")]);
        let t2 = reg.resolve_tags(&[("scenario", "smoke"), ("endpoint", "/posts/{id}")]);

        if let Some(h) = reg.handle(id, t1) {
            h.observe_trend(100.0);
            h.observe_trend(200.0);
            h.observe_trend(300.0);
        }
        if let Some(h) = reg.handle(id, t2.clone()) {
            h.observe_trend(400.0);
            h.observe_trend(500.0);
        }

        let all = reg.fold_trend_summary(id, &TagSet::default());
        assert_eq!(all.count, 5);
        assert_eq!(all.mean, Some(300.0));
        assert_eq!(all.p95, Some(480.0));

        // Repeated snapshots over frozen data must agree.
        let again = reg.fold_trend_summary(id, &TagSet::default());
        assert_eq!(all, again);

        let filtered = reg.fold_trend_summary(id, &t2);
        assert_eq!(filtered.count, 2);
        assert_eq!(filtered.mean, Some(450.0));
    }

    #[test]
    fn gauge_fold_takes_peak_across_series() {
        let reg = Registry::default();
        let id = reg.register("workers_active_max", MetricKind::Gauge);

        let t1 = reg.resolve_tags(&[("scenario", "smoke")]);
        let t2 = reg.resolve_tags(&[("scenario", "load")]);
        if let Some(h) = reg.handle(id, t1) {
            h.set_gauge(2);
        }
        if let Some(h) = reg.handle(id, t2) {
            h.set_gauge(10);
        }

        assert_eq!(reg.fold_gauge_max(id, &TagSet::default()), Some(10));
        assert_eq!(
            reg.fold_gauge_max(reg.register("absent", MetricKind::Gauge), &TagSet::default()),
            None
        );
    }

    #[test]
    fn snapshot_lists_metrics_sorted_by_name() {
        let reg = Registry::default();
        let b = reg.register("b_metric", MetricKind::Counter);
        let _a = reg.register("a_metric", MetricKind::Rate);
        if let Some(h) = reg.handle(b, TagSet::default()) {
            h.increment(1);
        }

        let snap = reg.snapshot();
        let names: Vec<&str> = snap.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a_metric", "b_metric"]);
    }
}
