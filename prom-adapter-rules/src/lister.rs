//! The periodic series lister: fans out one discovery call per distinct rule
//! selector, filters through each namer and publishes the result to the
//! registries.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::try_join_all;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, error};

use prom_adapter_promapi::{Error as PromError, QueryBackend, Selector, Series};

use crate::naming::MetricNamer;

/// One discovery cycle's output: `series[i]` is the filtered series list for
/// `namers[i]`.
#[derive(Clone, Debug, Default)]
pub struct MetricUpdateResult {
    pub series: Vec<Vec<Series>>,
    pub namers: Vec<Arc<MetricNamer>>,
}

pub type UpdateCallback = Box<dyn Fn(&MetricUpdateResult) + Send + Sync>;

/// Periodically refreshes the series catalog.
///
/// Readers of `most_recent` never block on a refresh; a failed cycle leaves
/// the previous snapshot in place.
pub struct PeriodicLister {
    backend: Arc<dyn QueryBackend>,
    namers: Vec<Arc<MetricNamer>>,
    interval: Duration,
    lookback: Duration,
    callbacks: Vec<UpdateCallback>,
    most_recent: RwLock<Option<Arc<MetricUpdateResult>>>,
}

impl PeriodicLister {
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        namers: Vec<Arc<MetricNamer>>,
        interval: Duration,
        lookback: Duration,
    ) -> Self {
        Self {
            backend,
            namers,
            interval,
            lookback,
            callbacks: Vec::new(),
            most_recent: RwLock::new(None),
        }
    }

    /// Register a callback run synchronously after every successful cycle.
    /// Callbacks must be registered before the lister starts.
    pub fn add_callback(&mut self, callback: UpdateCallback) {
        self.callbacks.push(callback);
    }

    /// The most recent successful cycle, if any completed yet.
    pub fn most_recent(&self) -> Option<Arc<MetricUpdateResult>> {
        self.most_recent.read().clone()
    }

    /// Run one discovery cycle now. On error the previous snapshot stays
    /// visible and no callback runs.
    pub async fn update_now(&self) -> Result<(), PromError> {
        let end = Utc::now();
        let start = end
            - chrono::Duration::from_std(self.lookback)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));

        let distinct: BTreeSet<&Selector> =
            self.namers.iter().map(|namer| namer.selector()).collect();

        let fetches = distinct.iter().map(|selector| {
            let backend = Arc::clone(&self.backend);
            async move {
                backend
                    .series(start, end, std::slice::from_ref(*selector))
                    .await
                    .map(|series| ((*selector).clone(), series))
            }
        });
        let fetched: BTreeMap<Selector, Vec<Series>> =
            try_join_all(fetches).await?.into_iter().collect();

        let series = self
            .namers
            .iter()
            .map(|namer| {
                let candidates = fetched
                    .get(namer.selector())
                    .cloned()
                    .unwrap_or_default();
                dedup(namer.filter_series(candidates))
            })
            .collect();

        let result = Arc::new(MetricUpdateResult {
            series,
            namers: self.namers.clone(),
        });

        *self.most_recent.write() = Some(Arc::clone(&result));
        for callback in &self.callbacks {
            callback(&result);
        }
        debug!(
            selectors = distinct.len(),
            namers = self.namers.len(),
            "series catalog refreshed"
        );
        Ok(())
    }

    /// Tick until the stop channel is closed; a tick in flight finishes
    /// before exit.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let update_result = self.update_now().await;
                    if let Err(err) = update_result {
                        error!(error = %err, "series discovery failed, keeping previous catalog");
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        // sender dropped: shut down
                        return;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for PeriodicLister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicLister")
            .field("namers", &self.namers.len())
            .field("interval", &self.interval)
            .field("lookback", &self.lookback)
            .field("callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

/// The backend may return the same series for overlapping selectors.
fn dedup(series: Vec<Series>) -> Vec<Series> {
    let mut seen = HashSet::new();
    series
        .into_iter()
        .filter(|series| seen.insert(series.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap as StdBTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use prom_adapter_promapi::QueryResult;

    use super::*;
    use crate::config::{GroupResourceSpec, NameMapping, ResourceMapping, Rule};
    use crate::mapper::ResourceMapper;

    struct ScriptedBackend {
        calls: AtomicUsize,
        fail_from_call: Option<usize>,
        series: Vec<Series>,
    }

    impl ScriptedBackend {
        fn returning(series: Vec<Series>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_from_call: None,
                series,
            }
        }

        fn failing_from(series: Vec<Series>, call: usize) -> Self {
            Self {
                fail_from_call: Some(call),
                ..Self::returning(series)
            }
        }
    }

    #[async_trait]
    impl QueryBackend for ScriptedBackend {
        async fn series(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _selectors: &[Selector],
        ) -> Result<Vec<Series>, PromError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_from_call.is_some_and(|from| call >= from) {
                return Err(PromError::Exec("backend down".to_string()));
            }
            Ok(self.series.clone())
        }

        async fn query(&self, _at: DateTime<Utc>, _expr: &str) -> Result<QueryResult, PromError> {
            unimplemented!("not used by the lister")
        }

        async fn query_range(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _step: Duration,
            _expr: &str,
        ) -> Result<QueryResult, PromError> {
            unimplemented!("not used by the lister")
        }
    }

    fn rule(series_query: &str) -> Rule {
        Rule {
            series_query: series_query.to_string(),
            series_filters: Vec::new(),
            resources: ResourceMapping {
                template: None,
                overrides: StdBTreeMap::from([(
                    "pod".to_string(),
                    GroupResourceSpec::resource("pod"),
                )]),
                namespaced: None,
            },
            name: NameMapping::default(),
            metrics_query: "sum(<<.Series>>{<<.LabelMatchers>>}) by (<<.GroupBy>>)".to_string(),
        }
    }

    fn namer(series_query: &str) -> Arc<MetricNamer> {
        Arc::new(MetricNamer::from_rule(&rule(series_query), Arc::new(ResourceMapper::default())).unwrap())
    }

    #[tokio::test]
    async fn distinct_selectors_are_fetched_once() {
        let backend = Arc::new(ScriptedBackend::returning(vec![Series::new("up")]));
        let backend_clone = Arc::clone(&backend);
        let dyn_backend: Arc<dyn QueryBackend> = backend_clone;
        let lister = PeriodicLister::new(
            dyn_backend,
            vec![namer("up"), namer("up"), namer("other")],
            Duration::from_secs(60),
            Duration::from_secs(600),
        );

        lister.update_now().await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_cycle_preserves_previous_snapshot() {
        let backend = Arc::new(ScriptedBackend::failing_from(
            vec![Series::new("queue_length").label("queue_name", "processing")],
            1,
        ));
        let backend_clone = Arc::clone(&backend);
        let dyn_backend: Arc<dyn QueryBackend> = backend_clone;
        let lister = PeriodicLister::new(
            dyn_backend,
            vec![namer("queue_length")],
            Duration::from_secs(60),
            Duration::from_secs(600),
        );

        lister.update_now().await.unwrap();
        let first = lister.most_recent().unwrap();
        assert_eq!(first.series[0].len(), 1);

        let err = lister.update_now().await.unwrap_err();
        assert!(matches!(err, PromError::Exec(_)));

        let after_failure = lister.most_recent().unwrap();
        assert!(Arc::ptr_eq(&first, &after_failure));
    }

    #[tokio::test]
    async fn callbacks_observe_the_published_snapshot() {
        let backend = Arc::new(ScriptedBackend::returning(vec![
            Series::new("queue_length"),
            Series::new("queue_length"),
        ]));
        let observed = Arc::new(Mutex::new(Vec::new()));

        let mut lister = PeriodicLister::new(
            backend,
            vec![namer("queue_length")],
            Duration::from_secs(60),
            Duration::from_secs(600),
        );
        let sink = Arc::clone(&observed);
        lister.add_callback(Box::new(move |result| {
            sink.lock().unwrap().push(result.series.clone());
        }));

        lister.update_now().await.unwrap();

        let observed = observed.lock().unwrap();
        assert_eq!(observed.len(), 1);
        // duplicates collapsed before publication
        assert_eq!(observed[0][0], vec![Series::new("queue_length")]);
    }

    #[tokio::test]
    async fn no_snapshot_before_first_cycle() {
        let backend = Arc::new(ScriptedBackend::returning(Vec::new()));
        let lister = PeriodicLister::new(
            backend,
            vec![namer("up")],
            Duration::from_secs(60),
            Duration::from_secs(600),
        );

        assert!(lister.most_recent().is_none());
    }
}
