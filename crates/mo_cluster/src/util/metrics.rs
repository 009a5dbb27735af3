use crate::api::v1alpha1::MatrixOneCluster;
use crate::util::errors::Error;
use kube::ResourceExt;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub failed_stores: IntGaugeVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "mo_controller_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds",
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["instance"],
        )
        .expect("valid histogram definition");
        let failures = IntCounterVec::new(
            opts!("mo_controller_reconciliation_errors_total", "reconciliation errors",),
            &["instance", "error"],
        )
        .expect("valid counter definition");
        let reconciliations =
            IntCounter::new("mo_reconciliations_total", "reconciliations").expect("valid counter definition");
        let failed_stores = IntGaugeVec::new(
            opts!("mo_logservice_failed_stores", "log service stores currently marked failed"),
            &["cluster"],
        )
        .expect("valid gauge definition");
        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            failed_stores,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.failed_stores.clone()))?;
        Ok(self)
    }

    pub fn reconcile_cluster_failure(&self, cluster: &MatrixOneCluster, e: &Error) {
        self.failures
            .with_label_values(&[cluster.name_any().as_ref(), e.metric_label().as_ref()])
            .inc()
    }

    pub fn set_failed_stores(&self, cluster: &MatrixOneCluster, count: usize) {
        self.failed_stores
            .with_label_values(&[cluster.name_any().as_str()])
            .set(count as i64)
    }

    pub fn count_and_measure(&self, controller: &str) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            instance: controller.to_string(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
    instance: String,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[self.instance.as_str()])
            .observe(duration);
    }
}
