//! Tracking how long each log service store has been failing.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use crate::api::v1alpha1::{FailedStore, FailoverStatus};

/// Health of one store as observed in this pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreHealth {
    pub store_id: String,
    pub healthy: bool,
}

/// Store id to the time it was first seen failing.
///
/// Loaded from and written back to [`FailoverStatus`] every pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FailoverTracker {
    failed: BTreeMap<String, DateTime<Utc>>,
}

impl FailoverTracker {
    pub fn from_status(status: &FailoverStatus) -> Self {
        let failed = status
            .failed_stores
            .iter()
            .map(|s| (s.store_id.clone(), s.last_transition_time.0))
            .collect();
        Self { failed }
    }

    /// Records a failure. An existing record keeps its original time.
    pub fn record_failure(&mut self, store_id: &str, now: DateTime<Utc>) -> bool {
        if self.failed.contains_key(store_id) {
            return false;
        }
        self.failed.insert(store_id.to_string(), now);
        true
    }

    pub fn record_recovery(&mut self, store_id: &str) -> bool {
        self.failed.remove(store_id).is_some()
    }

    /// Applies a full health report. Stores missing from the report are forgotten.
    pub fn observe(&mut self, report: &[StoreHealth], now: DateTime<Utc>) {
        self.failed
            .retain(|id, _| report.iter().any(|h| &h.store_id == id));
        for health in report {
            if health.healthy {
                self.record_recovery(&health.store_id);
            } else {
                self.record_failure(&health.store_id, now);
            }
        }
    }

    /// Stores that have been failing for at least `threshold`.
    pub fn failed_for(&self, threshold: Duration, now: DateTime<Utc>) -> Vec<String> {
        self.failed
            .iter()
            .filter(|(_, since)| (now - **since).to_std().is_ok_and(|elapsed| elapsed >= threshold))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Restarts the clock of a store that was just replaced.
    pub fn rearm(&mut self, store_id: &str, now: DateTime<Utc>) {
        if let Some(since) = self.failed.get_mut(store_id) {
            *since = now;
        }
    }

    pub fn len(&self) -> usize {
        self.failed.len()
    }

    /// Records ordered by failure time, then store id.
    pub fn to_status(&self) -> FailoverStatus {
        let mut failed_stores: Vec<FailedStore> = self
            .failed
            .iter()
            .map(|(id, since)| FailedStore {
                store_id: id.clone(),
                last_transition_time: Time(*since),
            })
            .collect();
        failed_stores.sort_by(|a, b| {
            a.last_transition_time
                .0
                .cmp(&b.last_transition_time.0)
                .then_with(|| a.store_id.cmp(&b.store_id))
        });
        FailoverStatus { failed_stores }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn health(id: &str, healthy: bool) -> StoreHealth {
        StoreHealth {
            store_id: id.to_string(),
            healthy,
        }
    }

    #[test]
    fn failures_are_sticky() {
        let t0 = Utc::now();
        let mut tracker = FailoverTracker::default();
        assert!(tracker.record_failure("log-0", t0));
        assert!(!tracker.record_failure("log-0", t0 + ChronoDuration::minutes(5)));
        assert_eq!(tracker.to_status().failed_stores[0].last_transition_time, Time(t0));
    }

    #[test]
    fn failed_for_respects_threshold() {
        let now = Utc::now();
        let d = Duration::from_secs(600);
        let mut tracker = FailoverTracker::default();
        tracker.record_failure("old", now - ChronoDuration::seconds(1200));
        tracker.record_failure("fresh", now - ChronoDuration::seconds(300));
        tracker.record_failure("exact", now - ChronoDuration::seconds(600));

        assert_eq!(tracker.failed_for(d, now), vec!["exact".to_string(), "old".to_string()]);
    }

    #[test]
    fn recovery_and_rearm_reset_the_clock() {
        let now = Utc::now();
        let d = Duration::from_secs(60);
        let mut tracker = FailoverTracker::default();
        tracker.record_failure("a", now - ChronoDuration::seconds(120));
        tracker.record_failure("b", now - ChronoDuration::seconds(120));

        tracker.rearm("a", now);
        assert!(tracker.record_recovery("b"));
        assert!(tracker.failed_for(d, now).is_empty());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn observe_forgets_unreported_stores() {
        let now = Utc::now();
        let mut tracker = FailoverTracker::default();
        tracker.record_failure("gone", now);
        tracker.record_failure("recovered", now);

        tracker.observe(&[health("recovered", true), health("new", false)], now);
        let ids: Vec<_> = tracker.to_status().failed_stores.into_iter().map(|s| s.store_id).collect();
        assert_eq!(ids, vec!["new".to_string()]);
    }

    #[test]
    fn status_round_trip_keeps_times() {
        let t0 = Utc::now() - ChronoDuration::minutes(3);
        let mut tracker = FailoverTracker::default();
        tracker.record_failure("b", t0);
        tracker.record_failure("a", t0 + ChronoDuration::minutes(1));

        let status = tracker.to_status();
        assert_eq!(status.failed_stores[0].store_id, "b");
        assert_eq!(FailoverTracker::from_status(&status), tracker);
    }
}
