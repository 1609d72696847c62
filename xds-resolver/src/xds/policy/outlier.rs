//! Outlier detection: consecutive-error ejection plus a periodic sweep that
//! applies success-rate and failure-percentage statistical ejection (§4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub(crate) struct OutlierDetectionConfig {
    pub interval: Duration,
    pub base_ejection_time: Duration,
    pub consecutive_5xx: u32,
    pub max_ejection_percent: u32,
    pub success_rate_minimum_hosts: u32,
    pub success_rate_request_volume: u32,
    pub success_rate_stdev_factor: u32,
    pub failure_percentage_minimum_hosts: u32,
    pub failure_percentage_request_volume: u32,
    pub failure_percentage_threshold: u32,
}

impl Default for OutlierDetectionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            base_ejection_time: Duration::from_secs(30),
            consecutive_5xx: 5,
            max_ejection_percent: 10,
            success_rate_minimum_hosts: 5,
            success_rate_request_volume: 100,
            success_rate_stdev_factor: 1900,
            failure_percentage_minimum_hosts: 5,
            failure_percentage_request_volume: 50,
            failure_percentage_threshold: 85,
        }
    }
}

#[derive(Debug, Default)]
struct HostCounters {
    consecutive_errors: AtomicU32,
    success: AtomicU32,
    failure: AtomicU32,
    ejected: AtomicBool,
    ejection_multiplier: AtomicU32,
    /// Instant at which this host's current ejection expires. `None` when
    /// the host has never been ejected or has since been un-ejected.
    ejection_deadline: Mutex<Option<Instant>>,
}

/// Per-cluster outlier detector, keyed by endpoint address.
#[derive(Debug)]
pub(crate) struct OutlierDetector {
    config: OutlierDetectionConfig,
    hosts: Mutex<HashMap<String, HostCounters>>,
    last_sweep: Mutex<Instant>,
}

impl OutlierDetector {
    pub(crate) fn new(config: OutlierDetectionConfig) -> Self {
        Self { config, hosts: Mutex::new(HashMap::new()), last_sweep: Mutex::new(Instant::now()) }
    }

    /// Derives a binary success/failure classification and updates this
    /// host's consecutive-error counter, ejecting immediately when the
    /// `consecutive5xx` threshold is crossed.
    pub(crate) fn report(&self, host: &str, success: bool, now: Instant) {
        let mut hosts = self.hosts.lock().unwrap();
        let counters = hosts.entry(host.to_string()).or_default();
        if success {
            counters.consecutive_errors.store(0, Ordering::Relaxed);
            counters.success.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failure.fetch_add(1, Ordering::Relaxed);
            let consecutive = counters.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
            if consecutive >= self.config.consecutive_5xx {
                self.eject(host, &mut hosts, now);
            }
        }
    }

    pub(crate) fn is_ejected(&self, host: &str) -> bool {
        self.hosts
            .lock()
            .unwrap()
            .get(host)
            .map(|c| c.ejected.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Runs the periodic sweep if `interval` has elapsed: applies
    /// success-rate and failure-percentage statistical ejection across all
    /// known hosts, capped at `maxEjectionPercent` of the total host count,
    /// then resets each host's request counters for the next window.
    pub(crate) fn maybe_sweep(&self, now: Instant) {
        let mut last_sweep = self.last_sweep.lock().unwrap();
        if now.duration_since(*last_sweep) < self.config.interval {
            return;
        }
        *last_sweep = now;
        drop(last_sweep);

        let mut hosts = self.hosts.lock().unwrap();

        let expired: Vec<String> = hosts
            .iter()
            .filter(|(_, c)| c.ejected.load(Ordering::Relaxed))
            .filter(|(_, c)| c.ejection_deadline.lock().unwrap().is_some_and(|deadline| now >= deadline))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &expired {
            if let Some(counters) = hosts.get(name.as_str()) {
                counters.ejected.store(false, Ordering::Relaxed);
                counters.consecutive_errors.store(0, Ordering::Relaxed);
                *counters.ejection_deadline.lock().unwrap() = None;
            }
        }

        let total_hosts = hosts.len();
        if total_hosts == 0 {
            return;
        }
        let max_ejections = (total_hosts * self.config.max_ejection_percent as usize / 100).max(1);
        let already_ejected = hosts.values().filter(|c| c.ejected.load(Ordering::Relaxed)).count();
        let mut budget = max_ejections.saturating_sub(already_ejected);

        let eligible: Vec<(String, f64, u32)> = hosts
            .iter()
            .filter(|(_, c)| !c.ejected.load(Ordering::Relaxed))
            .filter_map(|(name, c)| {
                let success = c.success.load(Ordering::Relaxed);
                let failure = c.failure.load(Ordering::Relaxed);
                let total = success + failure;
                if total == 0 {
                    return None;
                }
                let success_rate = success as f64 / total as f64 * 100.0;
                Some((name.clone(), success_rate, total))
            })
            .collect();

        // Success-rate outliers: computed over hosts with enough volume,
        // eject anything more than `stdevFactor / 1000` standard deviations
        // below the mean.
        if eligible.len() as u32 >= self.config.success_rate_minimum_hosts {
            let qualifying: Vec<&(String, f64, u32)> = eligible
                .iter()
                .filter(|(_, _, volume)| *volume >= self.config.success_rate_request_volume)
                .collect();
            if !qualifying.is_empty() {
                let mean = qualifying.iter().map(|(_, rate, _)| rate).sum::<f64>() / qualifying.len() as f64;
                let variance = qualifying.iter().map(|(_, rate, _)| (rate - mean).powi(2)).sum::<f64>()
                    / qualifying.len() as f64;
                let stddev = variance.sqrt();
                let threshold = mean - (self.config.success_rate_stdev_factor as f64 / 1000.0) * stddev;

                for (name, success_rate, volume) in &eligible {
                    if budget == 0 {
                        break;
                    }
                    if *volume >= self.config.success_rate_request_volume && *success_rate < threshold {
                        self.eject(name, &mut hosts, now);
                        budget -= 1;
                    }
                }
            }
        }

        if eligible.len() as u32 >= self.config.failure_percentage_minimum_hosts {
            for (name, success_rate, volume) in &eligible {
                if budget == 0 {
                    break;
                }
                if *volume >= self.config.failure_percentage_request_volume
                    && (100.0 - success_rate) >= self.config.failure_percentage_threshold as f64
                    && !hosts.get(name.as_str()).is_some_and(|c| c.ejected.load(Ordering::Relaxed))
                {
                    self.eject(name, &mut hosts, now);
                    budget -= 1;
                }
            }
        }

        for counters in hosts.values() {
            counters.success.store(0, Ordering::Relaxed);
            counters.failure.store(0, Ordering::Relaxed);
        }
    }

    fn eject(&self, host: &str, hosts: &mut HashMap<String, HostCounters>, now: Instant) {
        if let Some(counters) = hosts.get(host) {
            counters.ejected.store(true, Ordering::Relaxed);
            let ejection_count = counters.ejection_multiplier.fetch_add(1, Ordering::Relaxed) + 1;
            let deadline = now + self.config.base_ejection_time * ejection_count;
            *counters.ejection_deadline.lock().unwrap() = Some(deadline);
        }
    }

    /// Ejection duration backs off linearly with repeated ejections:
    /// `baseEjectionTime * ejectionMultiplier`.
    pub(crate) fn ejection_duration(&self, host: &str) -> Duration {
        let multiplier = self
            .hosts
            .lock()
            .unwrap()
            .get(host)
            .map(|c| c.ejection_multiplier.load(Ordering::Relaxed).max(1))
            .unwrap_or(1);
        self.config.base_ejection_time * multiplier
    }

    pub(crate) fn uneject(&self, host: &str) {
        if let Some(counters) = self.hosts.lock().unwrap().get(host) {
            counters.ejected.store(false, Ordering::Relaxed);
            counters.consecutive_errors.store(0, Ordering::Relaxed);
            *counters.ejection_deadline.lock().unwrap() = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_errors_eject_immediately() {
        let detector = OutlierDetector::new(OutlierDetectionConfig { consecutive_5xx: 3, ..Default::default() });
        for _ in 0..2 {
            detector.report("10.0.0.1:80", false, Instant::now());
        }
        assert!(!detector.is_ejected("10.0.0.1:80"));
        detector.report("10.0.0.1:80", false, Instant::now());
        assert!(detector.is_ejected("10.0.0.1:80"));
    }

    #[test]
    fn success_resets_consecutive_count() {
        let detector = OutlierDetector::new(OutlierDetectionConfig { consecutive_5xx: 2, ..Default::default() });
        detector.report("h", false, Instant::now());
        detector.report("h", true, Instant::now());
        detector.report("h", false, Instant::now());
        assert!(!detector.is_ejected("h"));
    }

    #[test]
    fn uneject_clears_state() {
        let detector = OutlierDetector::new(OutlierDetectionConfig { consecutive_5xx: 1, ..Default::default() });
        detector.report("h", false, Instant::now());
        assert!(detector.is_ejected("h"));
        detector.uneject("h");
        assert!(!detector.is_ejected("h"));
    }

    #[test]
    fn deadline_expiry_unejects_during_sweep() {
        let detector = OutlierDetector::new(OutlierDetectionConfig {
            consecutive_5xx: 1,
            base_ejection_time: Duration::from_secs(30),
            interval: Duration::from_secs(1),
            ..Default::default()
        });
        let start = Instant::now();
        detector.report("h", false, start);
        assert!(detector.is_ejected("h"));

        detector.maybe_sweep(start + Duration::from_secs(10));
        assert!(detector.is_ejected("h"), "deadline not yet reached");

        detector.maybe_sweep(start + Duration::from_secs(45));
        assert!(!detector.is_ejected("h"), "deadline passed, host should be unejected");
    }

    #[test]
    fn success_rate_outlier_is_ejected() {
        let detector = OutlierDetector::new(OutlierDetectionConfig {
            interval: Duration::from_secs(1),
            success_rate_minimum_hosts: 3,
            success_rate_request_volume: 10,
            success_rate_stdev_factor: 1900,
            failure_percentage_minimum_hosts: u32::MAX,
            ..Default::default()
        });
        let now = Instant::now();
        for host in ["h1", "h2", "h3", "h4", "h5"] {
            for _ in 0..20 {
                detector.report(host, true, now);
            }
        }
        // ~25% success rate, never more than 3 consecutive failures so the
        // consecutive-5xx path doesn't eject it before the sweep runs.
        for i in 0..20 {
            detector.report("h6", i % 4 == 0, now);
        }

        detector.maybe_sweep(now + Duration::from_secs(2));

        assert!(detector.is_ejected("h6"));
        assert!(!detector.is_ejected("h1"));
    }
}
