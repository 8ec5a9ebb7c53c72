use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

// Bucket histogram for run-duration tracking.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>, // (upper_bound, count)
}

impl Histogram {
    fn new() -> Self {
        let bounds = vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
        Self {
            buckets: bounds.into_iter().map(|b| (b, AtomicU64::new(0))).collect(),
        }
    }

    fn record(&self, value: f64) {
        for (bound, count) in &self.buckets {
            if value <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        if let Some((_, count)) = self.buckets.last() {
            count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn to_prometheus(&self, name: &str) -> String {
        let snapshot: Vec<(f64, u64)> = self
            .buckets
            .iter()
            .map(|(bound, count)| (*bound, count.load(Ordering::Relaxed)))
            .collect();
        let total: u64 = snapshot.iter().map(|(_, c)| c).sum();
        let mut output = format!("# HELP {}_seconds Duration histogram.\n", name);
        output.push_str(&format!("# TYPE {}_seconds histogram\n", name));
        for (bound, count) in snapshot {
            output.push_str(&format!("{}{{le=\"{}\"}} {}\n", name, bound, count));
        }
        output.push_str(&format!("{}{{le=\"+Inf\"}} {}\n", name, total));
        output
    }
}

pub struct SystemMetrics {
    pub runs_total: AtomicU64,
    pub runs_failed: AtomicU64,
    pub objects_matched_total: AtomicU64,
    pub actions_executed_total: AtomicU64,
    pub actions_failed_total: AtomicU64,
    pub safeguard_skips: Mutex<HashMap<String, AtomicU64>>,
    pub rule_runs: Mutex<HashMap<String, AtomicU64>>,
    pub run_duration: Histogram,
}

impl SystemMetrics {
    pub fn new() -> Self {
        Self {
            runs_total: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            objects_matched_total: AtomicU64::new(0),
            actions_executed_total: AtomicU64::new(0),
            actions_failed_total: AtomicU64::new(0),
            safeguard_skips: Mutex::new(HashMap::new()),
            rule_runs: Mutex::new(HashMap::new()),
            run_duration: Histogram::new(),
        }
    }

    pub fn record_run(&self, rule_id: &str) {
        self.runs_total.fetch_add(1, Ordering::Relaxed);
        let mut map = self.rule_runs.lock().unwrap();
        map.entry(rule_id.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_failure(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_matched(&self, count: u64) {
        self.objects_matched_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_action_executed(&self) {
        self.actions_executed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action_failed(&self) {
        self.actions_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self, reason: &str) {
        let mut map = self.safeguard_skips.lock().unwrap();
        map.entry(reason.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_duration(&self, duration_secs: f64) {
        self.run_duration.record(duration_secs);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let skips: HashMap<String, u64> = self
            .safeguard_skips
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();
        let runs: HashMap<String, u64> = self
            .rule_runs
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            runs_total: self.runs_total.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            objects_matched_total: self.objects_matched_total.load(Ordering::Relaxed),
            actions_executed_total: self.actions_executed_total.load(Ordering::Relaxed),
            actions_failed_total: self.actions_failed_total.load(Ordering::Relaxed),
            safeguard_skips: skips,
            rule_runs: runs,
        }
    }

    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = format!(
            "# HELP adpilot_runs_total Total number of rule runs started.\n\
             # TYPE adpilot_runs_total counter\n\
             adpilot_runs_total {}\n\
             # HELP adpilot_runs_failed_total Total number of rule runs that failed at setup.\n\
             # TYPE adpilot_runs_failed_total counter\n\
             adpilot_runs_failed_total {}\n\
             # HELP adpilot_objects_matched_total Total objects matching rule conditions.\n\
             # TYPE adpilot_objects_matched_total counter\n\
             adpilot_objects_matched_total {}\n\
             # HELP adpilot_actions_executed_total Total actions applied to the platform.\n\
             # TYPE adpilot_actions_executed_total counter\n\
             adpilot_actions_executed_total {}\n\
             # HELP adpilot_actions_failed_total Total action attempts the platform rejected.\n\
             # TYPE adpilot_actions_failed_total counter\n\
             adpilot_actions_failed_total {}\n",
            snapshot.runs_total,
            snapshot.runs_failed,
            snapshot.objects_matched_total,
            snapshot.actions_executed_total,
            snapshot.actions_failed_total
        );

        output.push_str("# HELP adpilot_safeguard_skips_total Actions blocked per safeguard reason.\n");
        output.push_str("# TYPE adpilot_safeguard_skips_total counter\n");
        for (reason, count) in &snapshot.safeguard_skips {
            output.push_str(&format!(
                "adpilot_safeguard_skips_total{{reason=\"{}\"}} {}\n",
                reason, count
            ));
        }

        output.push_str("# HELP adpilot_rule_runs_total Runs per rule.\n");
        output.push_str("# TYPE adpilot_rule_runs_total counter\n");
        for (rule_id, count) in &snapshot.rule_runs {
            output.push_str(&format!(
                "adpilot_rule_runs_total{{rule_id=\"{}\"}} {}\n",
                rule_id, count
            ));
        }

        output.push_str(&self.run_duration.to_prometheus("adpilot_run_duration"));
        output
    }
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct MetricsSnapshot {
    pub runs_total: u64,
    pub runs_failed: u64,
    pub objects_matched_total: u64,
    pub actions_executed_total: u64,
    pub actions_failed_total: u64,
    pub safeguard_skips: HashMap<String, u64>,
    pub rule_runs: HashMap<String, u64>,
}

lazy_static::lazy_static! {
    pub static ref METRICS: SystemMetrics = SystemMetrics::new();
}
