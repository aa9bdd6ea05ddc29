use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<bool> = OnceCell::new();

#[derive(Debug, Default)]
pub struct AppMetrics {
    prompts_total: AtomicU64,
    fallback_total: AtomicU64,
    overrides_total: AtomicU64,
    completions_total: AtomicU64,
    completion_failures_total: AtomicU64,
    total_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub prompts_total: u64,
    pub fallback_total: u64,
    pub overrides_total: u64,
    pub completions_total: u64,
    pub completion_failures_total: u64,
    pub avg_latency_millis: f64,
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_prompt(&self) {
        self.prompts_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("promptly_prompts_total").increment(1);
    }

    /// Counts prompts that matched no rule and landed on `general`.
    pub fn inc_fallback(&self) {
        self.fallback_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("promptly_fallback_total").increment(1);
    }

    pub fn inc_override(&self) {
        self.overrides_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("promptly_overrides_total").increment(1);
    }

    pub fn inc_completion(&self) {
        self.completions_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("promptly_completions_total").increment(1);
    }

    pub fn inc_completion_failure(&self) {
        self.completion_failures_total
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!("promptly_completion_failures_total").increment(1);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let prompts = self.prompts_total.load(Ordering::Relaxed);
        let latency = self.total_latency_millis.load(Ordering::Relaxed);

        MetricsSnapshot {
            prompts_total: prompts,
            fallback_total: self.fallback_total.load(Ordering::Relaxed),
            overrides_total: self.overrides_total.load(Ordering::Relaxed),
            completions_total: self.completions_total.load(Ordering::Relaxed),
            completion_failures_total: self.completion_failures_total.load(Ordering::Relaxed),
            avg_latency_millis: if prompts == 0 {
                0.0
            } else {
                latency as f64 / prompts as f64
            },
        }
    }
}

/// JSON logs on stderr so command output on stdout stays machine-readable.
/// Returns whether this process ended up with the JSON subscriber installed;
/// later calls repeat the first answer.
pub fn init_tracing(service_name: &str) -> bool {
    *TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,promptly_api=info,promptly_agents=info,promptly_observability=info",
                service_name
            ))
        });

        let installed = tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .try_init()
            .is_ok();

        if installed {
            tracing::info!(service = service_name, "tracing initialized");
        }
        installed
    })
}
