use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use swr_cache::{CacheConfig, Lookup, SwrCache, SwrError};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

impl WorkloadsConfig {
    /// Rejects workloads that cannot be run.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, workload) in self.workloads.iter().enumerate() {
            let rate = workload.payload.failure_rate;
            anyhow::ensure!(
                rate.is_finite() && (0.0..=1.0).contains(&rate),
                "workload {i}: `failure_rate` must be between 0 and 1, got {rate}"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    pub concurrency: usize,
    #[serde(flatten)]
    pub payload: Payload,
}

/// What a single workload task does against its cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Read a value, awaiting the first fetch if necessary.
    #[default]
    Read,
    /// Only look at values that are available right away.
    Peek,
    /// Warm entries without waiting for them.
    Prime,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Payload {
    /// The number of distinct keys the workload spreads its accesses over.
    pub keys: u64,
    #[serde(default)]
    pub operation: Operation,
    /// The latency of the value producer.
    #[serde(with = "humantime_serde", default)]
    pub latency: Duration,
    /// The share of producer invocations that fail, between `0` and `1`.
    #[serde(default)]
    pub failure_rate: f64,
}

pub type StressCache = SwrCache<u64, u64>;

/// Creates the cache a workload runs against, with a synthetic producer.
pub fn prepare_cache(
    name: String,
    config: CacheConfig,
    payload: &Payload,
) -> Result<StressCache, SwrError> {
    let latency = payload.latency;
    let failure_rate = payload.failure_rate.clamp(0.0, 1.0);

    let producer = move |key: u64| {
        let mut rng = rand::rng();
        // up to 50% jitter around the configured latency
        let delay = latency.mul_f64(rng.random_range(0.5..1.5));
        let fail = rng.random_bool(failure_rate);

        async move {
            tokio::time::sleep(delay).await;
            if fail {
                anyhow::bail!("synthetic failure for key {key}");
            }
            Ok(key.wrapping_mul(31))
        }
    };

    SwrCache::builder(producer).name(name).config(config).build()
}

/// The outcome of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A value was available right away.
    Hit,
    /// The caller had to wait for the producer.
    Miss,
    /// Nothing was returned, either because the producer failed or because it was a peek or prime.
    Empty,
}

pub async fn process_payload(cache: &StressCache, payload: &Payload) -> Outcome {
    let key = rand::rng().random_range(0..payload.keys.max(1));

    match payload.operation {
        Operation::Read => match cache.read(key) {
            Ok(Lookup::Ready(_)) => Outcome::Hit,
            Ok(Lookup::Pending(handle)) => match handle.await {
                Ok(_) => Outcome::Miss,
                Err(err) => {
                    tracing::trace!(key, error = &err as &dyn std::error::Error, "Read failed");
                    Outcome::Empty
                }
            },
            Err(_) => Outcome::Empty,
        },
        Operation::Peek => match cache.peek(&key) {
            Some(_) => Outcome::Hit,
            None => Outcome::Empty,
        },
        Operation::Prime => {
            let _ = cache.prime(key);
            Outcome::Empty
        }
    }
}
