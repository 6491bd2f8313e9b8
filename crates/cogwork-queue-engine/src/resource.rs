//! System resource monitoring and degradation levels.
//!
//! The monitor samples a pluggable probe every five seconds and publishes a
//! degradation level the rest of the engine reads synchronously: the queue
//! manager refuses additions under `Severe`, the scheduler stretches its
//! snapshot cadence, and recovery short-circuits to emergency queues.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cogwork_queue_types::EngineError;

/// System-wide hint derived from resource headroom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DegradationLevel {
    None,
    Minimal,
    Moderate,
    Severe,
}

impl DegradationLevel {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DegradationLevel::None,
            1 => DegradationLevel::Minimal,
            2 => DegradationLevel::Moderate,
            _ => DegradationLevel::Severe,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            DegradationLevel::None => 0,
            DegradationLevel::Minimal => 1,
            DegradationLevel::Moderate => 2,
            DegradationLevel::Severe => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DegradationLevel::None => "none",
            DegradationLevel::Minimal => "minimal",
            DegradationLevel::Moderate => "moderate",
            DegradationLevel::Severe => "severe",
        }
    }
}

/// One probe reading. Fractions of capacity in use, in [0,1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub memory_used: f64,
    pub cpu_used: f64,
}

/// Source of resource readings. Hosts supply a real probe; tests script one.
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    async fn sample(&self) -> Result<ResourceSample, EngineError>;
}

/// Probe returning a manually set sample. The default reading reports full
/// headroom, which disables degradation for hosts that wire no probe.
#[derive(Default)]
pub struct ManualProbe {
    sample: RwLock<ResourceSample>,
}

impl ManualProbe {
    pub fn new(memory_used: f64, cpu_used: f64) -> Self {
        Self {
            sample: RwLock::new(ResourceSample {
                memory_used,
                cpu_used,
            }),
        }
    }

    pub fn set(&self, memory_used: f64, cpu_used: f64) {
        *self.sample.write() = ResourceSample {
            memory_used,
            cpu_used,
        };
    }
}

#[async_trait]
impl ResourceProbe for ManualProbe {
    async fn sample(&self) -> Result<ResourceSample, EngineError> {
        Ok(*self.sample.read())
    }
}

/// Map a reading to a degradation level from the tighter of the two
/// headrooms.
pub fn classify(sample: ResourceSample) -> DegradationLevel {
    let pressure = sample.memory_used.max(sample.cpu_used);
    if pressure < 0.70 {
        DegradationLevel::None
    } else if pressure < 0.80 {
        DegradationLevel::Minimal
    } else if pressure < 0.90 {
        DegradationLevel::Moderate
    } else {
        DegradationLevel::Severe
    }
}

/// Periodically samples the probe and publishes the current level.
pub struct ResourceMonitor {
    probe: Arc<dyn ResourceProbe>,
    level: AtomicU8,
    sample_interval: Duration,
}

impl ResourceMonitor {
    pub fn new(probe: Arc<dyn ResourceProbe>) -> Self {
        Self {
            probe,
            level: AtomicU8::new(DegradationLevel::None.as_u8()),
            sample_interval: Duration::from_secs(5),
        }
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Current degradation level (last published sample).
    pub fn level(&self) -> DegradationLevel {
        DegradationLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Take one sample and publish the resulting level.
    pub async fn sample_once(&self) -> DegradationLevel {
        let level = match self.probe.sample().await {
            Ok(sample) => classify(sample),
            Err(err) => {
                // A failing probe is itself a sign of pressure.
                warn!(error = %err, "Resource probe failed; assuming moderate degradation");
                DegradationLevel::Moderate
            }
        };
        let previous = DegradationLevel::from_u8(
            self.level.swap(level.as_u8(), Ordering::Relaxed),
        );
        if previous != level {
            info!(
                from = previous.as_str(),
                to = level.as_str(),
                "Degradation level changed"
            );
        }
        level
    }

    /// Sampling loop; runs until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        debug!(
            interval_ms = self.sample_interval.as_millis() as u64,
            "Resource monitor started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Resource monitor stopped");
                    return;
                }
                _ = tokio::time::sleep(self.sample_interval) => {
                    self.sample_once().await;
                }
            }
        }
    }
}
