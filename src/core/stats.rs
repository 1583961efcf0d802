use std::time::Instant;
use serde::{Serialize, Deserialize};

/// Shard counters for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardStats {
    pub records: usize,
    pub features: usize,
    /// Features reachable through the built graph (0 for other indexes).
    pub indexed: usize,
}

/// Liveness information kept by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingResponse {
    pub first_start_time: i64,
    pub last_start_time: i64,
    pub restart_count: u64,
}

/// Journal scan summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalStats {
    pub objects: usize,
    pub features: usize,
}

impl JournalStats {
    pub fn features_per_object(&self) -> f64 {
        if self.objects == 0 {
            return 0.0;
        }
        self.features as f64 / self.objects as f64
    }
}

/// Wall-clock stopwatch reporting seconds.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Timer { start: Instant::now() }
    }

    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
