//! Phase timing.

use std::time::Instant;

use tracing::info;

/// Logs how long a pipeline phase took when finished.
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    pub fn start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn finish(self) {
        let secs = self.elapsed_secs();
        if secs >= 60.0 {
            info!(phase = %self.name, "[{:.1}m] {}", secs / 60.0, self.name);
        } else {
            info!(phase = %self.name, "[{:.1}s] {}", secs, self.name);
        }
    }
}
