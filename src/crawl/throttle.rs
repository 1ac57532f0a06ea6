use std::time::Duration;

/// Per-category politeness delay.
///
/// Starts at `min`. After each response the delay moves halfway toward the
/// observed latency and never drops below it, staying inside `[min, max]`.
/// Failed responses may only raise the delay.
#[derive(Debug, Clone)]
pub struct Throttle {
    min: Duration,
    max: Duration,
    delay: Duration,
}

impl Throttle {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Throttle { min, max, delay: min }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn record_success(&mut self, latency: Duration) {
        self.delay = self.next_delay(latency);
    }

    pub fn record_failure(&mut self, latency: Duration) {
        let next = self.next_delay(latency);
        if next > self.delay {
            self.delay = next;
        }
    }

    fn next_delay(&self, latency: Duration) -> Duration {
        let averaged = (self.delay + latency) / 2;
        averaged.max(latency).clamp(self.min, self.max)
    }
}
