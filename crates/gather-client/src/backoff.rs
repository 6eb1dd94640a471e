use std::time::Duration;

/// Fixed reconnect schedule: increasing delays up to a hard bound, not
/// unbounded exponential growth. Once the schedule is exhausted the
/// controller stops retrying and a prolonged outage shows as a persistent
/// degraded indicator until `ensure_connected` is called again.
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    delays: Vec<Duration>,
}

impl ReconnectSchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Delay before reconnect attempt `attempt` (0-based), or `None` once
    /// the attempt bound is reached.
    pub fn delay_for(&self, attempt: usize) -> Option<Duration> {
        self.delays.get(attempt).copied()
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len()
    }
}

impl Default for ReconnectSchedule {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(30),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_increase_then_stop_at_the_bound() {
        let schedule = ReconnectSchedule::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..schedule.max_attempts() {
            let delay = schedule.delay_for(attempt).unwrap();
            assert!(delay > previous);
            previous = delay;
        }
        assert_eq!(schedule.delay_for(schedule.max_attempts()), None);
        assert_eq!(schedule.delay_for(schedule.max_attempts() + 10), None);
    }

    #[test]
    fn empty_schedule_never_retries() {
        let schedule = ReconnectSchedule::new(Vec::new());
        assert_eq!(schedule.delay_for(0), None);
    }
}
