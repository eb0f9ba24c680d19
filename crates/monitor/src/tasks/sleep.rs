use crate::context::MonitorContext;
use crate::errors::Result;
use crate::task::MonitorTask;
use web_time::Duration;

/// Blocks for a fixed duration, used to simulate expensive monitoring
#[derive(Clone, Debug)]
pub struct SleepTask {
    duration: Duration,
}

impl SleepTask {
    /// Constructor of a task sleeping `duration` at each run
    pub fn new(duration: Duration) -> Self {
        SleepTask { duration }
    }
}

impl MonitorTask for SleepTask {
    fn name(&self) -> String {
        "SleepTask".to_string()
    }

    fn run(&mut self, _context: &MonitorContext) -> Result<()> {
        std::thread::sleep(self.duration);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::IntoTask;

    #[test]
    fn test_sleep_time_is_accounted() {
        let mut task = SleepTask::new(Duration::from_millis(10)).into_task();
        let duration = task.execute(&MonitorContext::new()).unwrap();
        assert!(duration >= Duration::from_millis(10));
        assert_eq!(task.name(), "SleepTask");
    }
}
