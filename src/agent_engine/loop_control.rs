use std::time::Instant;

use crate::agent_engine::state::Action;
use crate::config::AgentConfig;

/// Tracks every budget that can end a task: step count, wall clock,
/// consecutive decode failures, and the repeated-action guard.
pub struct LoopController {
    max_steps: u32,
    start_time: Instant,
    max_duration_secs: Option<u64>,
    stuck_threshold: u32,
    max_decode_failures: u32,
    decode_failures: u32,
    last_action: Option<Action>,
    repeat_count: u32,
}

impl LoopController {
    pub fn new(max_steps: u32, config: &AgentConfig) -> Self {
        Self {
            max_steps,
            start_time: Instant::now(),
            max_duration_secs: config.max_duration_secs,
            stuck_threshold: config.stuck_threshold,
            max_decode_failures: config.max_decode_failures,
            decode_failures: 0,
            last_action: None,
            repeat_count: 0,
        }
    }

    pub fn budget_exhausted(&self, steps_taken: u32) -> bool {
        steps_taken >= self.max_steps
    }

    pub fn over_deadline(&self) -> bool {
        match self.max_duration_secs {
            Some(secs) => self.start_time.elapsed().as_secs() >= secs,
            None => false,
        }
    }

    /// Returns the new consecutive count.
    pub fn record_decode_failure(&mut self) -> u32 {
        self.decode_failures += 1;
        self.decode_failures
    }

    pub fn decode_failures_exceeded(&self) -> bool {
        self.decode_failures >= self.max_decode_failures
    }

    pub fn reset_decode_failures(&mut self) {
        self.decode_failures = 0;
    }

    /// Feeds the duplicate guard. Returns how many consecutive turns have
    /// produced this exact action, counting this one.
    pub fn observe(&mut self, action: &Action) -> u32 {
        if self.last_action.as_ref() == Some(action) {
            self.repeat_count += 1;
        } else {
            self.last_action = Some(action.clone());
            self.repeat_count = 1;
        }
        self.repeat_count
    }

    pub fn is_stuck(&self) -> bool {
        self.repeat_count >= self.stuck_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(max_steps: u32) -> LoopController {
        LoopController::new(max_steps, &AgentConfig::default())
    }

    #[test]
    fn test_step_budget() {
        let ctrl = controller(3);
        assert!(!ctrl.budget_exhausted(2));
        assert!(ctrl.budget_exhausted(3));
    }

    #[test]
    fn test_stuck_guard_counts_consecutive_repeats() {
        let mut ctrl = controller(100);
        let tap = Action::Tap { x: 1, y: 2 };
        let other = Action::Wait { duration_ms: 10 };

        assert_eq!(ctrl.observe(&tap), 1);
        assert_eq!(ctrl.observe(&tap), 2);
        assert!(!ctrl.is_stuck());
        assert_eq!(ctrl.observe(&tap), 3);
        assert!(ctrl.is_stuck());

        // A different action resets the run.
        assert_eq!(ctrl.observe(&other), 1);
        assert!(!ctrl.is_stuck());
    }

    #[test]
    fn test_decode_failure_counter_resets() {
        let mut ctrl = controller(100);
        ctrl.record_decode_failure();
        ctrl.record_decode_failure();
        assert!(!ctrl.decode_failures_exceeded());
        ctrl.record_decode_failure();
        assert!(ctrl.decode_failures_exceeded());
        ctrl.reset_decode_failures();
        assert!(!ctrl.decode_failures_exceeded());
    }
}
