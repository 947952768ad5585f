use super::*;

/// Configuration for the variable-difficulty retarget algorithm.
#[derive(Debug, Clone)]
pub struct VardiffConfig {
    /// Desired seconds between share submissions at the assigned difficulty.
    pub target_share_time: Duration,
    /// Minimum time between retarget evaluations.
    pub retarget_interval: Duration,
    /// Minimum accepted shares since the last retarget before another is considered.
    pub retarget_min_shares: u32,
    pub min_difficulty: Difficulty,
    pub max_difficulty: Difficulty,
    /// Largest single-step increase, as a multiple of the current difficulty.
    pub max_step_up: f64,
    /// Largest single-step decrease, as a fraction of the current difficulty.
    pub max_step_down: f64,
    /// Minimum relative change required before a retarget is applied.
    pub hysteresis: f64,
}

impl VardiffConfig {
    pub fn new(target_share_time: Duration, min_difficulty: Difficulty, max_difficulty: Difficulty) -> Self {
        Self {
            target_share_time,
            retarget_interval: target_share_time * 12,
            retarget_min_shares: 4,
            min_difficulty,
            max_difficulty,
            max_step_up: 4.0,
            max_step_down: 0.25,
            hysteresis: 0.10,
        }
    }
}

impl Default for VardiffConfig {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(10),
            Difficulty::from(1.0),
            Difficulty::from(1_000_000.0),
        )
    }
}

/// Per-connection variable-difficulty tracker. Counts shares received at the
/// current difficulty over a window and retargets toward
/// [`VardiffConfig::target_share_time`] once enough time has elapsed.
#[derive(Debug, Clone)]
pub struct Vardiff {
    config: VardiffConfig,
    current_diff: Difficulty,
    old_diff: Difficulty,
    shares_since_change: u32,
    window_start: Instant,
}

impl Vardiff {
    pub fn new(config: VardiffConfig, start_diff: Difficulty) -> Self {
        let start_diff = start_diff.clamp(config.min_difficulty, config.max_difficulty);
        Self {
            config,
            current_diff: start_diff,
            old_diff: start_diff,
            shares_since_change: 0,
            window_start: Instant::now(),
        }
    }

    pub fn current_diff(&self) -> Difficulty {
        self.current_diff
    }

    pub fn old_diff(&self) -> Difficulty {
        self.old_diff
    }

    /// Records an accepted share and returns a new difficulty if a retarget
    /// was triggered.
    pub fn record_share(&mut self, now: Instant) -> Option<Difficulty> {
        self.shares_since_change = self.shares_since_change.saturating_add(1);
        self.maybe_retarget(now)
    }

    fn maybe_retarget(&mut self, now: Instant) -> Option<Difficulty> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.config.retarget_interval
            || self.shares_since_change < self.config.retarget_min_shares
        {
            return None;
        }

        let current = self.current_diff.as_f64();
        let ideal = current * self.shares_since_change as f64 * self.config.target_share_time.as_secs_f64()
            / elapsed.as_secs_f64();

        let step_min = current * self.config.max_step_down;
        let step_max = current * self.config.max_step_up;
        let clamped = ideal.clamp(step_min, step_max);

        let new_diff = Difficulty::from(clamped).clamp(self.config.min_difficulty, self.config.max_difficulty);

        let relative_change = ((new_diff.as_f64() - current) / current).abs();

        self.window_start = now;
        self.shares_since_change = 0;

        if relative_change <= self.config.hysteresis || new_diff == self.current_diff {
            return None;
        }

        self.old_diff = self.current_diff;
        self.current_diff = new_diff;
        Some(new_diff)
    }
}
