//! Stage scheduler: turns a load profile into a concurrency function.
//!
//! Within a stage spanning `[t_i, t_i + d_i)` concurrency interpolates
//! linearly from the previous stage's target (0 for the first stage) to the
//! stage's own target. Zero-duration stages jump immediately. Past the end of
//! the profile concurrency drops to 0, unless the scheduler holds the last
//! target.

use std::time::Duration;

/// One segment of a load profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// How long the stage lasts; zero means an instantaneous step.
    pub duration: Duration,
    /// Concurrency reached at the end of the stage.
    pub target: u32,
    /// Optional phase name for the stage.
    pub name: Option<String>,
}

impl Stage {
    /// Creates an unnamed stage.
    #[must_use]
    pub fn new(duration: Duration, target: u32) -> Self {
        Self {
            duration,
            target,
            name: None,
        }
    }

    /// Names the stage.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Named time window covered by one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseBoundary {
    /// Stage name, or `stage_<index>` when unnamed.
    pub name: String,
    /// Stage start offset.
    pub start: Duration,
    /// Stage end offset (exclusive).
    pub end: Duration,
}

/// Read-only concurrency schedule for one run.
#[derive(Debug, Clone)]
pub struct StageScheduler {
    stages: Vec<Stage>,
    total: Duration,
    hold: bool,
}

impl StageScheduler {
    /// Builds a scheduler over an ordered profile.
    ///
    /// With `hold`, the last stage's target is kept after the profile ends.
    /// Stage offsets saturate at [`Duration::MAX`].
    #[must_use]
    pub fn new(stages: Vec<Stage>, hold: bool) -> Self {
        let total = stages
            .iter()
            .fold(Duration::ZERO, |total, s| total.saturating_add(s.duration));
        Self {
            stages,
            total,
            hold,
        }
    }

    /// Stages in profile order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Sum of all stage durations.
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// Whether the last target is held after the profile ends.
    #[must_use]
    pub fn holds(&self) -> bool {
        self.hold
    }

    /// Target concurrency at `elapsed` since run start.
    #[must_use]
    pub fn concurrency_at(&self, elapsed: Duration) -> u32 {
        let mut from = 0u32;
        let mut start = Duration::ZERO;

        for stage in &self.stages {
            let end = start.saturating_add(stage.duration);
            if elapsed < end {
                // Non-empty stage containing `elapsed`.
                let progress =
                    (elapsed - start).as_secs_f64() / stage.duration.as_secs_f64();
                let delta = (f64::from(stage.target) - f64::from(from)) * progress;
                return (f64::from(from) + delta).round() as u32;
            }
            from = stage.target;
            start = end;
        }

        if elapsed == self.total || self.hold {
            from
        } else {
            0
        }
    }

    /// Index of the stage that is active at `elapsed`.
    ///
    /// The exact end of the profile still belongs to the last stage; past it
    /// the result is `None` unless the scheduler holds.
    #[must_use]
    pub fn stage_index_at(&self, elapsed: Duration) -> Option<usize> {
        let mut start = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            let end = start.saturating_add(stage.duration);
            if elapsed < end {
                return Some(index);
            }
            start = end;
        }

        if elapsed == self.total || self.hold {
            self.stages.len().checked_sub(1)
        } else {
            None
        }
    }

    /// Whether the schedule has run out (never true when holding).
    #[must_use]
    pub fn is_complete(&self, elapsed: Duration) -> bool {
        !self.hold && elapsed > self.total
    }

    /// Time windows of every stage, named for phase tagging.
    #[must_use]
    pub fn phase_boundaries(&self) -> Vec<PhaseBoundary> {
        let mut start = Duration::ZERO;
        self.stages
            .iter()
            .enumerate()
            .map(|(index, stage)| {
                let end = start.saturating_add(stage.duration);
                let boundary = PhaseBoundary {
                    name: stage
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("stage_{index}")),
                    start,
                    end,
                };
                start = end;
                boundary
            })
            .collect()
    }
}
