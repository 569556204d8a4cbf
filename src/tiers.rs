// SPDX-License-Identifier: MIT
//! Execution tier classification.
//!
//! `classify` is a pure, total function of `(confidence, thresholds,
//! daily_autonomous_count)` — every confidence in [0, 1] lands in exactly one
//! band because each band is closed on its lower bound. Band ordering is
//! validated at threshold write time, never here.

use crate::thresholds::ThresholdConfig;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::debug;

// ─── Tier ─────────────────────────────────────────────────────────────────────

/// How much human involvement an action requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// Execute unattended.
    Autonomous,
    /// Execute only once a human approver is recorded.
    Assisted,
    /// Surface the candidate; never execute.
    ReportOnly,
    /// Too low to act on at all; information only.
    Blocked,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Autonomous => "autonomous",
            Tier::Assisted => "assisted",
            Tier::ReportOnly => "report-only",
            Tier::Blocked => "blocked",
        }
    }

    pub fn is_actionable(&self) -> bool {
        matches!(self, Tier::Autonomous | Tier::Assisted)
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "autonomous" => Ok(Tier::Autonomous),
            "assisted" => Ok(Tier::Assisted),
            "report-only" => Ok(Tier::ReportOnly),
            "blocked" => Ok(Tier::Blocked),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Classification ───────────────────────────────────────────────────────────

/// Map a confidence score to an execution tier.
///
/// A high-confidence candidate that hits the daily autonomous cap downgrades
/// to `Assisted` — never silently to report-only; it still gets human-speed
/// execution, just not unattended.
pub fn classify(
    confidence: f64,
    thresholds: &ThresholdConfig,
    daily_autonomous_count: u32,
) -> Tier {
    if confidence >= thresholds.auto_execute_threshold {
        if daily_autonomous_count < thresholds.max_autonomous_per_day {
            Tier::Autonomous
        } else {
            Tier::Assisted
        }
    } else if confidence >= thresholds.assisted_mode_min {
        Tier::Assisted
    } else if confidence > thresholds.report_only_max {
        Tier::ReportOnly
    } else {
        Tier::Blocked
    }
}

// ─── DailyCounter ─────────────────────────────────────────────────────────────

/// Shared counter enforcing `max_autonomous_per_day`.
///
/// Slot acquisition is a single increment-and-compare under the lock, so
/// concurrent autonomous attempts at the cap boundary resolve in arrival
/// order: the first request to reach the check wins the remaining slot. The
/// count resets when the UTC date rolls over and is seeded from the execution
/// log at engine startup.
pub struct DailyCounter {
    state: Mutex<(NaiveDate, u32)>,
}

impl DailyCounter {
    pub fn new(day: NaiveDate, count: u32) -> Self {
        Self {
            state: Mutex::new((day, count)),
        }
    }

    pub fn today() -> Self {
        Self::new(Utc::now().date_naive(), 0)
    }

    /// Autonomous executions granted so far today.
    pub fn count(&self) -> u32 {
        let mut state = self.state.lock().expect("daily counter poisoned");
        self.roll_over(&mut state);
        state.1
    }

    /// Claim one autonomous slot if the cap allows it.
    pub fn try_acquire(&self, max_per_day: u32) -> bool {
        let mut state = self.state.lock().expect("daily counter poisoned");
        self.roll_over(&mut state);
        if state.1 < max_per_day {
            state.1 += 1;
            debug!(count = state.1, max_per_day, "autonomous slot acquired");
            true
        } else {
            false
        }
    }

    fn roll_over(&self, state: &mut (NaiveDate, u32)) {
        let today = Utc::now().date_naive();
        if state.0 != today {
            *state = (today, 0);
        }
    }
}
