// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime status of background tasks

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use std::time::Instant;

/// What woke a background task up
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationReason {
    Signaled,
    Timeout,
}

/// What a background task is doing now and how its last run went
#[derive(Clone, Debug, Serialize)]
pub struct TaskStatus {
    pub current: CurrentStatus,
    pub last: LastResult,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "current_status", content = "details")]
pub enum CurrentStatus {
    Idle,
    Running(CurrentStatusRunning),
}

impl CurrentStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, CurrentStatus::Idle)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CurrentStatusRunning {
    pub start_time: DateTime<Utc>,
    /// Used only to compute the elapsed time.
    #[serde(skip)]
    pub start_instant: Instant,
    pub reason: ActivationReason,
    pub iteration: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "last_result", content = "details")]
pub enum LastResult {
    NeverCompleted,
    Completed(LastResultCompleted),
}

impl LastResult {
    pub fn has_completed(&self) -> bool {
        matches!(self, LastResult::Completed(_))
    }

    pub fn completion(&self) -> Option<&LastResultCompleted> {
        match self {
            LastResult::Completed(r) => Some(r),
            LastResult::NeverCompleted => None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct LastResultCompleted {
    pub iteration: u64,
    pub start_time: DateTime<Utc>,
    pub reason: ActivationReason,
    pub elapsed: Duration,
    /// Whatever the task returned from `activate()`
    pub details: serde_json::Value,
}
