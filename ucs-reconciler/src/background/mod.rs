// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background tasks
//!
//! A background task is a piece of work that runs periodically, without
//! any request driving it.  The [`Driver`] owns every task and activates
//! each one on its period or on explicit request.  A task never runs
//! concurrently with itself.
//!
//! Each activation returns a JSON value describing what it did; the Driver
//! keeps the most recent one for debugging.

mod driver;
mod init;
mod inspection_monitor;
mod status;

pub use driver::Driver;
pub use init::init;
pub use inspection_monitor::InspectionMonitor;
pub use status::ActivationReason;
pub use status::CurrentStatus;
pub use status::CurrentStatusRunning;
pub use status::LastResult;
pub use status::LastResultCompleted;
pub use status::TaskStatus;

use futures::future::BoxFuture;

/// An operation activated both periodically and by an explicit signal
pub trait BackgroundTask: Send + Sync {
    fn activate<'a>(&'a mut self) -> BoxFuture<'a, serde_json::Value>;
}

/// Identifies a task registered with a [`Driver`]
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.0
    }
}
