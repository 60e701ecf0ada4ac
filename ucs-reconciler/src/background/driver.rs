// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Owns the tokio tasks that run background tasks

use super::status::ActivationReason;
use super::status::CurrentStatus;
use super::status::CurrentStatusRunning;
use super::status::LastResult;
use super::status::LastResultCompleted;
use super::status::TaskStatus;
use super::BackgroundTask;
use super::TaskHandle;
use chrono::Utc;
use slog::debug;
use slog::o;
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Runs registered background tasks and reports on them
///
/// Dropping the Driver aborts every task it started.
#[derive(Default)]
pub struct Driver {
    tasks: BTreeMap<TaskHandle, Registered>,
}

struct Registered {
    description: String,
    period: Duration,
    status: watch::Receiver<TaskStatus>,
    wakeup: Arc<Notify>,
    runner: JoinHandle<()>,
}

impl Driver {
    pub fn new() -> Driver {
        Driver::default()
    }

    /// Start running `imp` under the name `name`
    ///
    /// The first activation happens immediately.  After that the task runs
    /// every `period` and whenever [`Driver::activate()`] is called for it.
    ///
    /// Panics if a task called `name` is already registered.
    pub fn register(
        &mut self,
        name: String,
        description: String,
        period: Duration,
        imp: Box<dyn BackgroundTask>,
        log: &Logger,
    ) -> TaskHandle {
        let handle = TaskHandle(name);
        if self.tasks.contains_key(&handle) {
            panic!("background task {:?} registered twice", handle.name());
        }

        let (status_tx, status) = watch::channel(TaskStatus {
            current: CurrentStatus::Idle,
            last: LastResult::NeverCompleted,
        });
        let wakeup = Arc::new(Notify::new());
        let runner = Runner {
            log: log.new(o!("background_task" => handle.name().to_string())),
            imp,
            status_tx,
            iteration: 0,
        };
        let runner = tokio::spawn(runner.run(period, wakeup.clone()));

        self.tasks.insert(
            handle.clone(),
            Registered { description, period, status, wakeup, runner },
        );
        handle
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskHandle> {
        self.tasks.keys()
    }

    fn get(&self, task: &TaskHandle) -> &Registered {
        // Handles only come from `register()`, so a miss means the handle
        // belongs to another Driver.
        match self.tasks.get(task) {
            Some(registered) => registered,
            None => panic!("no background task {:?} in this driver", task),
        }
    }

    pub fn task_description(&self, task: &TaskHandle) -> &str {
        &self.get(task).description
    }

    pub fn task_period(&self, task: &TaskHandle) -> Duration {
        self.get(task).period
    }

    /// Request an activation of `task`
    ///
    /// A request made while the task is running is remembered and serviced
    /// when the current activation finishes.
    pub fn activate(&self, task: &TaskHandle) {
        self.get(task).wakeup.notify_one();
    }

    pub fn task_status(&self, task: &TaskHandle) -> TaskStatus {
        // Holding a watch borrow blocks the runner, so hand back a copy.
        self.get(task).status.borrow().clone()
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        for registered in self.tasks.values() {
            registered.runner.abort();
        }
    }
}

/// State owned by the tokio task that activates one background task
struct Runner {
    log: Logger,
    imp: Box<dyn BackgroundTask>,
    status_tx: watch::Sender<TaskStatus>,
    iteration: u64,
}

impl Runner {
    async fn run(mut self, period: Duration, wakeup: Arc<Notify>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let reason = tokio::select! {
                _ = ticker.tick() => ActivationReason::Timeout,
                _ = wakeup.notified() => ActivationReason::Signaled,
            };
            self.activate_once(reason).await;
        }
    }

    async fn activate_once(&mut self, reason: ActivationReason) {
        self.iteration += 1;
        let iteration = self.iteration;
        let start_time = Utc::now();
        let start_instant = Instant::now();
        debug!(self.log, "activating";
            "reason" => ?reason,
            "iteration" => iteration,
        );

        self.status_tx.send_modify(|status| {
            status.current = CurrentStatus::Running(CurrentStatusRunning {
                start_time,
                start_instant,
                reason,
                iteration,
            });
        });

        let details = self.imp.activate().await;
        let elapsed = start_instant.elapsed();

        self.status_tx.send_replace(TaskStatus {
            current: CurrentStatus::Idle,
            last: LastResult::Completed(LastResultCompleted {
                iteration,
                start_time,
                reason,
                elapsed,
                details,
            }),
        });
        debug!(self.log, "activation done";
            "iteration" => iteration,
            "elapsed" => ?elapsed,
        );
    }
}
