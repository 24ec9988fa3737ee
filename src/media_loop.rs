/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Host event loop plumbing. The bridge only ever asks a loop for one thing:
//! run this task on your thread, after everything scheduled before it. That
//! capability is the [`TaskScheduler`] trait; [`MediaLoop`] is the built-in
//! implementation backed by a dedicated OS thread running a current-thread
//! tokio runtime.

use crate::{
    error::{BridgeError, BridgeResult},
    utils::{panic_to_string, set_realtime_priority},
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};
use tokio::{
    runtime,
    sync::{mpsc, oneshot},
};
use tracing::{info, warn};

pub type Task = Box<dyn FnOnce() + Send>;

/// Capability to run tasks on an event loop's thread, in FIFO order.
///
/// Implementations must deliver tasks in the order they were scheduled and
/// run them one at a time. A task cancelled through its [`ScheduledTask`]
/// handle before it has run is skipped.
pub trait TaskScheduler: Send + Sync {
    fn schedule(&self, task: Task) -> BridgeResult<ScheduledTask>;
}

/// Handle to a scheduled task. Dropping it does not cancel the task.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledTask {
    pub(crate) fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

enum LoopCommand {
    Run { guard: ScheduledTask, task: Task },
    Shutdown,
}

/// A dedicated event loop thread hosting a current-thread tokio runtime.
///
/// Tasks scheduled through the loop's [`MediaLoopHandle`] run on that thread
/// in FIFO order. Code running inside a task may additionally use
/// `tokio::spawn` and the tokio timer, which is how workers defer their
/// callbacks instead of invoking them from inside a bridge call.
pub struct MediaLoop {
    handle: MediaLoopHandle,
    thread: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct MediaLoopHandle {
    tx: mpsc::UnboundedSender<LoopCommand>,
}

impl MediaLoop {
    pub fn start(name: &str) -> BridgeResult<Self> {
        Self::spawn(name, false)
    }

    /// Like [`MediaLoop::start`] but asks the OS for real-time scheduling
    /// priority on the loop thread. Failure to get it is logged, not fatal.
    pub fn start_realtime(name: &str) -> BridgeResult<Self> {
        Self::spawn(name, true)
    }

    fn spawn(name: &str, realtime: bool) -> BridgeResult<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_name = name.to_owned();
        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                if realtime {
                    set_realtime_priority();
                }
                let runtime = match runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(it) => it,
                    Err(e) => {
                        ready_tx.send(Err(BridgeError::from(e))).ok();
                        return;
                    }
                };
                ready_tx.send(Ok(())).ok();
                runtime.block_on(async move {
                    while let Some(command) = rx.recv().await {
                        match command {
                            LoopCommand::Run { guard, task } => {
                                if !guard.is_cancelled() {
                                    task();
                                }
                            }
                            LoopCommand::Shutdown => break,
                        }
                    }
                });
                info!("Event loop '{thread_name}' stopped.");
            })?;
        ready_rx.blocking_recv()??;

        Ok(MediaLoop {
            handle: MediaLoopHandle { tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> MediaLoopHandle {
        self.handle.clone()
    }

    /// Stops the dispatcher and joins the loop thread. Tasks scheduled before
    /// the shutdown still run; tasks scheduled after it fail.
    pub fn shutdown(mut self) {
        self.shutdown_impl();
    }

    fn shutdown_impl(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.handle.tx.send(LoopCommand::Shutdown).ok();
        if let Err(panic) = thread.join() {
            warn!("event loop thread panicked: {}", panic_to_string(panic));
        }
    }
}

impl Drop for MediaLoop {
    fn drop(&mut self) {
        self.shutdown_impl();
    }
}

impl TaskScheduler for MediaLoopHandle {
    fn schedule(&self, task: Task) -> BridgeResult<ScheduledTask> {
        let guard = ScheduledTask::new();
        self.tx
            .send(LoopCommand::Run {
                guard: guard.clone(),
                task,
            })
            .map_err(|_| BridgeError::MediaLoopUnavailable)?;
        Ok(guard)
    }
}
