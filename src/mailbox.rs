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

//! A mailbox is a mutex-guarded FIFO owned by exactly one endpoint and
//! drained only on that endpoint's event loop. Posting is allowed from any
//! thread. The mailbox keeps at most one drain task scheduled at a time;
//! while the owner is blocking (waiting for an async worker operation) posts
//! are accepted but no drain is scheduled until [`Mailbox::resume`].

use crate::media_loop::{ScheduledTask, TaskScheduler};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::debug;

/// Message type that can live in a [`Mailbox`]. The post-time hook lets a
/// message kind bound the queue by evicting older entries; the default keeps
/// everything.
pub trait MailboxItem: Send {
    fn coalesce_on_post(_queue: &mut VecDeque<Self>, _next: &Self)
    where
        Self: Sized,
    {
    }
}

pub type DrainTask = Arc<dyn Fn() + Send + Sync>;

pub struct Mailbox<T: MailboxItem> {
    name: &'static str,
    scheduler: Arc<dyn TaskScheduler>,
    state: Mutex<State<T>>,
}

struct State<T> {
    queue: VecDeque<T>,
    scheduled: Option<ScheduledTask>,
    blocking: bool,
    drain: Option<DrainTask>,
}

impl<T: MailboxItem + 'static> Mailbox<T> {
    pub fn new(name: &'static str, scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            name,
            scheduler,
            state: Mutex::new(State {
                queue: VecDeque::new(),
                scheduled: None,
                blocking: false,
                drain: None,
            }),
        }
    }

    /// Installs the drain task. Must be called before the first post; posts
    /// arriving without a drain task are queued but never scheduled.
    pub fn set_drain_task(&self, drain: DrainTask) {
        self.lock().drain = Some(drain);
    }

    pub fn post(&self, item: T) {
        let mut state = self.lock();
        T::coalesce_on_post(&mut state.queue, &item);
        state.queue.push_back(item);
        if !state.blocking && state.scheduled.is_none() {
            self.schedule_drain(&mut state);
        }
    }

    /// Marks the scheduled drain as started and reports whether draining may
    /// proceed. Returns false while the owner is blocking (a stale wake).
    pub fn begin_drain(&self) -> bool {
        let mut state = self.lock();
        state.scheduled = None;
        !state.blocking
    }

    pub fn pop(&self) -> Option<T> {
        self.lock().queue.pop_front()
    }

    /// Snapshots and empties the queue, clearing the scheduled flag.
    pub fn take_all(&self) -> VecDeque<T> {
        let mut state = self.lock();
        state.scheduled = None;
        std::mem::take(&mut state.queue)
    }

    /// Enters the blocking state and cancels a drain scheduled but not yet
    /// run, so nothing is processed until [`Mailbox::resume`].
    pub fn suspend(&self) {
        let mut state = self.lock();
        state.blocking = true;
        if let Some(scheduled) = state.scheduled.take() {
            scheduled.cancel();
        }
    }

    /// Leaves the blocking state; schedules a drain iff there is queued work
    /// and none is scheduled already.
    pub fn resume(&self) {
        let mut state = self.lock();
        state.blocking = false;
        if !state.queue.is_empty() && state.scheduled.is_none() {
            self.schedule_drain(&mut state);
        }
    }

    pub fn clear(&self) {
        self.lock().queue.clear();
    }

    fn schedule_drain(&self, state: &mut State<T>) {
        let Some(drain) = state.drain.clone() else {
            return;
        };
        match self.scheduler.schedule(Box::new(move || drain())) {
            Ok(guard) => state.scheduled = Some(guard),
            Err(e) => debug!("not scheduling drain of '{}' mailbox: {e}", self.name),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().expect("mailbox mutex poisoned")
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.lock().queue.len()
    }
}
