// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Reconnection scheduling for the task progress channel.
//!
//! The scheduler owns the linear backoff policy and at most one pending timer. A timer is
//! a spawned task that sleeps for the backoff delay and then posts
//! [`ChannelEvent::ReconnectDue`] to the controller. Cancelling aborts the task; an expiry
//! that was already queued is recognized as stale because its [`TimerId`] no longer
//! matches the pending one.

use std::time::Duration;

use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle};

use super::types::{ChannelEvent, TimerId};
use crate::backoff::LinearBackoff;

/// Outcome of asking the scheduler for another attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// A timer was started for the given attempt.
    Scheduled {
        timer: TimerId,
        attempt: u32,
        delay: Duration,
    },
    /// The attempt ceiling was exceeded; nothing was scheduled.
    Exhausted { attempts: u32 },
}

#[derive(Debug)]
struct PendingReconnect {
    timer: TimerId,
    attempt: u32,
    delay: Duration,
    epoch: u64,
    task: JoinHandle<()>,
}

/// Owns the reconnection counter and the single outstanding retry timer.
#[derive(Debug)]
pub struct ReconnectScheduler {
    backoff: LinearBackoff,
    pending: Option<PendingReconnect>,
    next_timer_id: u64,
}

impl ReconnectScheduler {
    #[must_use]
    pub const fn new(backoff: LinearBackoff) -> Self {
        Self {
            backoff,
            pending: None,
            next_timer_id: 1,
        }
    }

    /// Counts one abnormal closure and, unless the ceiling is exceeded, starts a timer
    /// that posts [`ChannelEvent::ReconnectDue`] to `events_tx` after the backoff delay.
    ///
    /// Any previously pending timer is cancelled first. `epoch` is stored with the timer
    /// and returned by [`Self::take_due`].
    pub fn schedule(
        &mut self,
        events_tx: &UnboundedSender<ChannelEvent>,
        epoch: u64,
    ) -> ReconnectDecision {
        self.cancel();

        let Some(delay) = self.backoff.next_duration() else {
            return ReconnectDecision::Exhausted {
                attempts: self.backoff.max_attempts(),
            };
        };

        let timer = TimerId(self.next_timer_id);
        self.next_timer_id += 1;

        let tx = events_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(ChannelEvent::ReconnectDue(timer)).is_err() {
                tracing::debug!("Controller stopped before {timer} elapsed");
            }
        });

        let attempt = self.backoff.attempt();
        self.pending = Some(PendingReconnect {
            timer,
            attempt,
            delay,
            epoch,
            task,
        });

        ReconnectDecision::Scheduled {
            timer,
            attempt,
            delay,
        }
    }

    /// Cancels the pending timer, if any. Returns true if one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.task.abort();
                tracing::debug!("Cancelled {}", pending.timer);
                true
            }
            None => false,
        }
    }

    /// Consumes the pending timer if `timer` identifies it.
    ///
    /// Returns the epoch the timer was scheduled in, or `None` for a stale expiry.
    pub fn take_due(&mut self, timer: TimerId) -> Option<u64> {
        if self.pending.as_ref().is_some_and(|p| p.timer == timer) {
            self.pending.take().map(|p| p.epoch)
        } else {
            None
        }
    }

    /// Resets the attempt counter to zero.
    pub const fn reset(&mut self) {
        self.backoff.reset();
    }

    /// Returns the number of attempts counted since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.backoff.max_attempts()
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns the attempt number and delay of the pending timer.
    #[must_use]
    pub fn pending(&self) -> Option<(u32, Duration)> {
        self.pending.as_ref().map(|p| (p.attempt, p.delay))
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
