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

//! Provides a linear backoff policy with an attempt ceiling.
//!
//! It is used for deciding reconnection delays in the task progress channel. The delay
//! for attempt `n` (starting at 1) is `delay_base * n`. Once more than `max_attempts`
//! consecutive attempts have been requested the policy is exhausted and returns `None`
//! until it is reset, which happens whenever a connection is successfully opened.

use std::time::Duration;

/// A linear backoff mechanism bounded by a maximum number of attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinearBackoff {
    /// The delay unit multiplied by the attempt number.
    delay_base: Duration,
    /// The maximum number of attempts before the policy is exhausted.
    max_attempts: u32,
    /// The number of attempts requested since the last reset.
    attempt: u32,
}

impl LinearBackoff {
    /// Creates a new [`LinearBackoff`] instance.
    #[must_use]
    pub const fn new(delay_base: Duration, max_attempts: u32) -> Self {
        Self {
            delay_base,
            max_attempts,
            attempt: 0,
        }
    }

    /// Advances the attempt counter and returns the delay for the new attempt.
    ///
    /// Returns `None` once the counter exceeds `max_attempts`. The counter saturates at
    /// `max_attempts + 1` so repeated calls on an exhausted policy stay exhausted.
    pub fn next_duration(&mut self) -> Option<Duration> {
        if self.attempt <= self.max_attempts {
            self.attempt = self.attempt.saturating_add(1);
        }

        if self.is_exhausted() {
            return None;
        }

        Some(self.delay_for(self.attempt))
    }

    /// Returns the delay for the given attempt number without changing any state.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_base.saturating_mul(attempt)
    }

    /// Reset the attempt counter to zero.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Returns the number of attempts requested since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the configured attempt ceiling.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the configured delay unit.
    #[must_use]
    pub const fn delay_base(&self) -> Duration {
        self.delay_base
    }

    /// Returns true once more attempts were requested than the ceiling allows.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempt > self.max_attempts
    }
}
