//! Refresh policy for expired signaling sessions
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use tracing::warn;

/// How many times an expired signaling session is refreshed before the
/// invite is treated as failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Maximum number of refresh-and-reinvite rounds
    pub max_refreshes: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self { max_refreshes: 3 }
    }
}

impl RefreshPolicy {
    pub fn new(max_refreshes: u32) -> Self {
        Self { max_refreshes }
    }

    /// Whether refresh number `attempt` (1-based) may run
    pub fn allows(&self, attempt: u32) -> bool {
        if attempt > self.max_refreshes {
            warn!(
                attempt = attempt,
                max_refreshes = self.max_refreshes,
                "Signaling refresh limit reached"
            );
            return false;
        }
        true
    }
}
