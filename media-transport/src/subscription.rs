//! Cancellable registrations
//!
//! A [`Subscription`] undoes one registration (a packet handler, a spawned
//! watcher task, a timer) when it is cancelled or dropped. A
//! [`SubscriptionSet`] collects the registrations owned by one session so
//! they can be released together, exactly once.
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


use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Handle to a single registration
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap an arbitrary release action
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Subscription that aborts a spawned task when released
    pub fn from_task<T: Send + 'static>(handle: JoinHandle<T>) -> Self {
        Subscription::new(move || handle.abort())
    }

    /// Release the registration now
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Session-scoped collection of subscriptions
#[derive(Default)]
pub struct SubscriptionSet {
    state: Mutex<SetState>,
}

#[derive(Default)]
struct SetState {
    released: bool,
    entries: Vec<Subscription>,
}

impl SubscriptionSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a subscription.
    ///
    /// Once the set has been released, new subscriptions are released on
    /// the spot.
    pub fn add(&self, subscription: Subscription) {
        let mut state = self.state.lock();
        if state.released {
            drop(state);
            subscription.unsubscribe();
            return;
        }
        state.entries.push(subscription);
    }

    /// Release every tracked subscription. Returns false if the set was
    /// already released.
    pub fn release_all(&self) -> bool {
        let entries = {
            let mut state = self.state.lock();
            if state.released {
                return false;
            }
            state.released = true;
            std::mem::take(&mut state.entries)
        };

        // Release outside the lock; a release action may touch the set.
        for subscription in entries {
            subscription.unsubscribe();
        }
        true
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether no subscriptions are tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`release_all`](Self::release_all) has run
    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }
}
