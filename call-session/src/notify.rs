//! One-shot notifications with late subscribers
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


use tokio::sync::watch;

/// Event that fires at most once. Listeners created after it fired
/// still observe it.
#[derive(Debug)]
pub struct OnceSignal {
    tx: watch::Sender<bool>,
}

impl Default for OnceSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl OnceSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        OnceSignal { tx }
    }

    /// Fire the event. Returns false if it had already fired.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    pub fn has_fired(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn listener(&self) -> OnceListener {
        OnceListener {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side of a [`OnceSignal`]
#[derive(Debug, Clone)]
pub struct OnceListener {
    rx: watch::Receiver<bool>,
}

impl OnceListener {
    /// Wait for the event. Returns false if the signal was dropped
    /// without firing.
    pub async fn wait(mut self) -> bool {
        self.rx.wait_for(|fired| *fired).await.is_ok()
    }

    pub fn has_fired(&self) -> bool {
        *self.rx.borrow()
    }
}
