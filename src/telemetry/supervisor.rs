// Copyright 2026 ThermoLink Team
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

//! Bounded-retry restart supervision for the ingestion server.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::server::ServerLifecycleState;

/// Restart policy: fixed delay between attempts, hard attempt ceiling.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

/// Attempt bookkeeping shared between the supervisor and the server.
///
/// The server resets it on every manual `start()`; the supervisor bumps it
/// per automatic attempt and latches `exhausted` once the ceiling is hit.
#[derive(Debug, Default)]
pub struct SupervisionState {
    attempts: AtomicU32,
    exhausted: AtomicBool,
}

impl SupervisionState {
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }

    /// Clear all bookkeeping. Called on manual starts.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        self.exhausted.store(false, Ordering::SeqCst);
    }

    fn clear_attempts(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    fn bump(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn mark_exhausted(&self) {
        self.exhausted.store(true, Ordering::SeqCst);
    }
}

/// Something the supervisor can restart.
#[async_trait]
pub trait RestartTarget: Send + Sync {
    /// Re-invoke startup with the last-known parameters; true on success.
    async fn restart(&self) -> bool;
}

/// Watches the server lifecycle and drives bounded restart attempts.
pub struct ReconnectSupervisor;

impl ReconnectSupervisor {
    /// Spawn the supervision task. It runs until the lifecycle channel
    /// closes (i.e. the server is dropped).
    pub fn spawn<T>(
        target: Arc<T>,
        state: Arc<SupervisionState>,
        mut lifecycle: watch::Receiver<ServerLifecycleState>,
        policy: RestartPolicy,
    ) -> JoinHandle<()>
    where
        T: RestartTarget + 'static,
    {
        tokio::spawn(async move {
            loop {
                if lifecycle.changed().await.is_err() {
                    break;
                }
                let current = lifecycle.borrow_and_update().clone();

                let reason = match current {
                    ServerLifecycleState::Error(reason) => reason,
                    // HotspotInactive and manual stops are not supervised;
                    // they need operator action, not retries.
                    _ => continue,
                };

                if state.is_exhausted() {
                    continue;
                }
                if state.attempts() >= policy.max_attempts {
                    state.mark_exhausted();
                    error!(
                        attempts = policy.max_attempts,
                        "server failed repeatedly ({}), giving up until manually restarted",
                        reason
                    );
                    continue;
                }

                tokio::time::sleep(policy.delay).await;
                let attempt = state.bump();
                info!(attempt, max = policy.max_attempts, "restarting ingestion server");

                if target.restart().await {
                    info!("supervised restart succeeded");
                    state.clear_attempts();
                } else {
                    warn!(attempt, "supervised restart failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FailingTarget {
        calls: AtomicU32,
        lifecycle_tx: watch::Sender<ServerLifecycleState>,
    }

    #[async_trait]
    impl RestartTarget for FailingTarget {
        async fn restart(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Failed restarts re-enter the Error state, like the real server.
            self.lifecycle_tx
                .send_replace(ServerLifecycleState::Error("bind failed".into()));
            false
        }
    }

    struct RecoveringTarget {
        calls: AtomicU32,
        succeed_after: u32,
        lifecycle_tx: watch::Sender<ServerLifecycleState>,
    }

    #[async_trait]
    impl RestartTarget for RecoveringTarget {
        async fn restart(&self) -> bool {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_after {
                self.lifecycle_tx.send_replace(ServerLifecycleState::Running);
                true
            } else {
                self.lifecycle_tx
                    .send_replace(ServerLifecycleState::Error("bind failed".into()));
                false
            }
        }
    }

    fn policy() -> RestartPolicy {
        RestartPolicy {
            delay: Duration::from_secs(5),
            max_attempts: 5,
        }
    }

    async fn settle() {
        // Let the supervisor task observe pending watch updates and run
        // through its (paused-time) sleeps.
        for _ in 0..64 {
            tokio::time::sleep(Duration::from_secs(6)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let (lifecycle_tx, lifecycle_rx) = watch::channel(ServerLifecycleState::Running);
        let target = Arc::new(FailingTarget {
            calls: AtomicU32::new(0),
            lifecycle_tx: lifecycle_tx.clone(),
        });
        let state = Arc::new(SupervisionState::default());

        let _task =
            ReconnectSupervisor::spawn(target.clone(), state.clone(), lifecycle_rx, policy());

        lifecycle_tx.send_replace(ServerLifecycleState::Error("listener died".into()));
        settle().await;

        assert_eq!(target.calls.load(Ordering::SeqCst), 5);
        assert!(state.is_exhausted());

        // Further errors are ignored once exhausted.
        lifecycle_tx.send_replace(ServerLifecycleState::Error("still dead".into()));
        settle().await;
        assert_eq!(target.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reset_reenables_supervision() {
        let (lifecycle_tx, lifecycle_rx) = watch::channel(ServerLifecycleState::Running);
        let target = Arc::new(FailingTarget {
            calls: AtomicU32::new(0),
            lifecycle_tx: lifecycle_tx.clone(),
        });
        let state = Arc::new(SupervisionState::default());

        let _task =
            ReconnectSupervisor::spawn(target.clone(), state.clone(), lifecycle_rx, policy());

        lifecycle_tx.send_replace(ServerLifecycleState::Error("listener died".into()));
        settle().await;
        assert_eq!(target.calls.load(Ordering::SeqCst), 5);

        // A manual start() resets the bookkeeping and the cycle can repeat.
        state.reset();
        lifecycle_tx.send_replace(ServerLifecycleState::Error("died again".into()));
        settle().await;
        assert_eq!(target.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_attempt_counter() {
        let (lifecycle_tx, lifecycle_rx) = watch::channel(ServerLifecycleState::Running);
        let target = Arc::new(RecoveringTarget {
            calls: AtomicU32::new(0),
            succeed_after: 3,
            lifecycle_tx: lifecycle_tx.clone(),
        });
        let state = Arc::new(SupervisionState::default());

        let _task =
            ReconnectSupervisor::spawn(target.clone(), state.clone(), lifecycle_rx, policy());

        lifecycle_tx.send_replace(ServerLifecycleState::Error("listener died".into()));
        settle().await;

        assert_eq!(target.calls.load(Ordering::SeqCst), 3);
        assert_eq!(state.attempts(), 0);
        assert!(!state.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hotspot_inactive_is_not_retried() {
        let (lifecycle_tx, lifecycle_rx) = watch::channel(ServerLifecycleState::Running);
        let target = Arc::new(FailingTarget {
            calls: AtomicU32::new(0),
            lifecycle_tx: lifecycle_tx.clone(),
        });
        let state = Arc::new(SupervisionState::default());

        let _task =
            ReconnectSupervisor::spawn(target.clone(), state.clone(), lifecycle_rx, policy());

        lifecycle_tx.send_replace(ServerLifecycleState::HotspotInactive);
        settle().await;

        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
    }
}
