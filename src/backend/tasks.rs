/**
 * Supervised Background Tasks
 *
 * Periodic sweeps and the relay listener run as tokio tasks owned by the
 * component that started them. Each sweep iteration runs in its own task so an
 * error or a panic inside one iteration is logged and the loop keeps going.
 * Stopping aborts the loops; dropping the owner aborts them too.
 */

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::error::CollabResult;

/// Spawn a loop that runs `tick` every `period`, isolating each iteration
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = CollabResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            match tokio::spawn(tick()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("[{}] Sweep iteration failed: {}", name, e);
                }
                Err(e) if e.is_panic() => {
                    tracing::error!("[{}] Sweep iteration panicked: {:?}", name, e);
                }
                Err(_) => {
                    tracing::debug!("[{}] Sweep iteration cancelled, stopping loop", name);
                    break;
                }
            }
        }
    })
}

/// Handles of the tasks a component has started
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        let handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.iter().any(|(_, handle)| !handle.is_finished())
    }

    /// Start tasks unless already running; returns false when nothing was started
    pub fn start_with<F>(&self, spawn: F) -> bool
    where
        F: FnOnce() -> Vec<(&'static str, JoinHandle<()>)>,
    {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if handles.iter().any(|(_, handle)| !handle.is_finished()) {
            return false;
        }
        handles.clear();
        handles.extend(spawn());
        true
    }

    /// Abort every task; returns how many were still running
    pub fn stop(&self) -> usize {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        let mut stopped = 0;
        for (name, handle) in handles.drain(..) {
            if !handle.is_finished() {
                stopped += 1;
                tracing::debug!("[Tasks] Stopping {}", name);
            }
            handle.abort();
        }
        stopped
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        let handles = self.handles.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in handles.drain(..) {
            handle.abort();
        }
    }
}
