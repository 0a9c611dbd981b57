// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bridge from directory push notifications to the refresh path
//!
//! Notification payloads are never applied directly: every kind triggers the
//! same re-fetch-and-diff as the poll scheduler.

use std::future::Future;

use roomlink_core::SessionError;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::services::LobbyNotification;

/// Owns the task draining one push subscription
pub struct PushBridge {
    task: JoinHandle<()>,
}

impl PushBridge {
    /// Spawn a task calling `refresh` once per received notification
    pub fn spawn<F, Fut>(mut notifications: broadcast::Receiver<LobbyNotification>, refresh: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool, SessionError>> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(notification) => {
                        tracing::debug!(?notification, "Lobby notification received");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // A refresh covers whatever was missed
                        tracing::debug!(skipped, "Lobby notifications lagged");
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("Lobby notification stream closed");
                        break;
                    }
                }

                if let Err(e) = refresh().await {
                    tracing::warn!(error = %e, "Push-triggered refresh failed");
                }
            }
        });

        Self { task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop draining and drop the subscription
    pub fn dispose(self) {
        self.task.abort();
    }
}

impl Drop for PushBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}
