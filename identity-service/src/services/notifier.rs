//! In-process fan-out of authentication state changes.
//!
//! Subscribers see only changes published after they subscribe. Waiting is
//! always bounded by a timeout.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::models::AppId;

pub const DEFAULT_NOTIFIER_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthChange {
    /// A user completed sign-on at an application.
    SignedIn {
        user_id: String,
        app: AppId,
        exchange_id: String,
    },
    TokensRevoked {
        user_id: String,
    },
    SessionRevoked {
        user_id: String,
        session_id: String,
    },
}

impl AuthChange {
    pub fn user_id(&self) -> &str {
        match self {
            AuthChange::SignedIn { user_id, .. }
            | AuthChange::TokensRevoked { user_id }
            | AuthChange::SessionRevoked { user_id, .. } => user_id,
        }
    }
}

#[derive(Clone)]
pub struct AuthNotifier {
    sender: broadcast::Sender<AuthChange>,
}

impl Default for AuthNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFIER_CAPACITY)
    }
}

impl AuthNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns how many subscribers received the change.
    pub fn publish(&self, change: AuthChange) -> usize {
        self.sender.send(change).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.sender.subscribe()
    }

    /// Wait for the next change for `user_id` matching `predicate`, giving up
    /// after `timeout`.
    pub async fn wait_for<F>(
        &self,
        user_id: &str,
        predicate: F,
        timeout: Duration,
    ) -> Option<AuthChange>
    where
        F: Fn(&AuthChange) -> bool,
    {
        let mut receiver = self.subscribe();
        let wait = async {
            loop {
                match receiver.recv().await {
                    Ok(change) if change.user_id() == user_id && predicate(&change) => {
                        return Some(change);
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Auth change subscriber lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let notifier = AuthNotifier::default();
        assert_eq!(
            notifier.publish(AuthChange::TokensRevoked {
                user_id: "u".into()
            }),
            0
        );
    }

    #[tokio::test]
    async fn wait_for_filters_by_user_and_predicate() {
        let notifier = AuthNotifier::default();
        let waiter = {
            let notifier = notifier.clone();
            tokio::spawn(async move {
                notifier
                    .wait_for(
                        "user-1",
                        |c| matches!(c, AuthChange::SignedIn { .. }),
                        Duration::from_secs(2),
                    )
                    .await
            })
        };

        // Give the waiter a chance to subscribe
        while notifier.sender.receiver_count() == 0 {
            tokio::task::yield_now().await;
        }

        notifier.publish(AuthChange::TokensRevoked {
            user_id: "user-1".into(),
        });
        notifier.publish(AuthChange::SignedIn {
            user_id: "user-2".into(),
            app: AppId::Hub,
            exchange_id: "x".into(),
        });
        notifier.publish(AuthChange::SignedIn {
            user_id: "user-1".into(),
            app: AppId::JustSplit,
            exchange_id: "y".into(),
        });

        let change = waiter.await.unwrap().unwrap();
        assert_eq!(
            change,
            AuthChange::SignedIn {
                user_id: "user-1".into(),
                app: AppId::JustSplit,
                exchange_id: "y".into(),
            }
        );
    }

    #[tokio::test]
    async fn wait_for_times_out() {
        let notifier = AuthNotifier::default();
        let result = notifier
            .wait_for("user-1", |_| true, Duration::from_millis(20))
            .await;
        assert!(result.is_none());
    }
}
