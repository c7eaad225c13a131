//! Bus subscription loops.

use std::fmt::Display;
use std::sync::Arc;

use async_nats::{Client, ConnectOptions, Message};
use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::BusError;
use crate::callout::CalloutHandler;
use crate::magic_link::MagicLinkHandler;
use crate::subjects::{
    AUTH_CALLOUT_SUBJECT, MAGIC_LINK_QUEUE_GROUP, MAGIC_LINK_REQUEST_SUBJECT,
    MAGIC_LINK_RESPONSE_SUBJECT,
};

/// How to reach the bus.
#[derive(Clone, Debug)]
pub struct BusConnectConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Connect as the service's own bus user.
pub async fn connect(config: &BusConnectConfig) -> Result<Client, BusError> {
    let mut options = ConnectOptions::new().name("clubpass");
    if let (Some(user), Some(password)) = (&config.user, &config.password) {
        options = options.user_and_password(user.clone(), password.clone());
    }
    let client = options.connect(config.url.as_str()).await?;
    info!(url = %config.url, "connected to bus");
    Ok(client)
}

/// Serves callouts and magic-link requests until cancelled.
pub struct BusServer {
    client: Client,
    callout: Arc<CalloutHandler>,
    magic_links: Arc<MagicLinkHandler>,
    tasks: TaskTracker,
}

impl BusServer {
    pub fn new(client: Client, callout: CalloutHandler, magic_links: MagicLinkHandler) -> Self {
        Self {
            client,
            callout: Arc::new(callout),
            magic_links: Arc::new(magic_links),
            tasks: TaskTracker::new(),
        }
    }

    /// Run both subscriptions. Each message is handled on its own task.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), BusError> {
        let mut callouts = self.client.subscribe(AUTH_CALLOUT_SUBJECT).await?;
        let mut requests = self
            .client
            .queue_subscribe(MAGIC_LINK_REQUEST_SUBJECT, MAGIC_LINK_QUEUE_GROUP.into())
            .await?;
        info!(
            callout = AUTH_CALLOUT_SUBJECT,
            magic_link = MAGIC_LINK_REQUEST_SUBJECT,
            "bus handlers subscribed"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(message) = callouts.next() => self.spawn_callout(message),
                Some(message) = requests.next() => self.spawn_magic_link(message),
                else => {
                    warn!("bus subscriptions closed");
                    break;
                }
            }
        }

        drain(&self.tasks, self.client.flush()).await;
        info!("bus handlers stopped");
        Ok(())
    }

    fn spawn_callout(&self, message: Message) {
        let Some(reply) = message.reply else {
            warn!("authorization callout without reply subject");
            return;
        };
        let client = self.client.clone();
        let handler = self.callout.clone();
        self.tasks.spawn(async move {
            let response = handler.handle(&message.payload);
            if let Err(e) = client.publish(reply, Bytes::from(response)).await {
                error!(error = %e, "publishing authorization response failed");
            }
        });
    }

    fn spawn_magic_link(&self, message: Message) {
        let client = self.client.clone();
        let handler = self.magic_links.clone();
        self.tasks.spawn(async move {
            let response = handler.handle(&message.payload).await;
            let published = match serde_json::to_vec(&response) {
                Ok(body) => client
                    .publish(MAGIC_LINK_RESPONSE_SUBJECT, Bytes::from(body))
                    .await
                    .map_err(BusError::from),
                Err(e) => Err(BusError::from(e)),
            };
            if let Err(e) = published {
                error!(
                    correlation_id = %response.correlation_id,
                    error = %e,
                    "publishing magic-link response failed"
                );
            }
        });
    }
}

/// Wait for in-flight handlers to publish, then flush what they buffered.
async fn drain<E: Display>(tasks: &TaskTracker, flush: impl Future<Output = Result<(), E>>) {
    tasks.close();
    if !tasks.is_empty() {
        debug!(in_flight = tasks.len(), "waiting for bus handlers");
    }
    tasks.wait().await;
    if let Err(e) = flush.await {
        debug!(error = %e, "bus flush failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn drain_flushes_after_handlers_finish() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let tasks = TaskTracker::new();
        for id in 0..3u64 {
            let events = events.clone();
            tasks.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10 * (id + 1))).await;
                events.lock().unwrap().push("published");
            });
        }

        let flushed = events.clone();
        drain(&tasks, async move {
            flushed.lock().unwrap().push("flushed");
            Ok::<(), std::io::Error>(())
        })
        .await;

        assert!(tasks.is_closed());
        assert_eq!(
            *events.lock().unwrap(),
            vec!["published", "published", "published", "flushed"]
        );
    }

    #[tokio::test]
    async fn drain_with_nothing_in_flight_still_flushes() {
        let tasks = TaskTracker::new();
        let mut flushed = false;
        drain(&tasks, async {
            flushed = true;
            Err::<(), _>("connection closed")
        })
        .await;
        assert!(flushed);
    }
}
