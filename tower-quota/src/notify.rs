use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use quota_limit::TaskId;
use reqwest::Url;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::error::NotifyError;

/// The body delivered to the notification receiver for an accepted submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub task_id: TaskId,
    pub data: Value,
}

/// A single delivery attempt to a downstream receiver.
///
/// Implementations make exactly one attempt and never retry.
pub trait Notify: Send + Sync + 'static {
    fn notify(&self, notification: Notification) -> BoxFuture<'static, Result<(), NotifyError>>;
}

/// Delivers notifications as a JSON `POST` to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpNotifier {
    pub fn new(endpoint: Url) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Notify for HttpNotifier {
    fn notify(&self, notification: Notification) -> BoxFuture<'static, Result<(), NotifyError>> {
        let request = self.client.post(self.endpoint.clone()).json(&notification);
        async move {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(NotifyError::Status(status.as_u16()));
            }
            Ok(())
        }
        .boxed()
    }
}

#[derive(Clone, Debug)]
struct DispatchMetrics {
    notifications: Counter<u64>,
}

/// Fire-and-forget delivery of notifications.
///
/// Each dispatch runs on its own detached tokio task bounded by `timeout`.
/// Failures are logged and dropped: they are never retried and never reach
/// the submitter.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sink: Arc<dyn Notify>,
    timeout: Duration,
    instruments: DispatchMetrics,
}

impl fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn Notify>, timeout: Duration) -> Self {
        let meter = global::meter("quota_notifications");
        let instruments = DispatchMetrics {
            notifications: meter.u64_counter("quota_notifications").build(),
        };

        Self {
            sink,
            timeout,
            instruments,
        }
    }

    /// Starts a delivery without waiting for it.
    ///
    /// The returned handle may be dropped; the delivery carries on detached.
    pub fn dispatch(&self, notification: Notification) -> JoinHandle<()> {
        let sink = Arc::clone(&self.sink);
        let timeout = self.timeout;
        let counter = self.instruments.notifications.clone();

        tokio::spawn(async move {
            let task_id = notification.task_id;
            let result = match tokio::time::timeout(timeout, sink.notify(notification)).await {
                Ok(result) => result,
                Err(_) => Err(NotifyError::Timeout(timeout)),
            };

            match result {
                Ok(()) => {
                    counter.add(1, &[KeyValue::new("result", "delivered")]);
                    debug!(task_id, "notification delivered");
                }
                Err(error) => {
                    counter.add(1, &[KeyValue::new("result", "failed")]);
                    warn!(task_id, %error, "notification dropped");
                }
            }
        })
    }
}
