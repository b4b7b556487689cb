//! Fire-and-forget notifications.
//!
//! Notifications are best-effort by design: they are dispatched on a
//! detached task with a fresh deadline disconnected from the caller's
//! context, so a client disconnect never aborts the send and a notifier
//! outage never fails the enclosing operation. Errors are logged only.

use std::sync::Arc;

use async_trait::async_trait;
use common::constants::NOTIFY_TIMEOUT;
use common::id::CustomerId;
use common::mobile::Mobile;
use common::task::PeykTask;
use tracing::warn;

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send_sms(
        &self,
        mobile: &Mobile,
        message: &str,
        customer_id: Option<CustomerId>,
    ) -> anyhow::Result<()>;

    async fn send_email(
        &self,
        address: &str,
        subject: &str,
        body: &str,
    ) -> anyhow::Result<()>;
}

/// Dispatch an SMS on a detached task with a fresh 10s deadline.
pub fn sms_best_effort<N: Notifier>(
    notifier: Arc<N>,
    mobile: Mobile,
    message: String,
    customer_id: Option<CustomerId>,
) {
    PeykTask::spawn(async move {
        let send = notifier.send_sms(&mobile, &message, customer_id);
        match tokio::time::timeout(NOTIFY_TIMEOUT, send).await {
            Ok(Ok(())) => (),
            Ok(Err(e)) => warn!("Failed to send SMS notification: {e:#}"),
            Err(_) => warn!("SMS notification timed out"),
        }
    })
    .detach();
}

/// Dispatch an email on a detached task with a fresh 10s deadline.
pub fn email_best_effort<N: Notifier>(
    notifier: Arc<N>,
    address: String,
    subject: String,
    body: String,
) {
    PeykTask::spawn(async move {
        let send = notifier.send_email(&address, &subject, &body);
        match tokio::time::timeout(NOTIFY_TIMEOUT, send).await {
            Ok(Ok(())) => (),
            Ok(Err(e)) => warn!("Failed to send email notification: {e:#}"),
            Err(_) => warn!("Email notification timed out"),
        }
    })
    .detach();
}
