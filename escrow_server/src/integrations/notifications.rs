use std::time::Duration;

use escrow_engine::events::{EscrowChangedEvent, EventHandlers, EventHooks, NotificationEvent};
use futures::future::BoxFuture;
use log::*;
use reqwest::Client;

use crate::errors::ServerError;

/// Events queued per subscriber before publishing starts dropping them. Each escrow transition publishes at most two
/// notifications, so this absorbs a burst of around fifty concurrent transitions.
const NOTIFICATION_EVENT_BUFFER_SIZE: usize = 100;
const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the handlers that deliver engine events to users.
///
/// Every notification is logged. If `url` is given, it is also POSTed there as JSON. Delivery failures are logged and
/// dropped: the money has already moved by the time a notification is sent.
pub fn create_notification_handlers(url: Option<String>) -> Result<EventHandlers, ServerError> {
    let mut hooks = EventHooks::default();
    let client = match url {
        Some(url) => {
            let client = Client::builder()
                .timeout(NOTIFICATION_TIMEOUT)
                .build()
                .map_err(|e| ServerError::InitializeError(format!("Could not create notification client. {e}")))?;
            info!("📬️ Notifications will be delivered to {url}");
            Some((client, url))
        },
        None => None,
    };
    hooks.on_notification(move |ev: NotificationEvent| {
        info!("📬️ [{}] {:?} for {}: {}", ev.title, ev.kind, ev.user_id, ev.body);
        let Some((client, url)) = client.clone() else {
            return no_op();
        };
        Box::pin(async move { deliver(&client, &url, &ev).await })
    });
    hooks.on_escrow_changed(|ev: EscrowChangedEvent| {
        debug!("📬️ Escrow {} moved from {} to {}", ev.escrow.id, ev.previous_status, ev.escrow.status);
        no_op()
    });
    Ok(EventHandlers::new(NOTIFICATION_EVENT_BUFFER_SIZE, hooks))
}

async fn deliver(client: &Client, url: &str, event: &NotificationEvent) {
    match client.post(url).json(event).send().await {
        Ok(res) if res.status().is_success() => {
            debug!("📬️ {:?} notification delivered to {}", event.kind, event.user_id)
        },
        Ok(res) => warn!("📬️ Notification endpoint rejected {:?} for {}. Status {}", event.kind, event.user_id, res.status()),
        Err(e) => warn!("📬️ Could not deliver {:?} notification for {}. {e}", event.kind, event.user_id),
    }
}

fn no_op() -> BoxFuture<'static, ()> {
    Box::pin(async {})
}
