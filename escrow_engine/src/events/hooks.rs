use std::{future::Future, pin::Pin, sync::Arc};

use log::*;

use crate::events::{EscrowChangedEvent, EventHandler, EventProducer, Handler, NotificationEvent};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub notification_producer: Vec<EventProducer<NotificationEvent>>,
    pub escrow_changed_producer: Vec<EventProducer<EscrowChangedEvent>>,
}

impl EventProducers {
    pub fn notify(&self, event: NotificationEvent) {
        for emitter in &self.notification_producer {
            if !emitter.publish_event(event.clone()) {
                warn!("📬️ {:?} notification for {} was not delivered: {}", event.kind, event.user_id, event.title);
            }
        }
    }

    pub fn escrow_changed(&self, event: EscrowChangedEvent) {
        for emitter in &self.escrow_changed_producer {
            if !emitter.publish_event(event.clone()) {
                warn!("📬️ Change of escrow {} to {} was not delivered", event.escrow.id, event.escrow.status);
            }
        }
    }
}

pub struct EventHandlers {
    pub on_notification: Option<EventHandler<NotificationEvent>>,
    pub on_escrow_changed: Option<EventHandler<EscrowChangedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_notification = hooks.on_notification.map(|f| EventHandler::new(buffer_size, f));
        let on_escrow_changed = hooks.on_escrow_changed.map(|f| EventHandler::new(buffer_size, f));
        Self { on_notification, on_escrow_changed }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_notification {
            result.notification_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_escrow_changed {
            result.escrow_changed_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_notification {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_escrow_changed {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_notification: Option<Handler<NotificationEvent>>,
    pub on_escrow_changed: Option<Handler<EscrowChangedEvent>>,
}

impl EventHooks {
    pub fn on_notification<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(NotificationEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_notification = Some(Arc::new(f));
        self
    }

    pub fn on_escrow_changed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(EscrowChangedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_escrow_changed = Some(Arc::new(f));
        self
    }
}
