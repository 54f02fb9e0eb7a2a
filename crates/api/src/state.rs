use std::sync::Arc;

use scriptgate_amqp::ConnectionStatus;
use scriptgate_core::dispatcher::Dispatcher;
use scriptgate_core::scripting::engine::ScriptEngine;
use scriptgate_events::EventBus;

use crate::auth::AuthConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState<E>>`.
pub struct AppState<E: ScriptEngine> {
    pub dispatcher: Dispatcher<E>,
    pub auth: Arc<AuthConfig>,
    pub event_bus: Arc<EventBus>,
    /// Present when the AMQP front-end is running; read by the health route.
    pub amqp_status: Option<ConnectionStatus>,
}

impl<E: ScriptEngine> AppState<E> {
    pub fn new(dispatcher: Dispatcher<E>, auth: AuthConfig, event_bus: Arc<EventBus>) -> Self {
        Self {
            dispatcher,
            auth: Arc::new(auth),
            event_bus,
            amqp_status: None,
        }
    }

    pub fn with_amqp_status(mut self, status: ConnectionStatus) -> Self {
        self.amqp_status = Some(status);
        self
    }
}

// Manual impl: `E` itself need not be `Clone`.
impl<E: ScriptEngine> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            auth: Arc::clone(&self.auth),
            event_bus: Arc::clone(&self.event_bus),
            amqp_status: self.amqp_status.clone(),
        }
    }
}
