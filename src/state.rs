use std::sync::Arc;

use crate::config::Config;
use crate::connection::dispatcher::Dispatcher;
use crate::connection::events::EventBus;
use crate::connection::registry::Registry;
use crate::connection::sender::Sender;
use crate::connection::token::TokenBroker;
use crate::identity::IdentityProvider;

/// Shared application state passed to all handlers and extractors.
///
/// Every field is itself cheaply cloneable (`Arc`-backed), so cloning
/// `AppState` for each request is inexpensive.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub token_broker: Arc<TokenBroker>,
    pub identity: Arc<dyn IdentityProvider>,
    pub event_bus: Arc<EventBus>,
    pub dispatcher: Arc<Dispatcher>,
    pub sender: Arc<Sender>,
}
