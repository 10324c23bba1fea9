use std::sync::Arc;

use ahash::HashMap;
use log::warn;

use crate::{
    core::{
        id::Id,
        uri::Uri,
    },
    session::context::{
        EventHandler,
        InvocationHandler,
    },
};

/// Handlers for active subscriptions and registrations.
///
/// Router-assigned IDs map to names, and names map to handlers.
#[derive(Default)]
pub(crate) struct HandlerTable {
    subscriptions: HashMap<Id, Uri>,
    event_handlers: HashMap<Uri, Vec<Arc<dyn EventHandler>>>,
    registrations: HashMap<Id, Uri>,
    procedures: HashMap<Uri, Arc<dyn InvocationHandler>>,
}

impl HandlerTable {
    /// Adds a handler for a subscription.
    ///
    /// The router returns the same subscription ID for repeated subscriptions to a topic, so one
    /// topic may have many handlers.
    pub fn add_subscription(
        &mut self,
        subscription: Id,
        topic: Uri,
        handler: Arc<dyn EventHandler>,
    ) {
        self.subscriptions.insert(subscription, topic.clone());
        self.event_handlers.entry(topic).or_default().push(handler);
    }

    /// Looks up the topic and handlers for a subscription.
    pub fn event_handlers(&self, subscription: Id) -> Option<(&Uri, &[Arc<dyn EventHandler>])> {
        let topic = self.subscriptions.get(&subscription)?;
        let handlers = self.event_handlers.get(topic)?;
        Some((topic, handlers))
    }

    /// Adds the handler for a registration, replacing any handler of the same procedure.
    pub fn add_registration(
        &mut self,
        registration: Id,
        procedure: Uri,
        handler: Arc<dyn InvocationHandler>,
    ) {
        if self.procedures.contains_key(&procedure) {
            warn!("Replacing invocation handler for {procedure}");
        }
        self.registrations.insert(registration, procedure.clone());
        self.procedures.insert(procedure, handler);
    }

    /// Looks up the procedure and handler for a registration.
    pub fn invocation_handler(
        &self,
        registration: Id,
    ) -> Option<(&Uri, &Arc<dyn InvocationHandler>)> {
        let procedure = self.registrations.get(&registration)?;
        let handler = self.procedures.get(procedure)?;
        Some((procedure, handler))
    }
}
