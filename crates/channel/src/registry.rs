//! Process-wide mapping from channel kind to responder factory.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use storjdemo_protocol::{ChannelKind, StepKind};
use tracing::debug;

use crate::error::ChannelError;
use crate::handler::{Responder, Sequenced, StepHandler};

/// Builds the responder for a newly opened channel of one session, or
/// refuses the channel with a reason.
pub type ResponderFactory =
    Arc<dyn Fn(&str) -> Result<Box<dyn Responder>, String> + Send + Sync>;

/// Responder factories keyed by channel kind.
///
/// Lookups happen on every accepted connection, concurrently with each
/// other; registration normally happens once at start-up.
#[derive(Default)]
pub struct ChannelRegistry {
    factories: RwLock<HashMap<ChannelKind, ResponderFactory>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the factory for `kind`.
    pub fn register(&self, kind: ChannelKind, factory: ResponderFactory) {
        if let Ok(mut map) = self.factories.write() {
            map.insert(kind, factory);
        }
        debug!(%kind, "channel responder registered");
    }

    /// Registers a factory of step handlers; the channel kind follows from
    /// the handler's step type.
    pub fn register_handler<H, F>(&self, factory: F)
    where
        H: StepHandler,
        F: Fn(&str) -> Result<H, String> + Send + Sync + 'static,
    {
        let kind = <H::Step as StepKind>::CHANNEL;
        self.register(
            kind,
            Arc::new(move |session: &str| {
                factory(session).map(|h| Box::new(Sequenced::new(h)) as Box<dyn Responder>)
            }),
        );
    }

    pub fn is_registered(&self, kind: ChannelKind) -> bool {
        self.factories
            .read()
            .map(|map| map.contains_key(&kind))
            .unwrap_or(false)
    }

    /// Opens a responder for a channel of `kind` belonging to `session`.
    pub fn open(&self, kind: ChannelKind, session: &str) -> Result<Box<dyn Responder>, ChannelError> {
        let factory = self
            .factories
            .read()
            .ok()
            .and_then(|map| map.get(&kind).cloned())
            .ok_or_else(|| ChannelError::UnknownChannel(kind.to_string()))?;

        factory(session).map_err(ChannelError::Refused)
    }
}
