use crate::client::{ExchangeName, TransferClient};
use indexmap::IndexMap;
use std::{fmt::Debug, sync::Arc};

/// Explicitly constructed set of exchange connectors, injected into the
/// [`AssetTransferModule`](crate::module::AssetTransferModule).
///
/// Iteration follows insertion order, so destination discovery scans exchanges in the order
/// they were configured.
#[derive(Clone, Default)]
pub struct ExchangeRegistry {
    clients: IndexMap<ExchangeName, Arc<dyn TransferClient>>,
}

impl Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRegistry")
            .field("exchanges", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style [`Self::insert`].
    pub fn with(mut self, name: impl Into<ExchangeName>, client: Arc<dyn TransferClient>) -> Self {
        self.insert(name, client);
        self
    }

    /// Register a connector, returning any connector previously registered under `name`.
    pub fn insert(
        &mut self,
        name: impl Into<ExchangeName>,
        client: Arc<dyn TransferClient>,
    ) -> Option<Arc<dyn TransferClient>> {
        self.clients.insert(name.into(), client)
    }

    pub fn get(&self, name: &ExchangeName) -> Option<&Arc<dyn TransferClient>> {
        self.clients.get(name)
    }

    pub fn contains(&self, name: &ExchangeName) -> bool {
        self.clients.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &ExchangeName> {
        self.clients.keys()
    }

    /// Every registered connector except `exclude`, in configuration order.
    pub fn others<'a>(
        &'a self,
        exclude: &'a ExchangeName,
    ) -> impl Iterator<Item = (&'a ExchangeName, &'a Arc<dyn TransferClient>)> {
        self.clients.iter().filter(move |(name, _)| *name != exclude)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
