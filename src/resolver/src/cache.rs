use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::client::StoreClient;
use crate::error::DiscoverError;
use crate::factory::ServiceFactory;
use crate::service::{Service, ServiceOptions};
use common::config::DiscoveryConfig;

/// Entry point for resolving services by name.
///
/// Keeps one [`Service`] per name so every caller shares the same
/// synchronized membership.
#[derive(Debug)]
pub struct Discover {
    factory: ServiceFactory,
    services: DashMap<String, Arc<Service>>,
}

impl Discover {
    pub fn new(
        config: &DiscoveryConfig,
        client: Arc<dyn StoreClient>,
    ) -> Result<Self, DiscoverError> {
        config.validate()?;

        let factory = ServiceFactory::new(config.prefix.clone(), client)?
            .with_options(ServiceOptions::from(config));

        Ok(Self {
            factory,
            services: DashMap::new(),
        })
    }

    /// Resolver for `name`, started on first use and shared afterwards
    pub fn resolve(&self, name: &str) -> Result<Arc<Service>, DiscoverError> {
        if name.is_empty() {
            return Err(DiscoverError::MissingServiceName);
        }
        if let Some(service) = self.services.get(name) {
            return Ok(Arc::clone(service.value()));
        }

        match self.services.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let service = self.factory.new_service(name)?;
                debug!(service = name, path = service.path(), "Started resolving service");
                Ok(Arc::clone(entry.insert(service).value()))
            }
        }
    }

    /// Names resolved so far
    pub fn cached(&self) -> Vec<String> {
        self.services.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn prefix(&self) -> &str {
        self.factory.prefix()
    }
}
