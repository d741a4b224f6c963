use std::sync::Arc;

use crate::client::StoreClient;
use crate::error::DiscoverError;
use crate::service::{Service, ServiceOptions};
use common::config::ConfigError;

/// Store path under which instances of `name` are registered:
/// `/<prefix>/service/<name>`
pub fn service_path(prefix: &str, name: &str) -> String {
    format!("/{prefix}/service/{name}")
}

/// Builds [`Service`] resolvers bound to one prefix and one store client.
#[derive(Clone)]
pub struct ServiceFactory {
    prefix: String,
    client: Arc<dyn StoreClient>,
    options: ServiceOptions,
}

impl std::fmt::Debug for ServiceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceFactory")
            .field("prefix", &self.prefix)
            .field("client", &"Arc<dyn StoreClient>")
            .field("options", &self.options)
            .finish()
    }
}

impl ServiceFactory {
    pub fn new(
        prefix: impl Into<String>,
        client: Arc<dyn StoreClient>,
    ) -> Result<Self, DiscoverError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix.into());
        }
        if prefix.contains('/') {
            return Err(ConfigError::InvalidPrefix(prefix).into());
        }

        Ok(Self {
            prefix,
            client,
            options: ServiceOptions::default(),
        })
    }

    pub fn with_options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Start a fresh resolver for `name`. Nothing is cached here.
    pub fn new_service(&self, name: &str) -> Result<Arc<Service>, DiscoverError> {
        if name.is_empty() {
            return Err(DiscoverError::MissingServiceName);
        }

        Service::new(
            service_path(&self.prefix, name),
            Arc::clone(&self.client),
            self.options.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::InMemoryStore;

    fn store() -> Arc<dyn StoreClient> {
        Arc::new(InMemoryStore::new(16))
    }

    #[test]
    fn test_service_path() {
        assert_eq!(service_path("discover", "proxy-api"), "/discover/service/proxy-api");
    }

    #[test]
    fn test_factory_rejects_bad_prefix() {
        assert!(matches!(
            ServiceFactory::new("", store()),
            Err(DiscoverError::Config(ConfigError::EmptyPrefix))
        ));
        assert!(matches!(
            ServiceFactory::new("a/b", store()),
            Err(DiscoverError::Config(ConfigError::InvalidPrefix(_)))
        ));
    }

    #[test]
    fn test_new_service_requires_name() {
        let factory = ServiceFactory::new("discover", store()).unwrap();
        assert!(matches!(
            factory.new_service(""),
            Err(DiscoverError::MissingServiceName)
        ));
    }

    #[tokio::test]
    async fn test_new_service_uses_prefixed_path() {
        let factory = ServiceFactory::new("registry", store()).unwrap();
        let service = factory.new_service("proxy-api").unwrap();
        assert_eq!(service.path(), "/registry/service/proxy-api");
    }

    #[tokio::test]
    async fn test_new_service_is_not_cached() {
        let factory = ServiceFactory::new("discover", store()).unwrap();
        let first = factory.new_service("proxy-api").unwrap();
        let second = factory.new_service("proxy-api").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
