//! Queue client registry.
//!
//! One client per distinct `region:endpoint` key, created through the
//! configured provider and cached for the process lifetime. Named queue
//! writers are resolved here too, since they share the same clients.

use std::sync::Arc;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::{EndpointConfig, QueueConfig};
use crate::producer::QueueWriter;
use crate::transport::{BackendError, QueueClient, QueueClientProvider};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No region configured for queue {queue}")]
    MissingRegion { queue: String },

    #[error("No queue client registered for {key}")]
    ClientUnavailable { key: String },

    #[error("No queue writer named {name}")]
    QueueWriterUnavailable { name: String },

    #[error("Failed to connect queue client for {key}: {source}")]
    Connect {
        key: String,
        #[source]
        source: BackendError,
    },

    #[error("Failed to resolve queue {queue} for writer {name}: {source}")]
    WriterResolution {
        name: String,
        queue: String,
        #[source]
        source: BackendError,
    },
}

pub struct ClientRegistry {
    provider: Arc<dyn QueueClientProvider>,
    clients: DashMap<String, Arc<dyn QueueClient>>,
    writers: DashMap<String, Arc<QueueWriter>>,
}

impl ClientRegistry {
    pub fn new(provider: Arc<dyn QueueClientProvider>) -> Self {
        Self {
            provider,
            clients: DashMap::new(),
            writers: DashMap::new(),
        }
    }

    /// Connect every client the configuration needs and resolve all writers.
    ///
    /// Does nothing when the queue module is disabled. Disabled consumers
    /// get no clients.
    pub async fn start(&self, config: &QueueConfig) -> Result<(), RegistryError> {
        if !config.enabled {
            debug!("Queue module disabled, no clients created");
            return Ok(());
        }

        for consumer in config.consumers.iter().filter(|c| c.enabled) {
            for endpoint in &consumer.endpoints {
                self.get_or_connect(endpoint)?;
            }
        }

        for (name, endpoint) in &config.queue_writers {
            let client = self.get_or_connect(endpoint)?;
            let queue_url = client
                .get_queue_url(&endpoint.queue_name)
                .await
                .map_err(|source| RegistryError::WriterResolution {
                    name: name.clone(),
                    queue: endpoint.queue_name.clone(),
                    source,
                })?;
            debug!(writer = %name, queue_url = %queue_url, "Queue writer resolved");
            self.writers
                .insert(name.clone(), Arc::new(QueueWriter::new(name.clone(), queue_url, client)));
        }

        info!(
            clients = self.clients.len(),
            writers = self.writers.len(),
            "Queue client registry started"
        );
        Ok(())
    }

    /// The cached client for `endpoint`'s key.
    pub fn get(&self, endpoint: &EndpointConfig) -> Result<Arc<dyn QueueClient>, RegistryError> {
        let key = endpoint.cache_key();
        match self.clients.get(&key) {
            Some(client) => Ok(client.value().clone()),
            None => {
                error!(key = %key, queue = %endpoint.queue_name, "Queue client not registered");
                Err(RegistryError::ClientUnavailable { key })
            }
        }
    }

    /// The cached client for `endpoint`'s key, connecting it on first use.
    pub fn get_or_connect(&self, endpoint: &EndpointConfig) -> Result<Arc<dyn QueueClient>, RegistryError> {
        if endpoint.region.is_empty() {
            return Err(RegistryError::MissingRegion {
                queue: endpoint.queue_name.clone(),
            });
        }
        let key = endpoint.cache_key();
        let entry = self.clients.entry(key.clone()).or_try_insert_with(|| {
            debug!(key = %key, "Connecting queue client");
            self.provider
                .connect(endpoint)
                .map_err(|source| RegistryError::Connect { key: key.clone(), source })
        })?;
        Ok(entry.value().clone())
    }

    pub fn queue_writer(&self, name: &str) -> Result<Arc<QueueWriter>, RegistryError> {
        self.writers
            .get(name)
            .map(|w| w.value().clone())
            .ok_or_else(|| RegistryError::QueueWriterUnavailable { name: name.to_string() })
    }

    /// Number of distinct clients created.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.clients.len())
            .field("writers", &self.writers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsumerConfig;
    use crate::transport::memory::MemoryCloud;
    use crate::transport::ReceiveRequest;

    fn consumer(enabled: bool, endpoints: Vec<EndpointConfig>) -> ConsumerConfig {
        ConsumerConfig {
            handler: "log".to_string(),
            enabled,
            concurrency: 1,
            endpoints,
        }
    }

    #[tokio::test]
    async fn test_one_client_per_endpoint_key() {
        let cloud = Arc::new(MemoryCloud::new());
        let registry = ClientRegistry::new(cloud);
        let config = QueueConfig {
            enabled: true,
            consumers: vec![
                consumer(
                    true,
                    vec![
                        EndpointConfig::new("a", "us-east-1"),
                        EndpointConfig::new("b", "us-east-1"),
                        EndpointConfig::new("c", "us-east-1").with_endpoint("http://localhost:4566"),
                    ],
                ),
                consumer(false, vec![EndpointConfig::new("d", "eu-west-1")]),
            ],
            ..QueueConfig::default()
        };

        registry.start(&config).await.unwrap();
        assert_eq!(registry.client_count(), 2);

        let a = registry.get(&EndpointConfig::new("a", "us-east-1")).unwrap();
        let b = registry.get(&EndpointConfig::new("b", "us-east-1")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        // The disabled consumer's region was never connected.
        let err = registry.get(&EndpointConfig::new("d", "eu-west-1")).err();
        assert!(matches!(err, Some(RegistryError::ClientUnavailable { ref key }) if key == "eu-west-1:none"));
    }

    #[tokio::test]
    async fn test_missing_region_is_fatal() {
        let registry = ClientRegistry::new(Arc::new(MemoryCloud::new()));
        let config = QueueConfig {
            enabled: true,
            consumers: vec![consumer(true, vec![EndpointConfig::new("a", "")])],
            ..QueueConfig::default()
        };
        let err = registry.start(&config).await.unwrap_err();
        assert!(matches!(err, RegistryError::MissingRegion { .. }));
    }

    #[tokio::test]
    async fn test_disabled_module_creates_nothing() {
        let registry = ClientRegistry::new(Arc::new(MemoryCloud::new()));
        let config = QueueConfig {
            enabled: false,
            consumers: vec![consumer(true, vec![EndpointConfig::new("a", "us-east-1")])],
            ..QueueConfig::default()
        };
        registry.start(&config).await.unwrap();
        assert_eq!(registry.client_count(), 0);
    }

    #[tokio::test]
    async fn test_queue_writers_resolved_at_start() {
        let cloud = Arc::new(MemoryCloud::new());
        let endpoint = EndpointConfig::new("outbound", "us-east-1");
        cloud.connect(&endpoint).unwrap().create_queue("outbound").await.unwrap();

        let registry = ClientRegistry::new(cloud.clone());
        let mut config = QueueConfig {
            enabled: true,
            ..QueueConfig::default()
        };
        config.queue_writers.insert("events".to_string(), endpoint.clone());
        registry.start(&config).await.unwrap();

        let writer = registry.queue_writer("events").unwrap();
        writer.send_message("hello").await.unwrap();
        assert!(matches!(
            registry.queue_writer("missing"),
            Err(RegistryError::QueueWriterUnavailable { .. })
        ));

        let client = registry.get(&endpoint).unwrap();
        let received = client
            .receive_messages(ReceiveRequest::default().with_queue_url(writer.queue_url()))
            .await
            .unwrap();
        assert_eq!(received[0].body, "hello");
    }

    #[tokio::test]
    async fn test_unknown_writer_queue_is_fatal() {
        let registry = ClientRegistry::new(Arc::new(MemoryCloud::new()));
        let mut config = QueueConfig {
            enabled: true,
            ..QueueConfig::default()
        };
        config
            .queue_writers
            .insert("events".to_string(), EndpointConfig::new("nowhere", "us-east-1"));
        let err = registry.start(&config).await.unwrap_err();
        assert!(matches!(err, RegistryError::WriterResolution { ref name, .. } if name == "events"));
    }
}
