//! Connection factory.
//!
//! The one entry point that turns `(protocol, options)` into a live
//! connection. It holds no state of its own beyond the registry it resolves
//! names against; each call constructs a fresh builder and connects it.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::discovery::DiscoveryOptions;
use super::registry::ProtocolRegistry;
use super::{ConnectionBuilder, ProtocolDescriptor};
use crate::config::BrokerConfig;
use crate::connection::HostConnection;
use crate::error::{BrokerError, Result};
use crate::options::ConnectionOptions;

/// Creates connections through a [`ProtocolRegistry`].
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    registry: Arc<ProtocolRegistry>,
}

impl ConnectionFactory {
    pub fn new(registry: Arc<ProtocolRegistry>) -> Self {
        Self { registry }
    }

    /// Factory over a registry discovered with the settings in `config`.
    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        Self::discover(config.discovery_options())
    }

    /// Factory over a freshly discovered registry.
    pub fn discover(options: DiscoveryOptions) -> Result<Self> {
        Ok(Self::new(Arc::new(ProtocolRegistry::discover(options)?)))
    }

    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    /// Connect to a host using the named protocol.
    ///
    /// Errors raised by the protocol while building or connecting are returned
    /// as-is. The factory adds its own errors only for an unknown protocol or a
    /// protocol implementation that breaks the builder contract.
    pub async fn get_connection(
        &self,
        protocol: &str,
        options: &ConnectionOptions,
    ) -> Result<Box<dyn HostConnection>> {
        connect_with(&self.registry, protocol, options).await
    }
}

/// Connect through the process-wide registry.
///
/// # Example
///
/// ```ignore
/// let options = ConnectionOptions::new().with(keys::DOCKER_CONTAINER, "web-1");
/// let connection = hostbroker::get_connection("docker", &options).await?;
/// let output = connection.execute("uname -a").await?;
/// ```
pub async fn get_connection(
    protocol: &str,
    options: &ConnectionOptions,
) -> Result<Box<dyn HostConnection>> {
    connect_with(ProtocolRegistry::global()?, protocol, options).await
}

async fn connect_with(
    registry: &ProtocolRegistry,
    protocol: &str,
    options: &ConnectionOptions,
) -> Result<Box<dyn HostConnection>> {
    let descriptor = resolve(registry, protocol)?;
    let builder = instantiate(&descriptor, protocol, options)?;

    tracing::debug!("Connecting with {}", descriptor.implementation());
    builder.connect().await
}

fn resolve(registry: &ProtocolRegistry, protocol: &str) -> Result<Arc<ProtocolDescriptor>> {
    if let Some(descriptor) = registry.lookup(protocol) {
        return Ok(descriptor);
    }

    if registry.state() == super::RegistryState::Uninitialized {
        return Err(BrokerError::NotPublished);
    }

    Err(BrokerError::UnknownProtocol {
        name: protocol.to_string(),
        supported: registry.protocols(),
    })
}

fn instantiate(
    descriptor: &ProtocolDescriptor,
    protocol: &str,
    options: &ConnectionOptions,
) -> Result<Box<dyn ConnectionBuilder>> {
    let constructor = descriptor.constructor();
    let built = catch_unwind(AssertUnwindSafe(|| constructor(protocol, options)));

    let builder = match built {
        Ok(result) => result?,
        Err(payload) => {
            let cause = panic_message(payload.as_ref());
            tracing::error!(
                "Could not instantiate {} for protocol '{}': {}",
                descriptor.implementation(),
                protocol,
                cause
            );
            return Err(BrokerError::InstantiationFailure {
                implementation: descriptor.implementation().to_string(),
                cause,
            });
        }
    };

    if builder.protocol() != protocol {
        let reason = format!(
            "built for protocol '{}' but '{}' was requested",
            builder.protocol(),
            protocol
        );
        tracing::error!("{} is broken: {}", descriptor.implementation(), reason);
        return Err(BrokerError::IncompatibleImplementation {
            implementation: descriptor.implementation().to_string(),
            reason,
        });
    }

    Ok(builder)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "constructor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::options::keys;
    use crate::protocol::testing::{
        DeniedBuilder, EchoBuilder, HandshakeRefused, MislabeledBuilder, PanickingBuilder,
        RefusedBuilder, StrictBuilder,
    };
    use crate::protocol::{ConstructBuilder, ProtocolTable};

    static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);
    static CONNECTED: AtomicUsize = AtomicUsize::new(0);
    static SHADOW_CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

    struct CountingBuilder {
        protocol: String,
    }

    impl ConstructBuilder for CountingBuilder {
        fn construct(protocol: &str, _options: &ConnectionOptions) -> Result<Self> {
            CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
            Ok(Self {
                protocol: protocol.to_string(),
            })
        }
    }

    #[async_trait]
    impl ConnectionBuilder for CountingBuilder {
        fn protocol(&self) -> &str {
            &self.protocol
        }

        async fn connect(self: Box<Self>) -> Result<Box<dyn HostConnection>> {
            CONNECTED.fetch_add(1, Ordering::SeqCst);
            Box::new(EchoBuilder::construct(&self.protocol, &ConnectionOptions::new())?)
                .connect()
                .await
        }
    }

    struct ShadowBuilder {
        protocol: String,
    }

    impl ConstructBuilder for ShadowBuilder {
        fn construct(protocol: &str, _options: &ConnectionOptions) -> Result<Self> {
            SHADOW_CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
            Ok(Self {
                protocol: protocol.to_string(),
            })
        }
    }

    #[async_trait]
    impl ConnectionBuilder for ShadowBuilder {
        fn protocol(&self) -> &str {
            &self.protocol
        }

        async fn connect(self: Box<Self>) -> Result<Box<dyn HostConnection>> {
            Box::new(EchoBuilder::construct(&self.protocol, &ConnectionOptions::new())?)
                .connect()
                .await
        }
    }

    fn factory_with(descriptors: Vec<ProtocolDescriptor>) -> ConnectionFactory {
        let table: ProtocolTable = descriptors
            .into_iter()
            .map(|d| (d.name().to_string(), Arc::new(d)))
            .collect();
        ConnectionFactory::new(Arc::new(ProtocolRegistry::with_table(table)))
    }

    fn local_and_docker() -> ConnectionFactory {
        factory_with(vec![
            ProtocolDescriptor::of::<EchoBuilder>("local"),
            ProtocolDescriptor::of::<EchoBuilder>("docker"),
        ])
    }

    #[tokio::test]
    async fn test_get_connection_returns_handle_for_protocol() {
        let factory = local_and_docker();
        let connection = factory
            .get_connection("docker", &ConnectionOptions::new())
            .await
            .unwrap();

        assert_eq!(connection.protocol(), "docker");
        let output = connection.execute("echo hi").await.unwrap();
        assert_eq!(output.stdout, "echo hi");
    }

    #[tokio::test]
    async fn test_construct_and_connect_run_once() {
        let factory = factory_with(vec![ProtocolDescriptor::of::<CountingBuilder>("counting")]);

        factory
            .get_connection("counting", &ConnectionOptions::new())
            .await
            .unwrap();

        assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 1);
        assert_eq!(CONNECTED.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_protocol() {
        let factory = local_and_docker();
        let err = factory
            .get_connection("ssh", &ConnectionOptions::new())
            .await
            .unwrap_err();

        match err {
            BrokerError::UnknownProtocol { name, supported } => {
                assert_eq!(name, "ssh");
                assert_eq!(supported, vec!["docker", "local"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_protocol_constructs_nothing() {
        let factory = factory_with(vec![ProtocolDescriptor::of::<ShadowBuilder>("local")]);
        let err = factory
            .get_connection("ssh", &ConnectionOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::UnknownProtocol { ref name, .. } if name == "ssh"));
        assert_eq!(SHADOW_CONSTRUCTED.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unpublished_registry() {
        let factory = ConnectionFactory::new(Arc::new(ProtocolRegistry::new()));
        let err = factory
            .get_connection("local", &ConnectionOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotPublished));
    }

    #[tokio::test]
    async fn test_connect_error_passes_through_unchanged() {
        let factory = factory_with(vec![ProtocolDescriptor::of::<RefusedBuilder>("refusing")]);
        let err = factory
            .get_connection("refusing", &ConnectionOptions::new())
            .await
            .unwrap_err();

        match err {
            BrokerError::Plugin(inner) => {
                let refused = inner.downcast_ref::<HandshakeRefused>().unwrap();
                assert_eq!(refused.banner, "maintenance window");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_authentication_error_keeps_its_variant() {
        let factory = factory_with(vec![ProtocolDescriptor::of::<DeniedBuilder>("denied")]);
        let err = factory
            .get_connection("denied", &ConnectionOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BrokerError::Authentication { ref protocol, ref message }
                if protocol == "denied" && message == "publickey denied"
        ));
        assert_eq!(err.class(), crate::error::ErrorClass::Application);
    }

    #[tokio::test]
    async fn test_construction_error_passes_through_unchanged() {
        let factory = factory_with(vec![ProtocolDescriptor::of::<StrictBuilder>("strict")]);

        let err = factory
            .get_connection("strict", &ConnectionOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::MissingOption { ref key } if key == "port"));

        let options = ConnectionOptions::new().with(keys::PORT, "not-a-port");
        let err = factory.get_connection("strict", &options).await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidOption { ref key, .. } if key == "port"));

        let options = ConnectionOptions::new().with(keys::PORT, 22);
        assert!(factory.get_connection("strict", &options).await.is_ok());
    }

    #[tokio::test]
    async fn test_panicking_constructor_is_instantiation_failure() {
        let factory = factory_with(vec![ProtocolDescriptor::of::<PanickingBuilder>("panicking")]);
        let err = factory
            .get_connection("panicking", &ConnectionOptions::new())
            .await
            .unwrap_err();

        match err {
            BrokerError::InstantiationFailure {
                implementation,
                cause,
            } => {
                assert!(implementation.ends_with("PanickingBuilder"));
                assert_eq!(cause, "builder state poisoned");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_mislabeled_builder_is_incompatible() {
        let factory = factory_with(vec![ProtocolDescriptor::of::<MislabeledBuilder>("ssh")]);
        let err = factory
            .get_connection("ssh", &ConnectionOptions::new())
            .await
            .unwrap_err();

        assert!(err.is_plugin_defect());
        assert!(matches!(err, BrokerError::IncompatibleImplementation { .. }));
        assert!(err.to_string().contains("'telnet'"));
    }

    #[tokio::test]
    async fn test_concurrent_requests_get_independent_handles() {
        let factory = local_and_docker();

        let options = ConnectionOptions::new();
        let (a, b) = tokio::join!(
            factory.get_connection("docker", &options),
            factory.get_connection("docker", &options),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let id_a = a.execute("instance").await.unwrap().stdout;
        let id_b = b.execute("instance").await.unwrap().stdout;
        assert_ne!(id_a, id_b);
    }

    #[tokio::test]
    async fn test_concurrent_requests_across_tasks() {
        let factory = local_and_docker();
        let mut handles = Vec::new();

        for i in 0..8 {
            let factory = factory.clone();
            let protocol = if i % 2 == 0 { "local" } else { "docker" };
            handles.push(tokio::spawn(async move {
                let connection = factory
                    .get_connection(protocol, &ConnectionOptions::new())
                    .await
                    .unwrap();
                assert_eq!(connection.protocol(), protocol);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_registered_after_publish_is_reachable() {
        let factory = local_and_docker();
        factory
            .registry()
            .register(ProtocolDescriptor::of::<EchoBuilder>("ssh"))
            .unwrap();

        let connection = factory
            .get_connection("ssh", &ConnectionOptions::new())
            .await
            .unwrap();
        assert_eq!(connection.protocol(), "ssh");
    }

    #[tokio::test]
    async fn test_global_get_connection_local() {
        let connection = get_connection("local", &ConnectionOptions::new())
            .await
            .unwrap();
        assert_eq!(connection.protocol(), "local");
    }

    #[test]
    fn test_panic_message_kinds() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");

        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "constructor panicked");
    }
}
