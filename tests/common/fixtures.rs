//! Engine fixtures
//!
//! Services are built on in-memory backends. Tests that need several
//! instances share one `InMemoryBus` between them.

use collabcore::backend::realtime::{InMemoryBus, MessageBus};
use collabcore::backend::registry::ConnectionId;
use collabcore::backend::services::{CollabServices, ServiceBackends};
use collabcore::shared::CollabConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::transports::MockTransport;

pub const ADMIN_TOKEN: &str = "test-admin-token";

pub fn test_config(instance_id: &str) -> CollabConfig {
    CollabConfig::builder()
        .instance_id(instance_id)
        .admin_token(ADMIN_TOKEN)
        .build()
        .expect("test configuration is valid")
}

/// Single instance, nothing started
pub async fn services(instance_id: &str) -> Arc<CollabServices> {
    CollabServices::new(test_config(instance_id), ServiceBackends::in_memory()).await
}

/// Instance on a shared bus with its relay listener running
pub async fn started_on_bus(bus: &InMemoryBus, instance_id: &str) -> Arc<CollabServices> {
    started_with(Arc::new(bus.clone()), test_config(instance_id)).await
}

/// Instance on any bus with its relay listener running
pub async fn started_with(bus: Arc<dyn MessageBus>, config: CollabConfig) -> Arc<CollabServices> {
    let services = CollabServices::new(config, ServiceBackends::with_bus(bus)).await;
    services
        .relay
        .start(&services.registry, &services.presence)
        .await
        .expect("relay subscribes to the bus");
    services
}

/// Connect a recording transport
pub async fn connect(
    services: &CollabServices,
    user_id: &str,
    project_id: Option<&str>,
) -> (ConnectionId, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let id = services
        .registry
        .connect(
            transport.clone(),
            user_id,
            project_id.map(str::to_string),
            None,
        )
        .await;
    (id, transport)
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
