/**
 * Service Wiring
 *
 * `CollabServices` owns every engine component and is the only place they are
 * constructed. Nothing starts on construction: `start` launches the relay
 * listener and the sweeps, `shutdown` stops them and closes every connection.
 *
 * # Build Order
 *
 * 1. Bus (in-memory or Postgres `LISTEN`/`NOTIFY`)
 * 2. Relay over the bus
 * 3. Connection registry (publishes through the relay)
 * 4. Presence coordinator, registered as the registry's connection observer
 * 5. Event triggers over the notification sink
 * 6. Detector over the activity source, presence and registry
 *
 * Back-references (registry to presence, background tasks to their owners)
 * are weak, so dropping `CollabServices` frees everything.
 */

use sqlx::PgPool;
use std::sync::{Arc, Weak};

use crate::backend::detector::{
    ActivityRecorder, ActivitySource, ConflictDetector, InMemoryActivityLog, LocationMatcher,
    PathHeuristicMatcher, PgActivityStore,
};
use crate::backend::error::CollabResult;
use crate::backend::middleware::auth::{HeaderIdentity, IdentityResolver};
use crate::backend::presence::{NoopMirror, PgPresenceMirror, PresenceCoordinator, PresenceMirror};
use crate::backend::realtime::{CrossInstanceRelay, InMemoryBus, MessageBus, PgNotifyBus};
use crate::backend::registry::{ConnectionObserver, ConnectionRegistry};
use crate::backend::triggers::{EventTriggers, LoggingNotifier, NotificationSink};
use crate::backend::ws::protocol::{AllowAllProjects, ProjectAccess};
use crate::shared::config::BusBackend;
use crate::shared::CollabConfig;

/// Pluggable edges of the engine
pub struct ServiceBackends {
    pub bus: Arc<dyn MessageBus>,
    pub mirror: Arc<dyn PresenceMirror>,
    pub activities: Arc<dyn ActivitySource>,
    pub recorder: Arc<dyn ActivityRecorder>,
    pub sink: Arc<dyn NotificationSink>,
    pub matcher: Arc<dyn LocationMatcher>,
    pub access: Arc<dyn ProjectAccess>,
    pub identity: Arc<dyn IdentityResolver>,
}

impl ServiceBackends {
    /// Everything in process: no database, no other instances
    pub fn in_memory() -> Self {
        Self::with_bus(Arc::new(InMemoryBus::default()))
    }

    /// In-memory backends around a given bus; instances sharing the bus see each other
    pub fn with_bus(bus: Arc<dyn MessageBus>) -> Self {
        let log = Arc::new(InMemoryActivityLog::default());
        Self {
            bus,
            mirror: Arc::new(NoopMirror),
            activities: log.clone(),
            recorder: log,
            sink: Arc::new(LoggingNotifier),
            matcher: Arc::new(PathHeuristicMatcher),
            access: Arc::new(AllowAllProjects),
            identity: Arc::new(HeaderIdentity::default()),
        }
    }

    /// Postgres-backed presence mirror and activity store; the bus follows `bus`
    pub fn postgres(pool: PgPool, bus: BusBackend) -> Self {
        let bus: Arc<dyn MessageBus> = match bus {
            BusBackend::Postgres => Arc::new(PgNotifyBus::new(pool.clone())),
            BusBackend::Memory => Arc::new(InMemoryBus::default()),
        };
        let store = Arc::new(PgActivityStore::new(pool.clone()));
        Self {
            mirror: Arc::new(PgPresenceMirror::new(pool)),
            activities: store.clone(),
            recorder: store,
            ..Self::with_bus(bus)
        }
    }
}

pub struct CollabServices {
    pub config: CollabConfig,
    pub relay: Arc<CrossInstanceRelay>,
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceCoordinator>,
    pub triggers: Arc<EventTriggers>,
    pub detector: Arc<ConflictDetector>,
    pub recorder: Arc<dyn ActivityRecorder>,
    pub access: Arc<dyn ProjectAccess>,
    pub identity: Arc<dyn IdentityResolver>,
}

impl CollabServices {
    pub async fn new(config: CollabConfig, backends: ServiceBackends) -> Arc<Self> {
        let relay = Arc::new(CrossInstanceRelay::new(backends.bus, &config.relay));
        let registry = Arc::new(ConnectionRegistry::new(Some(relay.clone())));
        let presence = Arc::new(PresenceCoordinator::new(
            registry.clone(),
            Some(relay.clone()),
            backends.mirror,
            config.presence.clone(),
        ));
        let observer: Weak<PresenceCoordinator> = Arc::downgrade(&presence);
        let observer: Weak<dyn ConnectionObserver> = observer;
        registry.set_observer(observer).await;

        let triggers = Arc::new(EventTriggers::new(backends.sink, Some(presence.clone())));
        let detector = Arc::new(ConflictDetector::new(
            backends.activities,
            presence.clone(),
            registry.clone(),
            backends.matcher,
            Some(triggers.clone()),
            config.detector.clone(),
        ));

        tracing::info!(
            "[Services] Built instance {} ({} bus)",
            relay.instance_id(),
            relay.stats().backend
        );

        Arc::new(Self {
            config,
            relay,
            registry,
            presence,
            triggers,
            detector,
            recorder: backends.recorder,
            access: backends.access,
            identity: backends.identity,
        })
    }

    /// Pick backends from the configuration and an optional database pool
    pub async fn from_config(config: CollabConfig, pool: Option<PgPool>) -> Arc<Self> {
        let backends = match pool {
            Some(pool) => ServiceBackends::postgres(pool, config.relay.bus),
            None => {
                if config.relay.bus == BusBackend::Postgres {
                    tracing::warn!("[Services] Postgres bus requested without a database, using in-memory bus");
                }
                ServiceBackends::in_memory()
            }
        };
        Self::new(config, backends).await
    }

    /// Start the relay listener and every periodic sweep
    pub async fn start(&self) -> CollabResult<()> {
        self.relay.start(&self.registry, &self.presence).await?;
        self.registry.start(&self.config.registry);
        self.presence.start();
        self.detector.start();
        tracing::info!("[Services] Background tasks started");
        Ok(())
    }

    /// Stop background work and close every local connection
    pub async fn shutdown(&self) {
        self.detector.stop();
        self.presence.stop();
        self.registry.stop();
        let closed = self.registry.disconnect_all().await;
        self.relay.stop();
        tracing::info!("[Services] Shut down, closed {} connection(s)", closed);
    }
}
