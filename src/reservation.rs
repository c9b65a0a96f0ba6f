//! Reservation coordination.
//!
//! A session's ports are reserved twice: once in the registry (the
//! infrastructure's system of record) and once on the generator, which binds
//! the same ports to its own port group. Both are released together, and a
//! registry group is never left behind when the generator side fails.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::binding::ReservedPortTable;
use crate::error::{Result, SessionError};
use crate::generator::TrafficGenerator;
use crate::registry::ReservationRegistry;

/// Source of the ports the infrastructure set aside for this session.
#[async_trait]
pub trait ReservationDetails: Send + Sync {
    async fn reserved_ports(&self) -> Result<ReservedPortTable>;
}

/// Reserved ports taken from configuration.
pub struct StaticReservationDetails {
    ports: ReservedPortTable,
}

impl StaticReservationDetails {
    pub fn new(ports: ReservedPortTable) -> Self {
        Self { ports }
    }
}

#[async_trait]
impl ReservationDetails for StaticReservationDetails {
    async fn reserved_ports(&self) -> Result<ReservedPortTable> {
        Ok(self.ports.clone())
    }
}

/// A group held in both the registry and on the generator.
///
/// Not `Clone`: [`ReservationCoordinator::release`] consumes it, so a group
/// cannot be released twice or used after release.
#[derive(Debug, PartialEq, Eq)]
pub struct ReservationGroup {
    pub group_id: u32,
    pub ordered_ports: Vec<String>,
}

/// Reserves and releases groups for one reservation id.
///
/// Both handshakes run on a spawned task so that dropping the caller's
/// future cannot leave a registry group without its generator-side binding
/// or without a record of who holds it.
#[derive(Clone)]
pub struct ReservationCoordinator {
    reservation_id: String,
    registry: Arc<dyn ReservationRegistry>,
    generator: Arc<dyn TrafficGenerator>,
}

impl ReservationCoordinator {
    pub fn new(
        reservation_id: impl Into<String>,
        registry: Arc<dyn ReservationRegistry>,
        generator: Arc<dyn TrafficGenerator>,
    ) -> Self {
        Self {
            reservation_id: reservation_id.into(),
            registry,
            generator,
        }
    }

    /// Reserve `ordered_ports` in the registry, then bind them on the
    /// generator. If the bind fails the registry group is released before
    /// the error is returned. If the caller is cancelled while the handshake
    /// is in flight, the task releases whatever it reserved.
    pub async fn reserve(&self, ordered_ports: &[String]) -> Result<ReservationGroup> {
        let (tx, rx) = oneshot::channel();
        let coordinator = self.clone();
        let ports = ordered_ports.to_vec();

        tokio::spawn(async move {
            let result = coordinator.reserve_and_bind(ports).await;
            if let Err(Ok(group)) = tx.send(result) {
                warn!(
                    group_id = group.group_id,
                    "reservation abandoned by caller, releasing"
                );
                if let Err(e) = coordinator.release_group(group).await {
                    error!(error = %e, "failed to release abandoned reservation");
                }
            }
        });

        rx.await
            .map_err(|_| SessionError::remote("reserve_group", "reservation task aborted"))?
    }

    /// Release `group` from the registry, then unbind its ports on the
    /// generator. Returns the released ports. Runs to completion even if the
    /// caller is cancelled.
    pub async fn release(&self, group: ReservationGroup) -> Result<Vec<String>> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.release_group(group).await })
            .await
            .map_err(|e| SessionError::remote("release_group", e))?
    }

    async fn reserve_and_bind(&self, ordered_ports: Vec<String>) -> Result<ReservationGroup> {
        let group_id = self
            .registry
            .reserve_group(&self.reservation_id, &ordered_ports)
            .await?;
        info!(
            reservation_id = %self.reservation_id,
            group_id,
            ports = ?ordered_ports,
            "registry group granted"
        );

        if let Err(err) = self.generator.bind_port_group(group_id, &ordered_ports).await {
            warn!(group_id, error = %err, "generator bind failed, releasing registry group");
            self.release_registry_group(group_id).await;
            return Err(err);
        }

        info!(group_id, "port group bound on generator");
        Ok(ReservationGroup {
            group_id,
            ordered_ports,
        })
    }

    async fn release_group(&self, group: ReservationGroup) -> Result<Vec<String>> {
        let released = match self.registry.release_group(&self.reservation_id).await {
            Ok(released) => released,
            Err(err) => {
                error!(
                    group_id = group.group_id,
                    error = %err,
                    "registry release failed, unbinding generator ports anyway"
                );
                if let Err(e) = self.generator.unbind_ports(&group.ordered_ports).await {
                    error!(group_id = group.group_id, error = %e, "generator unbind failed");
                }
                return Err(err);
            }
        };
        if released != group.ordered_ports {
            warn!(
                group_id = group.group_id,
                expected = ?group.ordered_ports,
                released = ?released,
                "registry released a different port set than was reserved"
            );
        }
        self.generator.unbind_ports(&released).await?;
        info!(group_id = group.group_id, ports = ?released, "reservation released");
        Ok(released)
    }

    /// Compensation path: failures are logged, never returned, so the
    /// caller's original error is what propagates.
    async fn release_registry_group(&self, group_id: u32) {
        match self.registry.release_group(&self.reservation_id).await {
            Ok(ports) => info!(group_id, ports = ?ports, "registry group released"),
            Err(e) => error!(group_id, error = %e, "failed to release registry group"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::fake::FakeGenerator;
    use crate::registry::GroupRegistry;
    use std::time::Duration;

    fn ports(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn setup() -> (Arc<GroupRegistry>, Arc<FakeGenerator>, ReservationCoordinator) {
        let registry = Arc::new(GroupRegistry::default());
        let generator = Arc::new(FakeGenerator::default());
        let coordinator = ReservationCoordinator::new("res-1", registry.clone(), generator.clone());
        (registry, generator, coordinator)
    }

    #[tokio::test]
    async fn reserve_binds_the_same_group_on_the_generator() {
        let (registry, generator, coordinator) = setup();
        let group = coordinator.reserve(&ports(&["1/0", "1/1"])).await.unwrap();

        assert_eq!(group.group_id, 1);
        assert_eq!(registry.group_count().await, 1);
        assert_eq!(generator.calls(), vec!["bind_port_group 1 1/0,1/1"]);
    }

    #[tokio::test]
    async fn generator_bind_failure_releases_registry_group() {
        let (registry, generator, coordinator) = setup();
        generator.fail("bind_port_group");

        let err = coordinator.reserve(&ports(&["1/0"])).await.unwrap_err();
        assert!(err.to_string().starts_with("bind_port_group failed"));
        assert_eq!(registry.group_count().await, 0);
    }

    #[tokio::test]
    async fn registry_rejection_never_reaches_generator() {
        let (registry, generator, coordinator) = setup();
        registry.reserve_group("other", &ports(&["1/0"])).await.unwrap();

        assert!(coordinator.reserve(&ports(&["1/0"])).await.is_err());
        assert!(!generator.called("bind_port_group"));
        assert_eq!(registry.group_count().await, 1);
    }

    #[tokio::test]
    async fn release_unbinds_released_ports() {
        let (registry, generator, coordinator) = setup();
        let group = coordinator.reserve(&ports(&["1/1", "1/0"])).await.unwrap();

        let released = coordinator.release(group).await.unwrap();
        assert_eq!(released, ports(&["1/1", "1/0"]));
        assert_eq!(registry.group_count().await, 0);
        assert!(generator.calls().contains(&"unbind_ports 1/1,1/0".to_string()));
    }

    #[tokio::test]
    async fn release_keeps_registry_released_when_unbind_fails() {
        let (registry, generator, coordinator) = setup();
        let group = coordinator.reserve(&ports(&["1/0"])).await.unwrap();
        generator.fail("unbind_ports");

        assert!(coordinator.release(group).await.is_err());
        assert_eq!(registry.group_count().await, 0);
    }

    #[tokio::test]
    async fn cancelled_reserve_releases_its_group() {
        let (registry, generator, coordinator) = setup();
        *generator.bind_delay.lock().unwrap() = Duration::from_millis(200);

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            coordinator.reserve(&ports(&["1/0", "1/1"])),
        )
        .await;
        assert!(outcome.is_err());

        // The handshake finishes on its own task and hands the group back.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(registry.group_count().await, 0);
        assert!(generator.calls().contains(&"unbind_ports 1/0,1/1".to_string()));

        *generator.bind_delay.lock().unwrap() = Duration::ZERO;
        assert!(coordinator.reserve(&ports(&["1/0", "1/1"])).await.is_ok());
    }

    #[tokio::test]
    async fn registry_release_failure_still_unbinds_generator_ports() {
        let (registry, generator, coordinator) = setup();
        let group = coordinator.reserve(&ports(&["1/0", "1/1"])).await.unwrap();
        registry.release_group("res-1").await.unwrap();

        let err = coordinator.release(group).await.unwrap_err();
        assert!(err.to_string().contains("holds no group"));
        assert!(generator.calls().contains(&"unbind_ports 1/0,1/1".to_string()));
    }

    #[tokio::test]
    async fn static_details_return_configured_table() {
        let table: ReservedPortTable = [("1/0".to_string(), "L1".to_string())].into();
        let details = StaticReservationDetails::new(table.clone());
        assert_eq!(details.reserved_ports().await.unwrap(), table);
    }
}
