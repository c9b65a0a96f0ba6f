//! Physical reservation registry.
//!
//! The registry is the system of record for which physical ports belong to
//! which reservation group. [`GroupRegistry`] is the in-process
//! implementation: one group per reservation id, group ids drawn from a
//! fixed pool, conflicting port requests rejected.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};

/// Port groups a generator chassis exposes.
pub const DEFAULT_GROUP_CAPACITY: u32 = 12;

#[async_trait]
pub trait ReservationRegistry: Send + Sync {
    /// Reserve `ordered_ports` as one group for `reservation_id`.
    async fn reserve_group(&self, reservation_id: &str, ordered_ports: &[String]) -> Result<u32>;

    /// Release the group held by `reservation_id`, returning its ports in
    /// reservation order.
    async fn release_group(&self, reservation_id: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
struct GroupEntry {
    group_id: u32,
    ports: Vec<String>,
}

#[derive(Default)]
struct RegistryInner {
    /// Reservation id -> its group.
    groups: BTreeMap<String, GroupEntry>,
    /// Port -> reservation id currently holding it.
    holders: BTreeMap<String, String>,
}

pub struct GroupRegistry {
    inner: RwLock<RegistryInner>,
    capacity: u32,
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_GROUP_CAPACITY)
    }
}

impl GroupRegistry {
    pub fn new(capacity: u32) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            capacity,
        }
    }

    /// Number of groups currently reserved.
    pub async fn group_count(&self) -> usize {
        self.inner.read().await.groups.len()
    }
}

#[cfg(test)]
impl GroupRegistry {
    pub async fn group_of(&self, reservation_id: &str) -> Option<u32> {
        self.inner
            .read()
            .await
            .groups
            .get(reservation_id)
            .map(|g| g.group_id)
    }
}

#[async_trait]
impl ReservationRegistry for GroupRegistry {
    async fn reserve_group(&self, reservation_id: &str, ordered_ports: &[String]) -> Result<u32> {
        const OP: &str = "reserve_group";
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.groups.get(reservation_id) {
            return Err(SessionError::remote(
                OP,
                format!(
                    "reservation {} already holds group {}",
                    reservation_id, existing.group_id
                ),
            ));
        }

        let mut seen = BTreeSet::new();
        for port in ordered_ports {
            if !seen.insert(port) {
                return Err(SessionError::remote(
                    OP,
                    format!("port {} requested twice", port),
                ));
            }
            if let Some(holder) = inner.holders.get(port) {
                warn!(port = %port, holder = %holder, reservation_id, "port conflict");
                return Err(SessionError::remote(
                    OP,
                    format!("port {} is held by reservation {}", port, holder),
                ));
            }
        }

        let used: BTreeSet<u32> = inner.groups.values().map(|g| g.group_id).collect();
        let group_id = (1..=self.capacity)
            .find(|id| !used.contains(id))
            .ok_or_else(|| {
                SessionError::remote(OP, format!("all {} port groups are in use", self.capacity))
            })?;

        for port in ordered_ports {
            inner.holders.insert(port.clone(), reservation_id.to_string());
        }
        inner.groups.insert(
            reservation_id.to_string(),
            GroupEntry {
                group_id,
                ports: ordered_ports.to_vec(),
            },
        );

        info!(reservation_id, group_id, ports = ?ordered_ports, "group reserved");
        Ok(group_id)
    }

    async fn release_group(&self, reservation_id: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.write().await;
        let entry = inner.groups.remove(reservation_id).ok_or_else(|| {
            SessionError::remote(
                "release_group",
                format!("reservation {} holds no group", reservation_id),
            )
        })?;
        for port in &entry.ports {
            inner.holders.remove(port);
        }
        debug!(reservation_id, group_id = entry.group_id, "group released");
        Ok(entry.ports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn reserve_and_release_preserve_order() {
        let registry = GroupRegistry::default();
        let group = registry
            .reserve_group("res-1", &ports(&["1/1", "1/0"]))
            .await
            .unwrap();
        assert_eq!(group, 1);
        assert_eq!(registry.group_count().await, 1);
        assert_eq!(registry.group_of("res-1").await, Some(1));

        let released = registry.release_group("res-1").await.unwrap();
        assert_eq!(released, ports(&["1/1", "1/0"]));
        assert_eq!(registry.group_count().await, 0);
    }

    #[tokio::test]
    async fn conflicting_port_is_rejected() {
        let registry = GroupRegistry::default();
        registry.reserve_group("res-1", &ports(&["1/0"])).await.unwrap();

        let err = registry
            .reserve_group("res-2", &ports(&["1/1", "1/0"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("held by reservation res-1"));
        assert_eq!(registry.group_count().await, 1);

        // Nothing from the rejected request leaked into the port table.
        registry.release_group("res-1").await.unwrap();
        registry.reserve_group("res-3", &ports(&["1/1"])).await.unwrap();
    }

    #[tokio::test]
    async fn one_group_per_reservation() {
        let registry = GroupRegistry::default();
        registry.reserve_group("res-1", &ports(&["1/0"])).await.unwrap();
        assert!(registry.reserve_group("res-1", &ports(&["1/1"])).await.is_err());
    }

    #[tokio::test]
    async fn group_ids_are_reused_after_release() {
        let registry = GroupRegistry::default();
        assert_eq!(registry.reserve_group("a", &ports(&["1/0"])).await.unwrap(), 1);
        assert_eq!(registry.reserve_group("b", &ports(&["1/1"])).await.unwrap(), 2);
        registry.release_group("a").await.unwrap();
        assert_eq!(registry.reserve_group("c", &ports(&["1/2"])).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let registry = GroupRegistry::new(1);
        registry.reserve_group("a", &ports(&["1/0"])).await.unwrap();
        let err = registry.reserve_group("b", &ports(&["1/1"])).await.unwrap_err();
        assert!(err.to_string().contains("all 1 port groups are in use"));
    }

    #[tokio::test]
    async fn releasing_unknown_reservation_is_an_error() {
        let registry = GroupRegistry::default();
        assert!(registry.release_group("nobody").await.is_err());
    }

    #[tokio::test]
    async fn duplicate_port_in_request_is_rejected() {
        let registry = GroupRegistry::default();
        assert!(registry
            .reserve_group("a", &ports(&["1/0", "1/0"]))
            .await
            .is_err());
        assert_eq!(registry.group_count().await, 0);
    }
}
