//! Port binding resolution.
//!
//! Maps a descriptor's logical interfaces onto physical ports the
//! infrastructure has reserved for this session. Pure: the topology and the
//! reserved-port table are fetched by the caller.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Result, SessionError};
use crate::topology::TopologyMap;

/// Physical port id -> logical port name, as reserved by the infrastructure.
pub type ReservedPortTable = BTreeMap<String, String>;

/// One resolved interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortBinding {
    pub interface: u32,
    pub port: String,
    pub logical_name: String,
}

/// Resolved bindings in ascending interface order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BindingPlan {
    pub bindings: Vec<PortBinding>,
}

impl BindingPlan {
    /// Physical ports in ascending interface order. Downstream group binding
    /// on the generator is positional, so this order must be preserved.
    pub fn ordered_ports(&self) -> Vec<String> {
        self.bindings.iter().map(|b| b.port.clone()).collect()
    }

    pub fn interfaces(&self) -> Vec<u32> {
        self.bindings.iter().map(|b| b.interface).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Resolve `interfaces` against `topology` and `reserved`.
///
/// Interfaces are de-duplicated and walked in ascending order. The first
/// interface that is missing from the topology, or whose port is not in the
/// reserved table, fails the whole resolution.
pub fn resolve(
    interfaces: &[u32],
    topology: &TopologyMap,
    reserved: &ReservedPortTable,
) -> Result<BindingPlan> {
    let mut sorted = interfaces.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut bindings = Vec::with_capacity(sorted.len());
    for interface in sorted {
        let port = topology.get(&interface).ok_or_else(|| SessionError::Binding {
            interface,
            reason: "interface is not part of the test network".to_string(),
        })?;
        let logical_name = reserved.get(port).ok_or_else(|| SessionError::Binding {
            interface,
            reason: format!("cannot find port {} in the reservation", port),
        })?;
        bindings.push(PortBinding {
            interface,
            port: port.clone(),
            logical_name: logical_name.clone(),
        });
    }

    Ok(BindingPlan { bindings })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology(entries: &[(u32, &str)]) -> TopologyMap {
        entries.iter().map(|(n, p)| (*n, p.to_string())).collect()
    }

    fn reserved(entries: &[(&str, &str)]) -> ReservedPortTable {
        entries
            .iter()
            .map(|(p, l)| (p.to_string(), l.to_string()))
            .collect()
    }

    #[test]
    fn binds_in_ascending_interface_order() {
        let plan = resolve(
            &[2, 1, 3],
            &topology(&[(1, "P1"), (2, "P2"), (3, "P3")]),
            &reserved(&[("P1", "L1"), ("P2", "L2"), ("P3", "L3")]),
        )
        .unwrap();

        assert_eq!(plan.ordered_ports(), vec!["P1", "P2", "P3"]);
        assert_eq!(plan.interfaces(), vec![1, 2, 3]);
        assert_eq!(plan.bindings[1].logical_name, "L2");
    }

    #[test]
    fn order_follows_interface_number_not_port_name() {
        let plan = resolve(
            &[1, 2],
            &topology(&[(1, "2/0"), (2, "1/0")]),
            &reserved(&[("1/0", "a"), ("2/0", "b")]),
        )
        .unwrap();
        assert_eq!(plan.ordered_ports(), vec!["2/0", "1/0"]);
    }

    #[test]
    fn duplicate_interfaces_bind_once() {
        let plan = resolve(
            &[1, 1, 2],
            &topology(&[(1, "P1"), (2, "P2")]),
            &reserved(&[("P1", "L1"), ("P2", "L2")]),
        )
        .unwrap();
        assert_eq!(plan.ordered_ports(), vec!["P1", "P2"]);
    }

    #[test]
    fn missing_topology_entry_fails_on_that_interface() {
        let err = resolve(
            &[1, 2, 3],
            &topology(&[(1, "P1"), (3, "P3")]),
            &reserved(&[("P1", "L1"), ("P3", "L3")]),
        )
        .unwrap_err();

        match err {
            SessionError::Binding { interface, .. } => assert_eq!(interface, 2),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn unreserved_port_fails_even_if_later_interfaces_resolve() {
        let err = resolve(
            &[1, 2],
            &topology(&[(1, "P1"), (2, "P2")]),
            &reserved(&[("P2", "L2")]),
        )
        .unwrap_err();

        assert!(matches!(err, SessionError::Binding { interface: 1, .. }));
        assert!(err.to_string().contains("cannot find port P1 in the reservation"));
    }

    #[test]
    fn empty_topology_fails_any_interface() {
        let err = resolve(&[1], &TopologyMap::new(), &reserved(&[("P1", "L1")])).unwrap_err();
        assert!(matches!(err, SessionError::Binding { interface: 1, .. }));
    }

    #[test]
    fn no_interfaces_is_an_empty_plan() {
        let plan = resolve(&[], &TopologyMap::new(), &ReservedPortTable::new()).unwrap();
        assert!(plan.is_empty());
        assert!(plan.ordered_ports().is_empty());
    }
}
