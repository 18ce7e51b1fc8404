//! Cluster topology boundary
//!
//! Replica-set grouping needs to know which nodes own a partition. That
//! knowledge lives in the driver's metadata, outside this crate, so it is
//! modeled as the [`ReplicaLocator`] trait. [`StaticTopology`] is a
//! table-driven implementation for tests and fixed deployments.

use crate::statement::{RoutingKey, Token};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// The set of nodes owning a partition, identified by node id
///
/// An ordered set, so two lookups returning the same nodes compare (and
/// hash) equal regardless of discovery order.
pub type ReplicaSet = BTreeSet<String>;

/// Resolves routing information to the set of owning replicas
///
/// Implementations must be cheap and non-blocking: lookups run on the
/// batching path, which performs no I/O.
pub trait ReplicaLocator: Send + Sync {
    /// Replicas owning the partition identified by `key`, if known
    fn replicas_for_key(&self, key: &RoutingKey) -> Option<ReplicaSet>;

    /// Replicas owning the token range containing `token`, if known
    fn replicas_for_token(&self, token: Token) -> Option<ReplicaSet>;
}

/// A fixed replica map
#[derive(Debug, Default, Clone)]
pub struct StaticTopology {
    by_key: HashMap<RoutingKey, ReplicaSet>,
    by_token: BTreeMap<Token, ReplicaSet>,
}

impl StaticTopology {
    /// Create an empty topology (every lookup misses)
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a routing key to its replicas
    pub fn with_key<I, S>(mut self, key: impl Into<RoutingKey>, replicas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.by_key
            .insert(key.into(), replicas.into_iter().map(Into::into).collect());
        self
    }

    /// Map a token to its replicas
    pub fn with_token<I, S>(mut self, token: Token, replicas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.by_token
            .insert(token, replicas.into_iter().map(Into::into).collect());
        self
    }
}

impl ReplicaLocator for StaticTopology {
    fn replicas_for_key(&self, key: &RoutingKey) -> Option<ReplicaSet> {
        self.by_key.get(key).cloned()
    }

    fn replicas_for_token(&self, token: Token) -> Option<ReplicaSet> {
        self.by_token.get(&token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_static_topology_lookup() {
        let topo = StaticTopology::new()
            .with_key(&b"k1"[..], ["node-1", "node-2"])
            .with_token(Token(100), ["node-3"]);

        let replicas = topo.replicas_for_key(&Bytes::from_static(b"k1")).unwrap();
        assert_eq!(replicas.len(), 2);
        assert!(replicas.contains("node-1"));

        let replicas = topo.replicas_for_token(Token(100)).unwrap();
        assert!(replicas.contains("node-3"));

        assert!(topo.replicas_for_key(&Bytes::from_static(b"miss")).is_none());
        assert!(topo.replicas_for_token(Token(0)).is_none());
    }

    #[test]
    fn test_replica_set_order_independent_equality() {
        let a: ReplicaSet = ["n2", "n1"].iter().map(|s| s.to_string()).collect();
        let b: ReplicaSet = ["n1", "n2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(a, b);
    }
}
