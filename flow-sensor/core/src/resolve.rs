use crate::{Endpoint, Entity};
use parking_lot::RwLock;
use std::sync::Arc;

/// A candidate entity for a remote endpoint, along with the ports on that entity the endpoint may
/// refer to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointMatch {
    pub entity: Entity,
    pub ports: Vec<u16>,
}

/// Resolves collector-reported identifiers against a cache of cluster state.
///
/// Implementations are read-only from the caller's perspective and must be internally
/// consistent.
pub trait ResolveEntities {
    /// Returns the id of the deployment that owns the given (normalized) container id.
    fn resolve_container(&self, container_id: &str) -> Option<String>;

    /// Returns every entity the remote endpoint may belong to. An empty result means the
    /// endpoint is not (yet) known.
    fn resolve_endpoint(&self, endpoint: &Endpoint) -> Vec<EndpointMatch>;
}

impl<T: ResolveEntities> ResolveEntities for Arc<RwLock<T>> {
    fn resolve_container(&self, container_id: &str) -> Option<String> {
        self.read().resolve_container(container_id)
    }

    fn resolve_endpoint(&self, endpoint: &Endpoint) -> Vec<EndpointMatch> {
        self.read().resolve_endpoint(endpoint)
    }
}
