//! Process-wide backend registry.
//!
//! # Responsibilities
//! - Share one `Backend` between every director configured with the same
//!   name and address
//! - Reclaim a backend once its reference count reaches zero
//!
//! # Design Decisions
//! - Additions and reclamation happen from administrative code paths;
//!   request tasks only ever hold `Arc<Backend>` clones
//! - Cheap to clone: the map lives behind an `Arc`

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;

use crate::backend::{Backend, BackendKey, BackendStatus};
use crate::net::pool::PoolFactory;

#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    inner: Arc<DashMap<BackendKey, Arc<Backend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find or create the backend for `name`/`addr` and bind a reference
    /// to it for the caller.
    pub fn add_backend(&self, name: &str, addr: SocketAddr, pools: &dyn PoolFactory) -> Arc<Backend> {
        let key = BackendKey {
            name: name.to_string(),
            addr,
        };
        let backend = self
            .inner
            .entry(key)
            .or_insert_with(|| {
                tracing::info!(backend = %name, addr = %addr, "Backend created");
                Arc::new(Backend::new(name, addr, pools.create(name, addr)))
            })
            .value()
            .clone();
        backend.bind();
        backend
    }

    /// Remove `backend` if nothing references it any more.
    /// Returns true when it was removed.
    pub fn reclaim(&self, backend: &Arc<Backend>) -> bool {
        let removed = self
            .inner
            .remove_if(backend.key(), |_, current| {
                Arc::ptr_eq(current, backend) && current.refcount() == 0
            })
            .is_some();
        if removed {
            tracing::info!(backend = %backend.key(), "Backend reclaimed");
        }
        removed
    }

    pub fn get(&self, name: &str, addr: SocketAddr) -> Option<Arc<Backend>> {
        let key = BackendKey {
            name: name.to_string(),
            addr,
        };
        self.inner.get(&key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Status of every registered backend, sorted by name.
    pub fn status(&self) -> Vec<BackendStatus> {
        let mut statuses: Vec<_> = self.inner.iter().map(|entry| entry.value().status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.address.cmp(&b.address)));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::pool::TcpPoolFactory;
    use std::time::Duration;

    #[test]
    fn test_shared_backend_and_reclaim() {
        let registry = BackendRegistry::new();
        let pools = TcpPoolFactory::new(Duration::from_secs(60));
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();

        let a = registry.add_backend("web", addr, &pools);
        let b = registry.add_backend("web", addr, &pools);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.refcount(), 2);
        assert_eq!(registry.len(), 1);

        let other = registry.add_backend("web", "127.0.0.1:8081".parse().unwrap(), &pools);
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(registry.len(), 2);

        a.unbind();
        assert!(!registry.reclaim(&a), "still referenced");
        b.unbind();
        assert!(registry.reclaim(&b));
        assert!(registry.get("web", addr).is_none());
        assert_eq!(registry.len(), 1);
    }
}
