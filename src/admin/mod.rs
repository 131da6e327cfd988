//! Administrative control of directors.
//!
//! # Data Flow
//! ```text
//! Admin::lock() → AdminContext (exclusive)
//!     → construct / attach_health_probing   (build new directors)
//!     → publish DirectorTable               (ArcSwap, request tasks never block)
//!     → detach_health_probing + retire      (previous table)
//!     → discard_retired                     (destroy once unreferenced)
//! ```
//!
//! # Design Decisions
//! - Every administrative operation runs under one mutex; request tasks
//!   only ever load the published table
//! - Retired directors are destroyed lazily, when no request task still
//!   holds them

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::backend::{BackendRegistry, BackendStatus};
use crate::config::BackendConfig;
use crate::director::{BackendDirector, Services};
use crate::observability::MainStatsSnapshot;

pub mod table;

pub use table::DirectorTable;

#[derive(Debug, Default)]
struct AdminState {
    generation: u64,
    retired: Vec<Arc<BackendDirector>>,
}

/// Owner of the backend registry and the published director table.
#[derive(Debug)]
pub struct Admin {
    state: Mutex<AdminState>,
    registry: BackendRegistry,
    services: Services,
    table: ArcSwap<DirectorTable>,
}

impl Admin {
    pub fn new(services: Services) -> Self {
        Self {
            state: Mutex::new(AdminState::default()),
            registry: BackendRegistry::new(),
            services,
            table: ArcSwap::from_pointee(DirectorTable::default()),
        }
    }

    /// Enter the exclusive administrative context.
    pub fn lock(&self) -> AdminContext<'_> {
        AdminContext {
            admin: self,
            state: self.state.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Look up a published director. Lock-free.
    pub fn director(&self, name: &str) -> Option<Arc<BackendDirector>> {
        self.table.load().get(name).cloned()
    }

    /// Current table snapshot.
    pub fn table(&self) -> Arc<DirectorTable> {
        self.table.load_full()
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn status(&self) -> AdminStatus {
        let table = self.table.load();
        AdminStatus {
            generation: table.generation(),
            directors: table.names().map(str::to_string).collect(),
            retired: self.lock().retired(),
            backends: self.registry.status(),
            stats: self.services.stats.snapshot(),
        }
    }
}

/// Serializable overview for status reports.
#[derive(Debug, Clone, Serialize)]
pub struct AdminStatus {
    pub generation: u64,
    pub directors: Vec<String>,
    pub retired: usize,
    pub backends: Vec<BackendStatus>,
    pub stats: MainStatsSnapshot,
}

/// Exclusive administrative context. Held for the duration of one
/// administrative operation.
pub struct AdminContext<'a> {
    admin: &'a Admin,
    state: MutexGuard<'a, AdminState>,
}

impl AdminContext<'_> {
    /// Build a director bound to the shared backend for `config`.
    pub fn construct(&mut self, config: BackendConfig) -> Arc<BackendDirector> {
        Arc::new(BackendDirector::construct(config, &self.admin.registry, &self.admin.services))
    }

    /// Unregister the probe and drop the director's backend binding. No
    /// request may still hold a connection of `director`.
    pub fn destroy(&mut self, director: &BackendDirector) {
        director.teardown();
    }

    pub fn attach_health_probing(&mut self, director: &BackendDirector) {
        director.attach_health_probing();
    }

    pub fn detach_health_probing(&mut self, director: &BackendDirector) {
        director.detach_health_probing();
    }

    /// Build and publish a director per config, retiring the previous set.
    pub fn load(&mut self, configs: Vec<BackendConfig>) -> Arc<DirectorTable> {
        let directors: Vec<_> = configs
            .into_iter()
            .map(|config| {
                let director = self.construct(config);
                self.attach_health_probing(&director);
                director
            })
            .collect();

        self.state.generation += 1;
        let table = Arc::new(DirectorTable::new(self.state.generation, directors));
        let previous = self.admin.table.swap(table.clone());

        for director in previous.iter() {
            self.detach_health_probing(director);
            self.state.retired.push(director.clone());
        }
        tracing::info!(
            generation = table.generation(),
            directors = table.len(),
            retired = self.state.retired.len(),
            "Director table published"
        );
        table
    }

    /// Destroy retired directors no request task references any more.
    /// Returns how many were destroyed.
    pub fn discard_retired(&mut self) -> usize {
        let (idle, busy): (Vec<_>, Vec<_>) = std::mem::take(&mut self.state.retired)
            .into_iter()
            .partition(|director| Arc::strong_count(director) == 1);
        self.state.retired = busy;

        let discarded = idle.len();
        for director in idle {
            director.teardown();
        }
        if discarded > 0 {
            tracing::debug!(discarded, remaining = self.state.retired.len(), "Retired directors discarded");
        }
        discarded
    }

    pub fn retired(&self) -> usize {
        self.state.retired.len()
    }
}
