//! Director bound to a single backend.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::backend::{Backend, BackendRegistry};
use crate::config::BackendConfig;
use crate::director::{Director, DirectorError, PipeTotals, Services};
use crate::fetch::{BodyFraming, CloseReason, FetchContext, FetchError, HeaderFetch, Transport};
use crate::net::AsyncStream;
use crate::observability::metrics;
use crate::observability::BackendEvent;
use crate::resilience::timeouts::{self, Timeouts};

pub struct BackendDirector {
    name: String,
    config: Arc<BackendConfig>,
    timeouts: Timeouts,
    backend: Arc<Backend>,
    registry: BackendRegistry,
    services: Services,
    probe_registered: AtomicBool,
    torn_down: AtomicBool,
}

impl BackendDirector {
    /// Bind a director to the registry backend for `config`, registering
    /// its probe when one is configured. Administrative path only.
    pub(crate) fn construct(config: BackendConfig, registry: &BackendRegistry, services: &Services) -> Self {
        let backend = registry.add_backend(&config.name, config.address, services.pools.as_ref());
        backend.set_admin_health(config.admin_health);

        let director = Self {
            name: config.name.clone(),
            timeouts: config.timeouts(),
            config: Arc::new(config),
            backend,
            registry: registry.clone(),
            services: services.clone(),
            probe_registered: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        };
        if let Some(spec) = &director.config.probe {
            services
                .probes
                .register(&director.backend, spec, director.config.host_header.as_deref());
            director.probe_registered.store(true, Ordering::Release);
        }

        tracing::info!(
            director = %director.name,
            backend = %director.backend.key(),
            refcount = director.backend.refcount(),
            "Director constructed"
        );
        director
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn is_probe_registered(&self) -> bool {
        self.probe_registered.load(Ordering::Acquire)
    }

    pub(crate) fn attach_health_probing(&self) {
        let Some(spec) = &self.config.probe else {
            return;
        };
        if !self.probe_registered.swap(true, Ordering::AcqRel) {
            self.services
                .probes
                .register(&self.backend, spec, self.config.host_header.as_deref());
        }
        self.services.probes.start(&self.backend, spec);
    }

    pub(crate) fn detach_health_probing(&self) {
        let Some(spec) = &self.config.probe else {
            return;
        };
        if self.probe_registered.swap(false, Ordering::AcqRel) {
            self.services.probes.unregister(&self.backend, spec);
        }
    }

    /// Drop the probe and the binding reference. Idempotent.
    pub(crate) fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.detach_health_probing();
        let remaining = self.backend.unbind();
        tracing::info!(director = %self.name, backend = %self.backend.key(), remaining, "Director destroyed");
        if remaining == 0 {
            self.registry.reclaim(&self.backend);
        }
    }

    fn emit_fetch_error(&self, xid: u64, detail: &str) {
        BackendEvent::FetchError {
            backend: self.backend.display_name(),
            detail,
        }
        .emit(xid);
    }

    /// Acquire a connection without touching the context.
    async fn connect(&self, overrides: &Timeouts, xid: u64) -> Result<Transport, DirectorError> {
        let backend = &self.backend;
        let stats = &self.services.stats;

        if !backend.is_healthy() {
            stats.inc_unhealthy();
            return Err(DirectorError::Unhealthy(backend.display_name().to_string()));
        }

        let max = self.config.max_connections;
        if max > 0 && backend.n_conn() >= max {
            stats.inc_busy();
            return Err(DirectorError::OverCapacity {
                backend: backend.display_name().to_string(),
                max,
            });
        }

        let resolved = timeouts::resolve(overrides, &self.timeouts, &self.services.defaults);
        let conn = match backend.pool().obtain(resolved.connect).await {
            Ok(conn) => conn,
            Err(e) => {
                stats.inc_fail();
                self.emit_fetch_error(xid, &format!("backend {}: fail ({e})", backend.display_name()));
                return Err(DirectorError::ConnectFailed(e));
            }
        };

        backend.take_conn();
        backend.stats().inc_req();
        tracing::debug!(
            xid,
            conn = %conn.id(),
            backend = %backend.key(),
            recycled = conn.is_recycled(),
            "Backend connection acquired"
        );
        Ok(Transport::new(conn, backend.clone(), &resolved))
    }

    /// Hand a connection back to its pool, or close it. A connection with
    /// response bytes left unread is always closed.
    fn release(&self, transport: Transport, do_close: Option<CloseReason>, xid: u64) {
        let do_close = do_close.or_else(|| transport.has_unread().then_some(CloseReason::RespClose));
        let (conn, lease) = transport.into_parts();
        let backend = lease.backend().clone();
        let name = backend.display_name();

        let remaining = match do_close {
            Some(reason) => {
                BackendEvent::Close {
                    conn: conn.id(),
                    backend: name,
                    reason,
                }
                .emit(xid);
                backend.pool().close(conn);
                lease.settle()
            }
            None => {
                BackendEvent::Reuse { conn: conn.id(), backend: name }.emit(xid);
                let (remaining, n_conn) = {
                    let mut counters = backend.lock();
                    self.services.stats.inc_recycle();
                    backend.pool().recycle(conn);
                    let remaining = lease.settle_locked(&mut counters);
                    (remaining, counters.n_conn)
                };
                metrics::record_backend_connections(name, n_conn);
                remaining
            }
        };

        if remaining == 0 {
            self.registry.reclaim(&backend);
        }
    }

    /// Force-close the attached connection after a failed exchange.
    fn abort_fetch(&self, ctx: &mut FetchContext, error: FetchError) -> DirectorError {
        self.emit_fetch_error(ctx.xid(), &error.to_string());
        ctx.do_close = Some(error.close_reason());
        self.finish(ctx);
        ctx.do_close = None;
        DirectorError::Fetch(error)
    }
}

#[async_trait]
impl Director for BackendDirector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_connection(&self, ctx: &mut FetchContext) -> Result<(), DirectorError> {
        if ctx.is_connected() {
            return Err(DirectorError::AlreadyConnected);
        }
        let transport = self.connect(&ctx.timeouts, ctx.xid()).await?;
        ctx.htc = Some(transport);
        Ok(())
    }

    async fn fetch_headers(&self, ctx: &mut FetchContext) -> Result<(), DirectorError> {
        let host_header = self.config.host_header.as_deref();
        let mut retried = false;

        loop {
            if let Err(e) = self.get_connection(ctx).await {
                if e.is_unavailable() {
                    self.emit_fetch_error(ctx.xid(), "no backend connection");
                }
                return Err(e);
            }
            let Some(transport) = ctx.htc.as_mut() else {
                return Err(DirectorError::NotConnected);
            };
            let recycled = transport.is_recycled();

            match self
                .services
                .fetcher
                .fetch_header_block(&ctx.bereq, transport, host_header)
                .await
            {
                HeaderFetch::Received(head) => {
                    let pending = !matches!(head.framing(&ctx.bereq.method), Ok(BodyFraming::None));
                    transport.set_body_pending(pending);
                    if let Some(reason) = head.must_close() {
                        ctx.do_close = Some(reason);
                    }
                    ctx.beresp = Some(head);
                    return Ok(());
                }
                HeaderFetch::NoData if recycled && !retried => {
                    ctx.do_close = Some(CloseReason::RemClose);
                    self.finish(ctx);
                    self.services.stats.inc_retry();
                    ctx.do_close = None;
                    retried = true;
                    tracing::debug!(xid = ctx.xid(), backend = %self.backend.key(), "Retrying stale backend connection");
                }
                HeaderFetch::NoData => return Err(self.abort_fetch(ctx, FetchError::NoResponse)),
                HeaderFetch::Failed(e) => return Err(self.abort_fetch(ctx, e)),
            }
        }
    }

    async fn fetch_body(&self, ctx: &mut FetchContext) -> Result<Vec<u8>, DirectorError> {
        let Some(transport) = ctx.htc.as_mut() else {
            return Err(DirectorError::NotConnected);
        };
        let Some(head) = ctx.beresp.as_ref() else {
            return Err(DirectorError::NotConnected);
        };

        let framing = match head.framing(&ctx.bereq.method) {
            Ok(framing) => framing,
            Err(e) => {
                ctx.do_close = Some(e.close_reason());
                return Err(e.into());
            }
        };

        match self.services.fetcher.fetch_body(transport, framing).await {
            Ok(body) => {
                transport.set_body_pending(false);
                if framing == BodyFraming::Eof {
                    ctx.do_close = Some(CloseReason::RemClose);
                }
                Ok(body)
            }
            Err(e) => {
                self.emit_fetch_error(ctx.xid(), &e.to_string());
                ctx.do_close = Some(e.close_reason());
                Err(e.into())
            }
        }
    }

    fn finish(&self, ctx: &mut FetchContext) {
        if let Some(transport) = ctx.htc.take() {
            self.release(transport, ctx.do_close, ctx.xid());
        }
    }

    fn healthy(&self, _ctx: Option<&FetchContext>) -> (bool, SystemTime) {
        self.backend.healthy()
    }

    async fn pipe(&self, ctx: &mut FetchContext, client: &mut dyn AsyncStream) -> Result<PipeTotals, DirectorError> {
        self.get_connection(ctx).await?;
        let Some(transport) = ctx.htc.as_mut() else {
            return Err(DirectorError::NotConnected);
        };

        let result = match self
            .services
            .fetcher
            .send_request(&ctx.bereq, transport, self.config.host_header.as_deref())
            .await
        {
            Err(e) => Err(DirectorError::Fetch(e)),
            Ok(()) => match tokio::io::copy_bidirectional(client, transport.conn_mut().stream_mut()).await {
                Ok((to_backend, to_client)) => Ok(PipeTotals { to_backend, to_client }),
                Err(e) => Err(DirectorError::Pipe(e)),
            },
        };

        if let Err(e) = &result {
            self.emit_fetch_error(ctx.xid(), &e.to_string());
        }
        ctx.do_close = Some(CloseReason::TxPipe);
        self.finish(ctx);
        result
    }
}

impl Drop for BackendDirector {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for BackendDirector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDirector")
            .field("name", &self.name)
            .field("backend", &self.backend)
            .field("timeouts", &self.timeouts)
            .field("max_connections", &self.config.max_connections)
            .finish_non_exhaustive()
    }
}
