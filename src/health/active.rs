//! Active health probing.
//!
//! # Responsibilities
//! - Periodically probe registered backends
//! - Keep a sliding window of results per backend
//! - Publish the windowed verdict through `Backend::set_probe_health`
//!
//! # Design Decisions
//! - One polling task per backend, shared by every director bound to it
//! - Registration seeds health from `initial` so a fresh backend is not
//!   used before the window can vouch for it

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::backend::{Backend, BackendKey};
use crate::config::ProbeConfig;
use crate::health::HealthProbe;
use crate::resilience::timeouts::within;

/// Last `size` probe results, newest in bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeWindow {
    bits: u64,
    size: u32,
}

impl ProbeWindow {
    /// Window pre-filled with `initial` good results.
    pub fn new(size: u32, initial: u32) -> Self {
        let size = size.clamp(1, 64);
        let mut window = Self { bits: 0, size };
        window.bits = window.mask_of(initial.min(size));
        window
    }

    fn mask_of(&self, n: u32) -> u64 {
        if n >= 64 {
            u64::MAX
        } else {
            (1u64 << n) - 1
        }
    }

    pub fn record(&mut self, good: bool) {
        self.bits = ((self.bits << 1) | u64::from(good)) & self.mask_of(self.size);
    }

    pub fn good(&self) -> u32 {
        self.bits.count_ones()
    }
}

#[derive(Debug)]
struct ProbeEntry {
    users: usize,
    spec: ProbeConfig,
    host_header: Option<String>,
    task: Option<JoinHandle<()>>,
}

/// Default probe subsystem: TCP connect, optionally followed by a GET.
#[derive(Debug, Default)]
pub struct ActiveProber {
    probes: DashMap<BackendKey, ProbeEntry>,
}

impl ActiveProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of backends currently registered.
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn is_running(&self, backend: &Backend) -> bool {
        self.probes
            .get(backend.key())
            .map(|entry| entry.task.is_some())
            .unwrap_or(false)
    }
}

impl HealthProbe for ActiveProber {
    fn register(&self, backend: &Arc<Backend>, spec: &ProbeConfig, host_header: Option<&str>) {
        let mut entry = self.probes.entry(backend.key().clone()).or_insert_with(|| {
            let seeded = spec.initial() >= spec.threshold;
            backend.set_probe_health(seeded);
            tracing::debug!(backend = %backend.key(), healthy = seeded, "Probe registered");
            ProbeEntry {
                users: 0,
                spec: spec.clone(),
                host_header: host_header.map(str::to_string),
                task: None,
            }
        });
        entry.users += 1;
    }

    fn start(&self, backend: &Arc<Backend>, _spec: &ProbeConfig) {
        let Some(mut entry) = self.probes.get_mut(backend.key()) else {
            tracing::warn!(backend = %backend.key(), "Probe start without registration");
            return;
        };
        if entry.task.is_some() {
            return;
        }
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(backend = %backend.key(), "No runtime available, probe not started");
                return;
            }
        };
        let task = handle.spawn(poll(backend.clone(), entry.spec.clone(), entry.host_header.clone()));
        entry.task = Some(task);
        tracing::info!(
            backend = %backend.key(),
            interval_ms = entry.spec.interval_ms,
            url = entry.spec.url.as_deref().unwrap_or("-"),
            "Health probe started"
        );
    }

    fn unregister(&self, backend: &Arc<Backend>, _spec: &ProbeConfig) {
        let removed = self.probes.remove_if_mut(backend.key(), |_, entry| {
            entry.users = entry.users.saturating_sub(1);
            entry.users == 0
        });
        if let Some((key, entry)) = removed {
            if let Some(task) = entry.task {
                task.abort();
            }
            tracing::info!(backend = %key, "Health probe stopped");
        }
    }
}

impl Drop for ActiveProber {
    fn drop(&mut self) {
        for entry in self.probes.iter() {
            if let Some(task) = &entry.task {
                task.abort();
            }
        }
    }
}

async fn poll(backend: Arc<Backend>, spec: ProbeConfig, host_header: Option<String>) {
    let mut window = ProbeWindow::new(spec.window, spec.initial());
    let mut ticker = time::interval(spec.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let host = host_header.unwrap_or_else(|| backend.addr().to_string());

    loop {
        ticker.tick().await;
        let good = probe_once(backend.addr(), &spec, &host).await;
        window.record(good);
        tracing::trace!(backend = %backend.key(), good, window = window.good(), "Probe result");
        backend.set_probe_health(window.good() >= spec.threshold);
    }
}

async fn probe_once(addr: SocketAddr, spec: &ProbeConfig, host: &str) -> bool {
    let attempt = async {
        let mut stream = TcpStream::connect(addr).await.ok()?;
        let Some(url) = spec.url.as_deref() else {
            return Some(true);
        };
        let request = format!(
            "GET {url} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\nUser-Agent: backend-director-probe\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await.ok()?;

        let mut buf = Vec::with_capacity(256);
        let mut chunk = [0u8; 512];
        while !buf.contains(&b'\n') && buf.len() < 1024 {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        Some(parse_status_line(&buf)? == spec.expected_response)
    };
    within(spec.timeout(), attempt).await.flatten().unwrap_or(false)
}

fn parse_status_line(buf: &[u8]) -> Option<u16> {
    let line = buf.split(|&b| b == b'\n').next()?;
    let mut parts = std::str::from_utf8(line).ok()?.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::pool::TcpPool;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn backend(addr: SocketAddr) -> Arc<Backend> {
        Arc::new(Backend::new("probed", addr, Arc::new(TcpPool::new(addr, Duration::from_secs(60)))))
    }

    fn fast_probe() -> ProbeConfig {
        ProbeConfig {
            interval_ms: 20,
            timeout_ms: 500,
            window: 1,
            threshold: 1,
            ..ProbeConfig::default()
        }
    }

    async fn wait_for(backend: &Backend, healthy: bool) -> bool {
        for _ in 0..100 {
            if backend.probe_healthy() == healthy {
                return true;
            }
            time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[test]
    fn test_window() {
        let mut w = ProbeWindow::new(4, 2);
        assert_eq!(w.good(), 2);
        w.record(true);
        w.record(true);
        assert_eq!(w.good(), 4);
        w.record(false);
        assert_eq!(w.good(), 3);
        for _ in 0..4 {
            w.record(false);
        }
        assert_eq!(w.good(), 0);

        let full = ProbeWindow::new(64, 64);
        assert_eq!(full.good(), 64);
    }

    #[test]
    fn test_status_line() {
        assert_eq!(parse_status_line(b"HTTP/1.1 503 Busy\r\n"), Some(503));
        assert_eq!(parse_status_line(b"SSH-2.0\r\n"), None);
    }

    #[tokio::test]
    async fn test_register_seeds_health() {
        let prober = ActiveProber::new();
        let b = backend("127.0.0.1:1".parse().unwrap());
        let spec = ProbeConfig {
            initial: Some(0),
            ..fast_probe()
        };

        prober.register(&b, &spec, None);
        prober.register(&b, &spec, None);
        assert!(!b.probe_healthy());
        assert_eq!(prober.len(), 1);

        prober.unregister(&b, &spec);
        assert_eq!(prober.len(), 1, "second user keeps the probe");
        prober.unregister(&b, &spec);
        assert!(prober.is_empty());
    }

    #[tokio::test]
    async fn test_probe_marks_live_backend_healthy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut seen = Vec::new();
                let mut buf = [0u8; 512];
                while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => seen.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = socket.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
            }
        });

        let prober = ActiveProber::new();
        let b = backend(addr);
        let spec = ProbeConfig {
            url: Some("/health".into()),
            initial: Some(0),
            ..fast_probe()
        };
        prober.register(&b, &spec, Some("origin.example"));
        assert!(!b.is_healthy());

        prober.start(&b, &spec);
        assert!(prober.is_running(&b));
        assert!(wait_for(&b, true).await);
        prober.unregister(&b, &spec);
    }

    #[tokio::test]
    async fn test_probe_marks_dead_backend_sick() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = ActiveProber::new();
        let b = backend(addr);
        let spec = ProbeConfig {
            initial: Some(1),
            ..fast_probe()
        };
        prober.register(&b, &spec, None);
        assert!(b.probe_healthy());

        prober.start(&b, &spec);
        assert!(wait_for(&b, false).await);
        prober.unregister(&b, &spec);
    }
}
