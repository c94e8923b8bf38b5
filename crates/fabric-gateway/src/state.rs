//! Shared state handed to every gateway request handler via axum's
//! `State` extractor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fabric_core::Connector;

use crate::config::GatewayConfig;

struct Inner {
    connector: Connector,
    config: GatewayConfig,
    in_flight_bytes: AtomicUsize,
}

/// Cheap to clone; every clone shares the same admission-control counter and
/// config, differing only in which external port it was bound for.
#[derive(Clone)]
pub struct GatewayState {
    inner: Arc<Inner>,
    external_port: u16,
}

impl GatewayState {
    /// Builds gateway state bound to the first port in `config.ports` (or
    /// `0` if none are configured); call [`GatewayState::for_port`] to get a
    /// copy bound to one of the other configured ports.
    pub fn new(connector: Connector, config: GatewayConfig) -> Self {
        let external_port = config.ports.first().copied().unwrap_or(0);
        GatewayState {
            inner: Arc::new(Inner {
                connector,
                config,
                in_flight_bytes: AtomicUsize::new(0),
            }),
            external_port,
        }
    }

    /// A clone of this state bound to a different external port, sharing
    /// the same connector, config, and admission-control counter.
    pub fn for_port(&self, external_port: u16) -> Self {
        GatewayState {
            inner: self.inner.clone(),
            external_port,
        }
    }

    pub fn connector(&self) -> &Connector {
        &self.inner.connector
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn external_port(&self) -> u16 {
        self.external_port
    }

    /// Tries to admit `bytes` more request body under the configured memory
    /// limit. Returns a guard that releases the reservation on drop, or
    /// `None` if admitting it would exceed the limit.
    pub fn try_admit(&self, bytes: usize) -> Option<AdmissionGuard> {
        let limit = self.inner.config.request_memory_limit_bytes;
        let mut current = self.inner.in_flight_bytes.load(Ordering::Acquire);
        loop {
            let next = current.checked_add(bytes)?;
            if next > limit {
                return None;
            }
            match self.inner.in_flight_bytes.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(AdmissionGuard {
                        inner: self.inner.clone(),
                        bytes,
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }
}

/// Releases its byte reservation when dropped, regardless of how the
/// request handler exits (success, error, or an early return on a blocked
/// path that never reserved in the first place — see the handler).
pub struct AdmissionGuard {
    inner: Arc<Inner>,
    bytes: usize,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.inner
            .in_flight_bytes
            .fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_bus::InProcBus;
    use std::sync::Arc as StdArc;

    fn state(limit_bytes: usize) -> GatewayState {
        let connector = Connector::new("gw", StdArc::new(InProcBus::new()));
        let mut config = GatewayConfig::default();
        config.request_memory_limit_bytes = limit_bytes;
        GatewayState::new(connector, config)
    }

    #[test]
    fn admits_requests_under_the_limit() {
        let s = state(100);
        let guard = s.try_admit(50);
        assert!(guard.is_some());
    }

    #[test]
    fn refuses_a_request_that_would_exceed_the_limit() {
        let s = state(100);
        let _a = s.try_admit(80).unwrap();
        assert!(s.try_admit(50).is_none());
    }

    #[test]
    fn dropping_a_guard_releases_its_reservation() {
        let s = state(100);
        {
            let _a = s.try_admit(80).unwrap();
            assert!(s.try_admit(50).is_none());
        }
        assert!(s.try_admit(50).is_some());
    }

    #[test]
    fn for_port_shares_the_same_admission_counter() {
        let s = state(100);
        let s443 = s.for_port(443);
        let _a = s.try_admit(80).unwrap();
        assert!(s443.try_admit(50).is_none());
    }
}
