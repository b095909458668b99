//! Position source: single-flight acquisition with a guaranteed fallback.
//!
//! Flow: platform acquisition (bounded by `options.timeout`) → on any failure,
//! the fallback coordinate plus the classified error.

use super::types::{AcquisitionOptions, PositionError, PositionFix, PositionState, FALLBACK_COORDINATE};
use crate::geo::Coordinate;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Platform capability that yields the device's current position.
#[async_trait]
pub trait PositionAcquisition: Send + Sync {
    async fn current_position(&self, options: &AcquisitionOptions) -> Result<Coordinate, PositionError>;
}

type InFlight = Shared<BoxFuture<'static, PositionFix>>;

struct Inner {
    state: PositionState,
    in_flight: Option<InFlight>,
    platform_calls: u64,
}

/// Acquires the user's position. Concurrent requests share one platform call.
pub struct PositionSource {
    acquisition: Arc<dyn PositionAcquisition>,
    options: AcquisitionOptions,
    fallback: Coordinate,
    inner: Arc<Mutex<Inner>>,
}

impl PositionSource {
    pub fn new(acquisition: Arc<dyn PositionAcquisition>) -> Self {
        Self::with_options(acquisition, AcquisitionOptions::default(), FALLBACK_COORDINATE)
    }

    pub fn with_options(
        acquisition: Arc<dyn PositionAcquisition>,
        options: AcquisitionOptions,
        fallback: Coordinate,
    ) -> Self {
        Self {
            acquisition,
            options,
            fallback,
            inner: Arc::new(Mutex::new(Inner {
                state: PositionState::Idle,
                in_flight: None,
                platform_calls: 0,
            })),
        }
    }

    pub fn state(&self) -> PositionState {
        lock(&self.inner).state
    }

    /// Number of platform acquisition calls issued so far.
    pub fn platform_calls(&self) -> u64 {
        lock(&self.inner).platform_calls
    }

    /// Request the current position. Never fails: on error the fix carries
    /// the fallback coordinate and the classified cause. A request made while
    /// another is in flight joins it instead of issuing a second platform call.
    pub async fn request_position(&self) -> PositionFix {
        let pending = {
            let mut inner = lock(&self.inner);
            match &inner.in_flight {
                Some(existing) => {
                    debug!("position request coalesced into in-flight acquisition");
                    existing.clone()
                }
                None => {
                    inner.state = PositionState::Acquiring;
                    inner.platform_calls += 1;
                    let fut = self.spawn_acquire().boxed().shared();
                    inner.in_flight = Some(fut.clone());
                    fut
                }
            }
        };
        pending.await
    }

    /// Run the acquisition on its own task so it settles even when every
    /// caller stops waiting.
    fn spawn_acquire(&self) -> impl std::future::Future<Output = PositionFix> + Send + 'static {
        let handle = tokio::spawn(self.acquire());
        let fallback = self.fallback;
        let inner = Arc::clone(&self.inner);
        async move {
            handle.await.unwrap_or_else(|e| {
                warn!(error = %e, "position task failed; using fallback coordinate");
                let mut inner = lock(&inner);
                inner.state = PositionState::Failed(PositionError::Unavailable);
                inner.in_flight = None;
                PositionFix::fallback(fallback, PositionError::Unavailable)
            })
        }
    }

    fn acquire(&self) -> impl std::future::Future<Output = PositionFix> + Send + 'static {
        let acquisition = Arc::clone(&self.acquisition);
        let options = self.options;
        let fallback = self.fallback;
        let inner = Arc::clone(&self.inner);

        async move {
            let outcome = match tokio::time::timeout(options.timeout, acquisition.current_position(&options)).await {
                Ok(Ok(coord)) => coord.validate().map(|_| coord).map_err(|_| PositionError::Unavailable),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(PositionError::Timeout),
            };

            let fix = match outcome {
                Ok(coord) => {
                    info!(lat = coord.lat, lng = coord.lng, "position acquired");
                    PositionFix::acquired(coord)
                }
                Err(e) => {
                    warn!(error = %e, "position acquisition failed; using fallback coordinate");
                    PositionFix::fallback(fallback, e)
                }
            };

            let mut inner = lock(&inner);
            inner.state = match fix.error {
                None => PositionState::Resolved(fix.coordinate),
                Some(e) => PositionState::Failed(e),
            };
            inner.in_flight = None;
            fix
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
