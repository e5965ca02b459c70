//! Admission Control
//!
//! Bounds the number of requests in flight. Excess requests are turned away
//! at once with 429; nothing ever waits for a slot.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::common::DepotError;

/// Fixed-capacity counter of in-flight requests.
#[derive(Debug)]
pub struct AdmissionController {
    capacity: usize,
    in_flight: AtomicUsize,
    rejected: AtomicU64,
}

/// One occupied slot. Dropping it gives the slot back, however the holder
/// finishes (return, error, panic unwind, cancelled future).
#[derive(Debug)]
pub struct Permit {
    controller: Arc<AdmissionController>,
}

/// Shared permit carried in request extensions so a response body can keep
/// its slot until the body is fully sent.
#[derive(Debug, Clone)]
pub struct HeldPermit(pub Arc<Permit>);

impl AdmissionController {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            in_flight: AtomicUsize::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    /// Take a slot if one is free. Never blocks.
    pub fn try_admit(self: &Arc<Self>) -> Option<Permit> {
        let mut current = self.in_flight.load(Ordering::Relaxed);
        loop {
            if current >= self.capacity {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Some(Permit {
                        controller: Arc::clone(self),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.in_flight())
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.controller.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Router middleware: admit or answer 429.
pub async fn admission_middleware(
    State(admission): State<Arc<AdmissionController>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(permit) = admission.try_admit() else {
        debug!(
            "Rejecting {} {}: {} requests in flight",
            req.method(),
            req.uri().path(),
            admission.capacity()
        );
        return DepotError::OverCapacity.into_response();
    };

    let permit = Arc::new(permit);
    req.extensions_mut().insert(HeldPermit(Arc::clone(&permit)));
    let response = next.run(req).await;
    drop(permit);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_plus_one() {
        let controller = AdmissionController::new(3);
        let permits: Vec<_> = (0..3).filter_map(|_| controller.try_admit()).collect();
        assert_eq!(permits.len(), 3);
        assert!(controller.try_admit().is_none());
        assert_eq!(controller.rejected_total(), 1);
        assert_eq!(controller.available(), 0);

        drop(permits);
        assert_eq!(controller.in_flight(), 0);

        let second: Vec<_> = (0..3).filter_map(|_| controller.try_admit()).collect();
        assert_eq!(second.len(), 3);
    }

    #[test]
    fn test_release_on_panic() {
        let controller = AdmissionController::new(1);
        let c = Arc::clone(&controller);
        let result = std::thread::spawn(move || {
            let _permit = c.try_admit().unwrap();
            panic!("handler blew up");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(controller.in_flight(), 0);
        assert!(controller.try_admit().is_some());
    }

    #[test]
    fn test_contended_admission_never_exceeds_capacity() {
        let capacity = 16;
        let controller = AdmissionController::new(capacity);
        let barrier = Arc::new(std::sync::Barrier::new(64));

        let threads: Vec<_> = (0..64)
            .map(|_| {
                let controller = Arc::clone(&controller);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    controller.try_admit()
                })
            })
            .collect();

        let permits: Vec<_> = threads
            .into_iter()
            .filter_map(|t| t.join().unwrap())
            .collect();
        assert_eq!(permits.len(), capacity);
        assert_eq!(controller.in_flight(), capacity);
        assert_eq!(controller.rejected_total(), 64 - capacity as u64);

        drop(permits);
        assert_eq!(controller.available(), capacity);
    }
}
