use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Límite global de trabajo en curso, sumando todos los guilds.
///
/// Quedarse sin huecos nunca es un error: [`AdmissionController::acquire`]
/// espera a que se libere uno. El hueco vuelve al soltar el
/// [`AdmissionPermit`], también en retornos anticipados y con `?`.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// Un hueco de admisión
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub async fn acquire(&self) -> AdmissionPermit {
        if self.slots.available_permits() == 0 {
            debug!("⏳ Admisión agotada ({}), esperando un hueco", self.capacity);
        }

        // El semáforo nunca se cierra
        loop {
            if let Ok(permit) = self.slots.clone().acquire_owned().await {
                return AdmissionPermit { _permit: permit };
            }
            tokio::task::yield_now().await;
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_release_on_drop() {
        let admission = AdmissionController::new(2);
        let a = admission.acquire().await;
        let _b = admission.acquire().await;
        assert_eq!(admission.in_flight(), 2);
        drop(a);
        assert_eq!(admission.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_acquire_blocks_instead_of_failing() {
        let admission = AdmissionController::new(1);
        let held = admission.acquire().await;

        let waiting = tokio::time::timeout(Duration::from_millis(30), admission.acquire()).await;
        assert!(waiting.is_err(), "acquire should still be waiting");

        drop(held);
        let granted = tokio::time::timeout(Duration::from_secs(1), admission.acquire()).await;
        assert!(granted.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_capacity_under_contention() {
        let admission = AdmissionController::new(5);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let admission = admission.clone();
                let current = current.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let _permit = admission.acquire().await;
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        futures::future::join_all(tasks).await;

        assert!(peak.load(Ordering::SeqCst) <= admission.capacity());
        assert_eq!(admission.in_flight(), 0);
    }
}
