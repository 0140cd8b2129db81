use std::time::Duration;

/// Backoff exponencial para reconectar la voz.
///
/// Antes del intento `n` (desde 0) se esperan `min(2^n, cap)` unidades. Tras
/// `max_attempts` intentos fallidos la política se da por agotada.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub unit: Duration,
    pub cap: u32,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(unit: Duration, cap: u32, max_attempts: u32) -> Self {
        Self {
            unit,
            cap,
            max_attempts,
        }
    }

    /// Espera en unidades para el intento dado
    pub fn units_for(&self, attempt: u32) -> u32 {
        // 2^31 ya supera cualquier cap razonable
        let exp = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        exp.min(self.cap)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.unit.saturating_mul(self.units_for(attempt))
    }

    pub fn is_exhausted(&self, attempts_made: u32) -> bool {
        attempts_made >= self.max_attempts
    }
}

/// Contador de intentos sobre una [`BackoffPolicy`]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Espera antes del siguiente intento; avanza el contador
    pub fn next(&mut self) -> Duration {
        let delay = self.policy.delay_for(self.attempt);
        self.attempt += 1;
        delay
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.policy.is_exhausted(self.attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), 60, 10);
        let units: Vec<u32> = (0..8).map(|n| policy.units_for(n)).collect();
        assert_eq!(units, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_is_monotonic_and_capped_for_large_attempts() {
        let policy = BackoffPolicy::new(Duration::from_millis(1), 600, 10);
        let mut previous = 0;
        for attempt in 0..200 {
            let units = policy.units_for(attempt);
            assert!(units >= previous, "attempt {} went down", attempt);
            assert!(units <= 600);
            previous = units;
        }
        assert_eq!(policy.units_for(199), 600);
    }

    #[test]
    fn test_counter_exhaustion() {
        let mut backoff = Backoff::new(BackoffPolicy::new(Duration::from_millis(10), 60, 3));
        assert_eq!(backoff.next(), Duration::from_millis(10));
        assert_eq!(backoff.next(), Duration::from_millis(20));
        assert!(!backoff.is_exhausted());
        assert_eq!(backoff.next(), Duration::from_millis(40));
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.attempts(), 3);
    }
}
