use rand::{Rng, RngCore};
use std::time::Duration;

/// Exponential backoff with equal jitter: each delay is drawn from `[base/2, base]`, then the
/// base doubles up to `max`.
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            base: initial.min(max),
            max,
        }
    }

    pub(crate) fn next_delay(&mut self, rng: &mut impl RngCore) -> Duration {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let delay = if base_ms <= 1 {
            self.base
        } else {
            let half_ms = base_ms / 2;
            Duration::from_millis(half_ms.saturating_add(rng.gen_range(0..=half_ms)))
        };
        self.base = self.base.saturating_mul(2).min(self.max);
        delay
    }

    /// Sleeps for the next delay using the thread rng.
    pub(crate) async fn wait(&mut self) {
        let delay = self.next_delay(&mut rand::thread_rng());
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn delays_stay_within_half_to_full_base() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let mut backoff = Backoff::new(Duration::from_millis(400), Duration::from_secs(5));
            let delay = backoff.next_delay(&mut rng);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(400));
        }
    }

    #[test]
    fn base_doubles_up_to_max() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(5));
        backoff.next_delay(&mut rng);
        assert_eq!(backoff.base, Duration::from_secs(4));
        backoff.next_delay(&mut rng);
        assert_eq!(backoff.base, Duration::from_secs(5));
        let capped = backoff.next_delay(&mut rng);
        assert!(capped <= Duration::from_secs(5));
    }

    #[test]
    fn tiny_base_is_not_jittered() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(4));
        assert_eq!(backoff.next_delay(&mut rng), Duration::from_millis(1));
        assert_eq!(backoff.base, Duration::from_millis(2));
    }
}
