use std::{collections::HashSet, time::Duration};

/// Seconds of cache lifetime granted per second of render latency.
const LATENCY_MULTIPLIER: f64 = 120.0;

/// Adaptive expiry: slow renders are kept longer than fast ones.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    min: Duration,
    max: Duration,
    max_cacheable: HashSet<String>,
}

impl TtlPolicy {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min: min.min(max),
            max,
            max_cacheable: HashSet::new(),
        }
    }

    /// Paths that always get the maximum lifetime.
    pub fn with_max_cacheable<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.max_cacheable.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn expiry(&self, path: &str, latency: Duration) -> Duration {
        if self.max_cacheable.contains(path) {
            return self.max;
        }
        let scaled = (latency.as_secs_f64() * LATENCY_MULTIPLIER) as u64;
        Duration::from_secs(scaled.clamp(self.min.as_secs(), self.max.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TtlPolicy {
        TtlPolicy::new(Duration::from_secs(600), Duration::from_secs(7200))
    }

    #[test]
    fn scales_with_latency_inside_bounds() {
        let policy = policy();
        assert_eq!(policy.expiry("/a", Duration::from_secs(30)), Duration::from_secs(3600));
        assert_eq!(policy.expiry("/a", Duration::from_secs(1)), Duration::from_secs(600));
        assert_eq!(policy.expiry("/a", Duration::from_secs(2)), Duration::from_secs(600));
        assert_eq!(policy.expiry("/a", Duration::from_secs(300)), Duration::from_secs(7200));
    }

    #[test]
    fn flagged_paths_get_the_maximum() {
        let policy = policy().with_max_cacheable(["/url/example.com/index.md"]);
        assert_eq!(
            policy.expiry("/url/example.com/index.md", Duration::ZERO),
            Duration::from_secs(7200)
        );
        assert_eq!(
            policy.expiry("/url/example.com/other.md", Duration::ZERO),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn zero_bounds_disable_caching() {
        let policy = TtlPolicy::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.expiry("/a", Duration::from_secs(30)), Duration::ZERO);
    }
}
