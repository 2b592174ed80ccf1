use std::time::Duration;

/// MIN_SAVE_THRESHOLD bounds how often dirty domains are written back.
pub const MIN_SAVE_THRESHOLD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    save_threshold: Duration,
    cache_capacity: usize,
    cache_bytes: usize,
}

impl ManagerOptions {
    /// new builds the options, raising save_threshold to MIN_SAVE_THRESHOLD.
    /// A cache_capacity of 0 keeps every loaded domain resident.
    pub fn new(save_threshold: Duration, cache_capacity: usize) -> Self {
        Self {
            save_threshold: save_threshold.max(MIN_SAVE_THRESHOLD),
            cache_capacity,
            cache_bytes: 0,
        }
    }

    /// with_cache_bytes bounds the estimated memory held by resident
    /// sketches, 0 for unbounded.
    pub fn with_cache_bytes(mut self, cache_bytes: usize) -> Self {
        self.cache_bytes = cache_bytes;
        self
    }

    /// save_threshold is the interval of the background flush.
    pub fn save_threshold(&self) -> Duration {
        self.save_threshold
    }

    /// cache_capacity is the maximum number of resident domains, 0 for unbounded.
    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    pub fn cache_bytes(&self) -> usize {
        self.cache_bytes
    }
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self::new(MIN_SAVE_THRESHOLD, 0)
    }
}
