/// Fallback worker count when the platform cannot report its parallelism.
pub const DEFAULT_POOL_CAPACITY: usize = 4;

/// Number of workers to spawn when the caller asks for "auto" (never zero).
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_POOL_CAPACITY)
        .max(1)
}
