const DEFAULT_PAGE_BUFS: usize = 256;
const DEFAULT_TRAIN_BUFS: usize = 32;

/// Sizing knobs for the two buffer pools.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of page-sized frames in the small pool.
    pub page_bufs: usize,
    /// Number of train-sized frames in the large pool.
    pub train_bufs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_bufs: DEFAULT_PAGE_BUFS,
            train_bufs: DEFAULT_TRAIN_BUFS,
        }
    }
}

impl EngineConfig {
    /// A deliberately tiny pool, handy for exercising eviction in tests.
    pub fn small(page_bufs: usize, train_bufs: usize) -> Self {
        Self {
            page_bufs,
            train_bufs,
        }
    }
}
