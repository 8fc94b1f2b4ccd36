//! Result caches that keep repeated captures away from the recognizer.
//!
//! Two instances are used by the monitor: capture fingerprint → recognition
//! result, and raw text → corrected text.

mod fingerprint;
mod result_cache;

pub use fingerprint::Fingerprint;
pub use result_cache::{CacheStats, ResultCache};

use std::time::Duration;

use crate::config::CacheConfig;
use crate::ocr::Recognition;

pub type ImageCache = ResultCache<Fingerprint, Recognition>;
pub type CorrectionCache = ResultCache<String, String>;

pub fn image_cache(config: &CacheConfig) -> ImageCache {
    ResultCache::new(
        config.image_capacity,
        config.image_ttl_secs.map(Duration::from_secs),
    )
}

pub fn correction_cache(config: &CacheConfig) -> CorrectionCache {
    ResultCache::new(
        config.correction_capacity,
        config.correction_ttl_secs.map(Duration::from_secs),
    )
}
