//! Central configuration constants for retry, storage and cache defaults.

use std::time::Duration;

/// Default retry preset: 3 attempts, 1s initial delay, capped at 8s.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(8);

/// Aggressive retry preset: 5 attempts, 0.5s initial delay, capped at 16s.
pub const AGGRESSIVE_RETRY_ATTEMPTS: u32 = 5;
pub const AGGRESSIVE_RETRY_INITIAL_DELAY: Duration = Duration::from_millis(500);
pub const AGGRESSIVE_RETRY_MAX_DELAY: Duration = Duration::from_secs(16);

/// Conservative retry preset: 2 attempts, 2s initial delay, capped at 10s.
pub const CONSERVATIVE_RETRY_ATTEMPTS: u32 = 2;
pub const CONSERVATIVE_RETRY_INITIAL_DELAY: Duration = Duration::from_secs(2);
pub const CONSERVATIVE_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// Multiplier shared by every retry preset.
pub const RETRY_BACKOFF_FACTOR: f64 = 2.0;

/// Below this many free bytes a download is refused outright. 50 MiB.
pub const CRITICAL_STORAGE_FLOOR_BYTES: u64 = 50 * 1024 * 1024;

/// Free space wanted on top of the estimate before storage counts as comfortable. 512 MiB.
pub const LOW_STORAGE_HEADROOM_BYTES: u64 = 512 * 1024 * 1024;

/// Size assumed for one service's cache when nothing better is known. 50 MiB.
pub const DEFAULT_ESTIMATED_SERVICE_BYTES: u64 = 50 * 1024 * 1024;

/// Spatial reference (WKID) every extraction is written in.
pub const OUTPUT_SPATIAL_REFERENCE: u32 = 4326;

/// File extension of a local cache file.
pub const CACHE_FILE_EXTENSION: &str = "fcache";

/// URL probed to decide whether the device is online.
pub const DEFAULT_CONNECTIVITY_PROBE_URL: &str = "https://www.arcgis.com/sharing/rest/info";

/// Timeout applied to the connectivity probe request.
pub const CONNECTIVITY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between background connectivity probes.
pub const CONNECTIVITY_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Interval between status polls of a remote extraction job.
pub const EXTRACTION_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Request timeout for the shared HTTP client.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Capacity of the progress channels handed to callers.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Convenience function to clamp an attempt count into the supported range.
pub fn clamp_attempts(v: u32) -> u32 {
    v.clamp(1, 10)
}
