//! Download configuration constants

use std::time::Duration;

/// Default number of concurrent download workers.
pub const DEFAULT_WORKERS: usize = 5;

/// Maximum allowed worker count to avoid hammering the archive host.
pub const MAX_WORKERS: usize = 32;

/// Default per-request timeout for archive downloads, in seconds.
/// Bounds worst-case pool runtime to timeout * ceil(files / workers).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Timeout for HEAD requests used by first-year detection.
pub const EXISTS_TIMEOUT: Duration = Duration::from_secs(5);

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("kline-archiver/", env!("CARGO_PKG_VERSION"));

/// Work queue capacity per worker.
pub const QUEUE_DEPTH_PER_WORKER: usize = 2;

/// Parse and validate a worker count
pub fn parse_workers(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("workers must be at least 1".to_string());
    }
    if value > MAX_WORKERS {
        return Err(format!("workers {value} exceeds maximum of {MAX_WORKERS}"));
    }
    Ok(value)
}
