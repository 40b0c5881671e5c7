//! Resource throttling for concurrent copy jobs
//!
//! Sorting a large tree starts one copy job per discovered file. Left alone, every job would
//! hold two file descriptors at the same time and the process would run out of them long
//! before the batch finishes. This crate provides process-wide gates that jobs pass through.
//!
//! # Overview
//!
//! 1. **Open Files Limit** - caps the number of copy jobs holding file handles at once
//! 2. **Operations Throttle** - caps how many jobs are started per second
//! 3. **Chunk I/O Throttle** - caps how many chunks are written per second
//!
//! Every gate is disabled (free to pass) until it is configured with a non-zero value.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! # async fn example() {
//! throttle::set_max_open_files(1000);
//! throttle::init_ops_tokens(50);
//! tokio::spawn(throttle::run_ops_replenish_thread(50, Duration::from_millis(100)));
//!
//! // before starting a job
//! throttle::get_ops_token().await;
//! // inside the job, held until the handles are closed
//! let _guard = throttle::open_file_permit().await;
//! // for every chunk written
//! throttle::get_chunk_token().await;
//! # }
//! ```
//!
//! Tokens are replenished by a background task that tops the bucket back up to
//! `tokens_per_interval` every interval, so 10 tokens every 100ms is 100 operations/sec.

mod semaphore;

static OPEN_FILES_LIMIT: semaphore::Semaphore = semaphore::Semaphore::new();
static OPS_THROTTLE: semaphore::Semaphore = semaphore::Semaphore::new();
static CHUNK_THROTTLE: semaphore::Semaphore = semaphore::Semaphore::new();

/// Limits the number of concurrently held [`OpenFileGuard`]s, 0 disables the limit.
pub fn set_max_open_files(max_open_files: usize) {
    OPEN_FILES_LIMIT.setup(max_open_files);
}

/// Currently configured open files limit, `None` when disabled.
pub fn max_open_files() -> Option<usize> {
    OPEN_FILES_LIMIT.limit()
}

pub struct OpenFileGuard {
    _permit: Option<tokio::sync::SemaphorePermit<'static>>,
}

pub async fn open_file_permit() -> OpenFileGuard {
    OpenFileGuard {
        _permit: OPEN_FILES_LIMIT.acquire().await,
    }
}

pub fn init_ops_tokens(ops_tokens: usize) {
    OPS_THROTTLE.setup(ops_tokens);
}

pub fn init_chunk_tokens(chunk_tokens: usize) {
    CHUNK_THROTTLE.setup(chunk_tokens);
}

pub async fn get_ops_token() {
    OPS_THROTTLE.consume().await;
}

pub async fn get_chunk_token() {
    CHUNK_THROTTLE.consume().await;
}

pub async fn run_ops_replenish_thread(replenish: usize, interval: std::time::Duration) {
    OPS_THROTTLE.run_replenish_thread(replenish, interval).await;
}

pub async fn run_chunk_replenish_thread(replenish: usize, interval: std::time::Duration) {
    CHUNK_THROTTLE
        .run_replenish_thread(replenish, interval)
        .await;
}

/// Splits a per-second rate into (tokens per interval, interval).
///
/// Small rates are replenished less often so that each interval still carries at least one
/// token; large rates are replenished every 100ms.
#[must_use]
pub fn replenish_schedule(per_second: usize) -> (usize, std::time::Duration) {
    if per_second >= 10 {
        (per_second / 10, std::time::Duration::from_millis(100))
    } else {
        (1, std::time::Duration::from_millis(1000 / per_second.max(1) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_for_large_rates() {
        assert_eq!(
            replenish_schedule(500),
            (50, std::time::Duration::from_millis(100))
        );
    }

    #[test]
    fn schedule_for_small_rates() {
        assert_eq!(
            replenish_schedule(4),
            (1, std::time::Duration::from_millis(250))
        );
        assert_eq!(
            replenish_schedule(1),
            (1, std::time::Duration::from_millis(1000))
        );
    }

    #[tokio::test]
    async fn unconfigured_gates_are_free() {
        // nothing in this test binary configures the chunk throttle
        for _ in 0..100 {
            get_chunk_token().await;
        }
    }
}
