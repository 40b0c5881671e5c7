use std::sync::atomic::{AtomicUsize, Ordering};

/// A semaphore that is a no-op until configured with a non-zero value.
pub struct Semaphore {
    // 0 means "disabled"
    limit: AtomicUsize,
    sem: tokio::sync::Semaphore,
}

impl Semaphore {
    pub const fn new() -> Self {
        Self {
            limit: AtomicUsize::new(0),
            sem: tokio::sync::Semaphore::const_new(0),
        }
    }

    pub fn setup(&self, value: usize) {
        self.limit.store(value, Ordering::Release);
        if value == 0 {
            tracing::debug!("throttle disabled");
            return;
        }
        tracing::debug!("throttle limit set to {}", value);
        self.sem.forget_permits(self.sem.available_permits());
        self.sem.add_permits(value);
    }

    pub fn limit(&self) -> Option<usize> {
        match self.limit.load(Ordering::Acquire) {
            0 => None,
            value => Some(value),
        }
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    pub async fn acquire(&self) -> Option<tokio::sync::SemaphorePermit<'_>> {
        self.limit()?;
        Some(
            self.sem
                .acquire()
                .await
                .expect("throttle semaphore is never closed"),
        )
    }

    pub async fn consume(&self) {
        if self.limit().is_some() {
            self.sem
                .acquire()
                .await
                .expect("throttle semaphore is never closed")
                .forget();
        }
    }

    pub async fn run_replenish_thread(&self, replenish: usize, interval: std::time::Duration) {
        if self.limit().is_none() {
            return;
        }
        loop {
            tokio::time::sleep(interval).await;
            let curr_permits = self.sem.available_permits();
            if curr_permits >= replenish {
                continue;
            }
            self.sem.add_permits(replenish - curr_permits);
        }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}
