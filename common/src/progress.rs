use tracing::{event, instrument, Level};

#[derive(Debug)]
pub struct TlsCounter {
    // mutex is used primarily from one thread, so it's not a bottleneck
    count: thread_local::ThreadLocal<std::sync::Mutex<u64>>,
}

impl TlsCounter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            count: thread_local::ThreadLocal::new(),
        }
    }

    pub fn add(&self, value: u64) {
        let mutex = self.count.get_or(|| std::sync::Mutex::new(0));
        let mut guard = mutex.lock().expect("progress counter lock poisoned");
        *guard += value;
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn get(&self) -> u64 {
        self.count.iter().fold(0, |x, y| {
            x + *y.lock().expect("progress counter lock poisoned")
        })
    }
}

impl Default for TlsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of copy jobs started and finished.
#[derive(Debug, Default)]
pub struct JobCounter {
    started: TlsCounter,
    finished: TlsCounter,
}

pub struct JobGuard<'a> {
    jobs: &'a JobCounter,
}

impl<'a> JobGuard<'a> {
    pub fn new(jobs: &'a JobCounter) -> Self {
        jobs.started.inc();
        Self { jobs }
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.jobs.finished.inc();
    }
}

pub struct Status {
    pub started: u64,
    pub finished: u64,
}

impl JobCounter {
    pub fn guard(&self) -> JobGuard<'_> {
        JobGuard::new(self)
    }

    #[instrument(skip(self))]
    pub fn get(&self) -> Status {
        let mut status = Status {
            started: self.started.get(),
            finished: self.finished.get(),
        };
        if status.finished > status.started {
            // counters are read one after another, a job may finish in between
            event!(
                Level::DEBUG,
                "progress inversion - started: {}, finished {}",
                status.started,
                status.finished
            );
            status.started = status.finished;
        }
        status
    }
}

/// Live counters shared by the scanner and all copy jobs of a run.
#[derive(Debug)]
pub struct Progress {
    pub jobs: JobCounter,
    pub files_scanned: TlsCounter,
    pub files_copied: TlsCounter,
    pub files_failed: TlsCounter,
    pub bytes_copied: TlsCounter,
    pub buckets_created: TlsCounter,
    start_time: std::time::Instant,
}

impl Progress {
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: Default::default(),
            files_scanned: Default::default(),
            files_copied: Default::default(),
            files_failed: Default::default(),
            bytes_copied: Default::default(),
            buckets_created: Default::default(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn get_duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ProgressPrinter<'a> {
    progress: &'a Progress,
    last_jobs: u64,
    last_bytes: u64,
    last_update: std::time::Instant,
}

impl<'a> ProgressPrinter<'a> {
    pub fn new(progress: &'a Progress) -> Self {
        Self {
            progress,
            last_jobs: progress.jobs.get().finished,
            last_bytes: progress.bytes_copied.get(),
            last_update: std::time::Instant::now(),
        }
    }

    /// Multi-line report used for text updates.
    pub fn print(&mut self) -> String {
        let time_now = std::time::Instant::now();
        let jobs = self.progress.jobs.get();
        let total_duration_secs = self.progress.get_duration().as_secs_f64().max(f64::EPSILON);
        let curr_duration_secs = (time_now - self.last_update)
            .as_secs_f64()
            .max(f64::EPSILON);
        let average_jobs_rate = jobs.finished as f64 / total_duration_secs;
        let current_jobs_rate =
            jobs.finished.saturating_sub(self.last_jobs) as f64 / curr_duration_secs;
        let bytes = self.progress.bytes_copied.get();
        let average_bytes_rate = bytes as f64 / total_duration_secs;
        let current_bytes_rate = bytes.saturating_sub(self.last_bytes) as f64 / curr_duration_secs;
        self.last_jobs = jobs.finished;
        self.last_bytes = bytes;
        self.last_update = time_now;
        format!(
            "---------------------\n\
            JOBS:\n\
            pending: {:>10}\n\
            average: {:>10.2} files/s\n\
            current: {:>10.2} files/s\n\
            -----------------------\n\
            COPIED:\n\
            average: {:>10}/s\n\
            current: {:>10}/s\n\
            total:   {:>10}\n\
            \n\
            scanned: {:>10}\n\
            copied:  {:>10}\n\
            failed:  {:>10}\n\
            buckets: {:>10}",
            jobs.started - jobs.finished,
            average_jobs_rate,
            current_jobs_rate,
            bytesize::ByteSize(average_bytes_rate as u64),
            bytesize::ByteSize(current_bytes_rate as u64),
            bytesize::ByteSize(bytes),
            self.progress.files_scanned.get(),
            self.progress.files_copied.get(),
            self.progress.files_failed.get(),
            self.progress.buckets_created.get(),
        )
    }

    /// One-line report used as the progress bar message.
    pub fn short(&self) -> String {
        let jobs = self.progress.jobs.get();
        format!(
            "scanned: {} | copied: {} | failed: {} | pending: {} | {}",
            self.progress.files_scanned.get(),
            self.progress.files_copied.get(),
            self.progress.files_failed.get(),
            jobs.started - jobs.finished,
            bytesize::ByteSize(self.progress.bytes_copied.get()),
        )
    }
}
