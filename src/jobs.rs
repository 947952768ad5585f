use super::*;

/// Number of past jobs kept around so a share submitted against a
/// `previousblockhash` that just rolled over can still be found and
/// validated instead of being rejected as stale.
pub const JOB_RETENTION: usize = 8;

#[derive(Default)]
struct Inner {
    jobs: VecDeque<Arc<Job>>,
    next_id: u32,
}

/// Factory-owned registry of outstanding jobs, shared by every connection.
/// Jobs are appended as new templates arrive and the oldest is evicted once
/// [`JOB_RETENTION`] is exceeded.
#[derive(Default)]
pub struct Jobs {
    inner: Mutex<Inner>,
}

impl Jobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_job_id(&self) -> JobId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id = inner.next_id.wrapping_add(1);
        JobId::new(id)
    }

    pub fn insert(&self, job: Job) -> Arc<Job> {
        let job = Arc::new(job);
        let mut inner = self.inner.lock();
        inner.jobs.push_back(job.clone());
        while inner.jobs.len() > JOB_RETENTION {
            inner.jobs.pop_front();
        }
        job
    }

    pub fn get(&self, job_id: JobId) -> Option<Arc<Job>> {
        self.inner
            .lock()
            .jobs
            .iter()
            .find(|job| job.job_id == job_id)
            .cloned()
    }

    pub fn current(&self) -> Option<Arc<Job>> {
        self.inner.lock().jobs.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().jobs.is_empty()
    }
}
