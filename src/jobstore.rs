//! §4.2 Job Store — in-memory job map, durably mirrored to a single JSON
//! file on every transition via write-to-temp-then-rename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::schema::{Job, JobStatus, now_rfc3339};

pub struct JobStore {
    path: PathBuf,
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobStore {
    /// Load the store from `path`, recovering any job found in a
    /// non-terminal state as `failed` (spec §4.2: the prior process did not
    /// witness its completion).
    pub fn load(path: PathBuf) -> anyhow::Result<Self> {
        let mut jobs = HashMap::new();

        if path.exists() {
            let raw = std::fs::read(&path)?;
            if !raw.is_empty() {
                match serde_json::from_slice::<Vec<Job>>(&raw) {
                    Ok(loaded) => {
                        for mut job in loaded {
                            if !job.status.is_terminal() {
                                let now = now_rfc3339();
                                if let Some(started) = &job.started_at {
                                    job.duration_ms = duration_between(started, &now);
                                }
                                job.status = JobStatus::Failed;
                                job.code = Some(-1);
                                job.ended_at = Some(now);
                            }
                            jobs.insert(job.job_id.clone(), job);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, path = %path.display(), "job store file unreadable; starting fresh");
                    }
                }
            }
        }

        let store = JobStore {
            path,
            jobs: Mutex::new(jobs),
        };
        {
            let guard = store.jobs.lock().unwrap();
            store.persist_locked(&guard);
        }
        Ok(store)
    }

    pub fn insert(&self, job: Job) {
        let mut guard = self.jobs.lock().unwrap();
        guard.insert(job.job_id.clone(), job);
        self.persist_locked(&guard);
    }

    pub fn update(&self, job: Job) {
        self.insert(job);
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.lock().unwrap().get(job_id).cloned()
    }

    /// Mutate a job in place under the store's lock and persist the result.
    /// Returns `None` if the job is unknown.
    pub fn with_mut<R>(&self, job_id: &str, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let mut guard = self.jobs.lock().unwrap();
        let result = {
            let job = guard.get_mut(job_id)?;
            Some(f(job))
        };
        if result.is_some() {
            self.persist_locked(&guard);
        }
        result
    }

    /// Persistence is best-effort: failures are logged and never propagated
    /// to the caller (spec §7).
    fn persist_locked(&self, jobs: &HashMap<String, Job>) {
        if let Err(e) = self.try_persist(jobs) {
            warn!(error = %e, path = %self.path.display(), "job store persistence failed");
        }
    }

    fn try_persist(&self, jobs: &HashMap<String, Job>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let values: Vec<&Job> = jobs.values().collect();
        let contents = serde_json::to_vec_pretty(&values)?;

        let tmp_path = tmp_path_for(&self.path);
        std::fs::write(&tmp_path, &contents)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

pub(crate) fn duration_between(start: &str, end: &str) -> Option<u64> {
    let start = chrono::DateTime::parse_from_rfc3339(start).ok()?;
    let end = chrono::DateTime::parse_from_rfc3339(end).ok()?;
    u64::try_from((end - start).num_milliseconds()).ok()
}
