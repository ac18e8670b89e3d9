//! End-to-end tests driving the [`Runner`] facade directly with real
//! `/bin/bash` scripts, covering the scenarios a deployed HTTP adapter
//! would exercise.

use std::io::Write;
use std::time::Duration;

use script_runner::config::{Config, RunnerSection};
use script_runner::jobstore::JobStore;
use script_runner::logsink::{LogSink, Stream};
use script_runner::runner::{RunRequest, Runner};
use script_runner::schema::{JobStatus, RunMode, ScriptArgsPolicy, ScriptEntry};

/// A script to register, named by id, with a bash body and an optional
/// per-script timeout.
struct ScriptSpec {
    id: &'static str,
    body: &'static str,
    timeout_sec: u64,
}

/// Test harness owning an isolated temp directory for job store + logs +
/// scripts, and a [`Runner`] wired up against it.
struct Harness {
    _tmp: tempfile::TempDir,
    runner: std::sync::Arc<Runner>,
}

impl Harness {
    fn new(max_concurrent: usize, specs: Vec<ScriptSpec>) -> Self {
        let tmp = tempfile::tempdir().expect("create tempdir");

        let scripts = specs
            .into_iter()
            .map(|spec| {
                let path = tmp.path().join(format!("{}.sh", spec.id));
                let mut f = std::fs::File::create(&path).expect("create script");
                writeln!(f, "#!/bin/bash\n{}", spec.body).expect("write script");
                drop(f);
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                    .expect("chmod script");
                ScriptEntry {
                    id: spec.id.to_string(),
                    path: path.to_string_lossy().into_owned(),
                    mode: None,
                    timeout_sec: spec.timeout_sec,
                    args: ScriptArgsPolicy {
                        max_items: 8,
                        item_pattern: "^[a-zA-Z0-9._-]+$".to_string(),
                        item_max_length: 64,
                    },
                }
            })
            .collect();

        let config = Config {
            runner: RunnerSection {
                max_concurrent,
                default_mode: "async".to_string(),
                max_log_bytes_per_stream: 1024 * 1024,
                preview_max_bytes: 4096,
                job_store_file: tmp.path().join("jobs.json"),
                logs_dir: tmp.path().join("logs"),
            },
            scripts,
        };
        let store = JobStore::load(config.runner.job_store_file.clone()).expect("load store");
        let log_sink = LogSink::new(config.runner.logs_dir.clone());
        let runner = Runner::new(&config, store, log_sink);
        Harness { _tmp: tmp, runner }
    }

    async fn poll_until_terminal(&self, job_id: &str) -> script_runner::schema::Job {
        for _ in 0..200 {
            let job = self.runner.get_job(job_id).expect("job exists");
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {job_id} did not reach a terminal state in time");
    }
}

#[tokio::test]
async fn sync_success_returns_stdout_preview() {
    let h = Harness::new(
        4,
        vec![ScriptSpec {
            id: "ok",
            body: "echo \"ok:$*\"",
            timeout_sec: 0,
        }],
    );

    let job = h
        .runner
        .submit_run(RunRequest {
            script_id: "ok".to_string(),
            args: vec!["hello".to_string(), "world".to_string()],
            mode: Some(RunMode::Sync),
        })
        .await
        .expect("submit succeeds");

    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.code, Some(0));
    assert!(
        job.stdout_preview.contains("ok:hello world"),
        "preview was: {:?}",
        job.stdout_preview
    );
}

#[tokio::test]
async fn validation_failure_creates_no_job() {
    let h = Harness::new(
        4,
        vec![ScriptSpec {
            id: "ok",
            body: "echo \"ok:$*\"",
            timeout_sec: 0,
        }],
    );

    let err = h
        .runner
        .submit_run(RunRequest {
            script_id: "ok".to_string(),
            args: vec!["bad/slash".to_string()],
            mode: Some(RunMode::Sync),
        })
        .await
        .expect_err("args violating itemPattern must be rejected");

    assert_eq!(err.code, "INVALID_ARGS");
}

#[tokio::test]
async fn timeout_kills_the_job() {
    let h = Harness::new(
        4,
        vec![ScriptSpec {
            id: "slow",
            body: "sleep 3",
            timeout_sec: 1,
        }],
    );

    let started = std::time::Instant::now();
    let job = h
        .runner
        .submit_run(RunRequest {
            script_id: "slow".to_string(),
            args: vec![],
            mode: Some(RunMode::Sync),
        })
        .await
        .expect("submit succeeds");
    let elapsed = started.elapsed();

    assert_eq!(job.status, JobStatus::TimedOut);
    assert_eq!(job.code, Some(-1));
    assert!(
        elapsed < Duration::from_secs(2),
        "expected the timeout to cut the 3s sleep short, took {elapsed:?}"
    );
}

#[tokio::test]
async fn async_cancel_while_running() {
    let h = Harness::new(
        4,
        vec![ScriptSpec {
            id: "slow",
            body: "sleep 10",
            timeout_sec: 0,
        }],
    );

    let job = h
        .runner
        .submit_run(RunRequest {
            script_id: "slow".to_string(),
            args: vec![],
            mode: Some(RunMode::Async),
        })
        .await
        .expect("submit succeeds");
    assert_eq!(job.status, JobStatus::Queued);

    // Give the scheduler a moment to actually start the job.
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.runner.cancel_job(&job.job_id).await.expect("cancel");

    let terminal = h.poll_until_terminal(&job.job_id).await;
    assert_eq!(terminal.status, JobStatus::Canceled);
    assert_eq!(terminal.code, Some(-1));
}

#[tokio::test]
async fn queued_cancel_never_starts_running() {
    let h = Harness::new(
        1,
        vec![ScriptSpec {
            id: "slow",
            body: "sleep 10",
            timeout_sec: 0,
        }],
    );

    let a = h
        .runner
        .submit_run(RunRequest {
            script_id: "slow".to_string(),
            args: vec![],
            mode: Some(RunMode::Async),
        })
        .await
        .expect("submit a");
    let b = h
        .runner
        .submit_run(RunRequest {
            script_id: "slow".to_string(),
            args: vec![],
            mode: Some(RunMode::Async),
        })
        .await
        .expect("submit b");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        h.runner.get_job(&a.job_id).unwrap().status,
        JobStatus::Running
    );
    assert_eq!(
        h.runner.get_job(&b.job_id).unwrap().status,
        JobStatus::Queued
    );

    h.runner.cancel_job(&b.job_id).await.expect("cancel b");
    let terminal_b = h.poll_until_terminal(&b.job_id).await;
    assert_eq!(terminal_b.status, JobStatus::Canceled);
    assert!(terminal_b.started_at.is_none());

    h.runner.cancel_job(&a.job_id).await.expect("cancel a");
}

#[tokio::test]
async fn log_pagination_reassembles_full_output() {
    let h = Harness::new(
        4,
        vec![ScriptSpec {
            id: "lines",
            body: "for i in $(seq 1 10000); do echo \"line $i\"; done",
            timeout_sec: 0,
        }],
    );

    let job = h
        .runner
        .submit_run(RunRequest {
            script_id: "lines".to_string(),
            args: vec![],
            mode: Some(RunMode::Sync),
        })
        .await
        .expect("submit succeeds");
    assert_eq!(job.status, JobStatus::Succeeded);

    let mut collected = String::new();
    let mut offset = 0u64;
    loop {
        let page = h
            .runner
            .get_job_logs(&job.job_id, Stream::Stdout, offset, 4096)
            .expect("read page");
        collected.push_str(&page.data);
        if page.next_offset >= page.total_size {
            assert_eq!(page.total_size, job.stdout_size);
            break;
        }
        assert!(page.next_offset > offset, "next_offset must be monotonic");
        offset = page.next_offset;
    }

    let expected: String = (1..=10000).map(|i| format!("line {i}\n")).collect();
    assert_eq!(collected, expected);
}

#[tokio::test]
async fn zero_limit_logs_request_is_rejected() {
    let h = Harness::new(
        4,
        vec![ScriptSpec {
            id: "echo",
            body: "echo hi",
            timeout_sec: 0,
        }],
    );

    let job = h
        .runner
        .submit_run(RunRequest {
            script_id: "echo".to_string(),
            args: vec![],
            mode: Some(RunMode::Sync),
        })
        .await
        .expect("submit succeeds");
    assert_eq!(job.status, JobStatus::Succeeded);

    let err = h
        .runner
        .get_job_logs(&job.job_id, Stream::Stdout, 0, 0)
        .expect_err("limit=0 must be rejected");
    assert_eq!(err.code, "INVALID_ARGS");
}
