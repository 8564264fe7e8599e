//! End-to-end tests of the load workflow against a fake psql.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use super::*;
use crate::infrastructure::{ConnectionTarget, SIGINT};
use crate::worker::{CommandSpec, JobResult};

/// Pretends to be psql: answers the version probe and "loads" files,
/// failing or warning when the SQL mentions a configured marker.
#[derive(Default)]
struct FakePsql {
    delay: Duration,
    fail_marker: Option<&'static str>,
    warn_marker: Option<&'static str>,
    probe_error: Option<&'static str>,
    commands: Mutex<Vec<CommandSpec>>,
    copies: AtomicUsize,
}

impl FakePsql {
    fn new() -> Self {
        Self::default()
    }

    fn sql_of(spec: &CommandSpec) -> &str {
        spec.args.last().map_or("", String::as_str)
    }

    fn copy_statements(&self) -> Vec<String> {
        self.commands
            .lock()
            .iter()
            .map(|c| Self::sql_of(c).to_string())
            .filter(|sql| sql.starts_with("COPY BINARY"))
            .collect()
    }
}

#[async_trait]
impl JobExecutor for FakePsql {
    async fn execute(&self, job: &Job) -> JobResult {
        let started_at = Utc::now();
        let spec = job.command();
        self.commands.lock().push(spec.clone());
        let sql = Self::sql_of(spec);

        if sql == "SELECT version()" {
            return match self.probe_error {
                Some(err) => JobResult::from_exit(job.id(), started_at, 2, "", err),
                None => JobResult::from_exit(job.id(), started_at, 0, "PostgreSQL 12.12\n", ""),
            };
        }

        self.copies.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail_marker.is_some_and(|m| sql.contains(m)) {
            return JobResult::from_exit(
                job.id(),
                started_at,
                1,
                "",
                "ERROR:  could not write file\n",
            );
        }
        let stderr = if self.warn_marker.is_some_and(|m| sql.contains(m)) {
            "NOTICE:  file replaced\n"
        } else {
            ""
        };
        JobResult::from_exit(job.id(), started_at, 0, "COPY 1\n", stderr)
    }
}

struct NoPrompt;

impl PasswordPrompt for NoPrompt {
    fn prompt(&self, _target: &ConnectionTarget) -> io::Result<SecretString> {
        Err(io::Error::other("prompt not expected"))
    }
}

/// Input directory plus a fake client installation
struct Fixture {
    input: TempDir,
    gphome: TempDir,
}

impl Fixture {
    fn new(files: &[&str]) -> Self {
        let input = tempfile::tempdir().unwrap();
        for name in files {
            let path = input.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, name.as_bytes()).unwrap();
        }
        let gphome = tempfile::tempdir().unwrap();
        fs::write(gphome.path().join("greenplum_path.sh"), "").unwrap();
        Self { input, gphome }
    }

    fn env(&self) -> Environment {
        Environment::from_pairs([
            ("GPHOME", self.gphome.path().to_str().unwrap()),
            ("HOME", self.gphome.path().to_str().unwrap()),
        ])
    }

    fn config(&self) -> LoadConfig {
        LoadConfig::new(self.input.path(), "dir_table")
    }

    fn loader(&self, config: LoadConfig, psql: &Arc<FakePsql>) -> DirTableLoader {
        self.loader_with(config, self.env(), RunContext::new(), psql)
    }

    fn loader_with(
        &self,
        config: LoadConfig,
        env: Environment,
        ctx: RunContext,
        psql: &Arc<FakePsql>,
    ) -> DirTableLoader {
        DirTableLoader::new(config, env, ctx)
            .with_executor(Arc::clone(psql) as Arc<dyn JobExecutor>)
            .with_prompt(Arc::new(NoPrompt))
            .with_retry_policy(
                RetryPolicy::new(0).with_delays(Duration::from_millis(1), Duration::from_millis(1)),
            )
    }
}

#[tokio::test]
async fn test_loads_every_file_in_directory() {
    let fixture = Fixture::new(&["a.bin", "b.bin", "sub/c.bin"]);
    let psql = Arc::new(FakePsql::new());
    let mut config = fixture.config();
    config.tasks = 2;
    config.dest_path = Some("docs".to_string());

    let summary = fixture.loader(config, &psql).run().await.unwrap();

    assert_eq!(summary.files, 3);
    assert_eq!(summary.loaded, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.workers, 2);
    assert_eq!(summary.server_version.as_deref(), Some("PostgreSQL 12.12"));
    assert_eq!(summary.exit_status(), ExitStatus::Success);

    let mut statements = psql.copy_statements();
    statements.sort();
    let root = std::path::absolute(fixture.input.path()).unwrap();
    let expected: Vec<String> = ["a.bin", "b.bin", "sub/c.bin"]
        .iter()
        .map(|name| {
            format!(
                "COPY BINARY dir_table FROM '{}' 'docs/{}'",
                root.join(name).display(),
                name
            )
        })
        .collect();
    assert_eq!(statements, expected);
}

#[tokio::test]
async fn test_single_file_with_tag() {
    let fixture = Fixture::new(&["report.pdf"]);
    let psql = Arc::new(FakePsql::new());
    let mut config = fixture.config();
    config.input = fixture.input.path().join("report.pdf");
    config.tag = Some("q3".to_string());
    config.tasks = 4;

    let summary = fixture.loader(config, &psql).run().await.unwrap();

    assert_eq!(summary.workers, 1);
    let statements = psql.copy_statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].ends_with("'report.pdf' WITH TAG 'q3'"), "{}", statements[0]);
}

#[tokio::test]
async fn test_failure_without_stop_on_error_runs_everything() {
    let fixture = Fixture::new(&["a.bin", "bad.bin", "c.bin", "d.bin"]);
    let psql = Arc::new(FakePsql {
        fail_marker: Some("bad.bin"),
        ..FakePsql::new()
    });
    let mut config = fixture.config();
    config.tasks = 2;

    let err = fixture.loader(config, &psql).run().await.unwrap_err();

    match err {
        LoadError::JobFailure { table, source } => {
            assert_eq!(table, "dir_table");
            assert!(matches!(source, PoolError::PartialFailure { failed: 1, total: 4, .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(psql.copies.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_stop_on_error_stops_dispatching() {
    let fixture = Fixture::new(&["a.bin", "b_bad.bin", "c.bin", "d.bin", "e.bin"]);
    let psql = Arc::new(FakePsql {
        delay: Duration::from_millis(10),
        fail_marker: Some("b_bad.bin"),
        ..FakePsql::new()
    });
    let mut config = fixture.config();
    config.tasks = 1;
    config.stop_on_error = true;

    let err = fixture.loader(config, &psql).run().await.unwrap_err();

    assert!(matches!(err, LoadError::JobFailure { .. }));
    // One worker claims in order, so nothing after the failing file runs.
    assert_eq!(psql.copies.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_messages_are_warnings() {
    let fixture = Fixture::new(&["a.bin", "noisy.bin"]);
    let psql = Arc::new(FakePsql {
        warn_marker: Some("noisy.bin"),
        ..FakePsql::new()
    });

    let summary = fixture
        .loader(fixture.config(), &psql)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.loaded, 2);
    assert_eq!(summary.warnings, 1);
    assert_eq!(summary.exit_status(), ExitStatus::Warnings);
}

#[tokio::test]
async fn test_empty_directory_is_a_warning() {
    let fixture = Fixture::new(&[]);
    let psql = Arc::new(FakePsql::new());

    let summary = fixture
        .loader(fixture.config(), &psql)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.files, 0);
    assert_eq!(summary.exit_status(), ExitStatus::Warnings);
    assert!(psql.commands.lock().is_empty());
}

#[tokio::test]
async fn test_missing_input_fails_before_connecting() {
    let fixture = Fixture::new(&[]);
    let psql = Arc::new(FakePsql::new());
    let mut config = fixture.config();
    config.input = fixture.input.path().join("absent");

    let err = fixture.loader(config, &psql).run().await.unwrap_err();

    assert!(matches!(err, LoadError::Input(_)));
    assert!(psql.commands.lock().is_empty());
}

#[tokio::test]
async fn test_missing_client_environment_is_config_error() {
    let fixture = Fixture::new(&["a.bin"]);
    let psql = Arc::new(FakePsql::new());
    let env = Environment::from_pairs([("HOME", "/nonexistent")]);

    let err = fixture
        .loader_with(fixture.config(), env, RunContext::new(), &psql)
        .run()
        .await
        .unwrap_err();

    assert_eq!(
        err,
        LoadError::Config(
            "cannot find greenplum environment file: environment misconfigured".to_string()
        )
    );
    assert!(psql.commands.lock().is_empty());
}

#[tokio::test]
async fn test_invalid_tasks_is_config_error() {
    let fixture = Fixture::new(&["a.bin"]);
    let psql = Arc::new(FakePsql::new());
    let mut config = fixture.config();
    config.tasks = 0;

    let err = fixture.loader(config, &psql).run().await.unwrap_err();
    assert!(matches!(err, LoadError::Config(_)));
}

#[tokio::test]
async fn test_connection_failure_loads_nothing() {
    let fixture = Fixture::new(&["a.bin", "b.bin"]);
    let psql = Arc::new(FakePsql {
        probe_error: Some("psql: error: connection refused"),
        ..FakePsql::new()
    });

    let err = fixture
        .loader(fixture.config(), &psql)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Connection(_)));
    assert_eq!(psql.copies.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_password_reaches_every_command() {
    let fixture = Fixture::new(&["a.bin", "b.bin"]);
    let psql = Arc::new(FakePsql::new());
    let mut env_pairs = vec![
        ("GPHOME", fixture.gphome.path().to_str().unwrap().to_string()),
        ("PGPASSWORD", "s3cret".to_string()),
    ];
    env_pairs.push(("HOME", "/nonexistent".to_string()));
    let env = Environment::from_pairs(env_pairs);

    fixture
        .loader_with(fixture.config(), env, RunContext::new(), &psql)
        .run()
        .await
        .unwrap();

    let commands = psql.commands.lock();
    assert_eq!(commands.len(), 3);
    assert!(
        commands
            .iter()
            .all(|c| c.env.get("PGPASSWORD").map(String::as_str) == Some("s3cret"))
    );
}

#[tokio::test]
async fn test_killed_before_start() {
    let fixture = Fixture::new(&["a.bin"]);
    let psql = Arc::new(FakePsql::new());
    let ctx = RunContext::new();
    ctx.kill(SIGINT);

    let err = fixture
        .loader_with(fixture.config(), fixture.env(), ctx, &psql)
        .run()
        .await
        .unwrap_err();

    assert_eq!(err, LoadError::Interrupted(SIGINT));
    assert!(psql.commands.lock().is_empty());
}

#[tokio::test]
async fn test_signal_during_load_halts_pool() {
    let names: Vec<String> = (0..20).map(|i| format!("f{i:02}.bin")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let fixture = Fixture::new(&refs);
    let psql = Arc::new(FakePsql {
        delay: Duration::from_millis(50),
        ..FakePsql::new()
    });
    let ctx = RunContext::new();
    let mut config = fixture.config();
    config.tasks = 2;

    let killer = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            ctx.kill(SIGINT);
        })
    };
    let err = tokio::time::timeout(
        Duration::from_secs(10),
        fixture
            .loader_with(config, fixture.env(), ctx, &psql)
            .run(),
    )
    .await
    .unwrap()
    .unwrap_err();
    killer.await.unwrap();

    assert_eq!(err, LoadError::Interrupted(SIGINT));
    assert!(psql.copies.load(Ordering::SeqCst) < 20);
}

#[tokio::test]
async fn test_load_files_uses_given_worker_count() {
    let fixture = Fixture::new(&["a.bin", "b.bin", "c.bin"]);
    let psql = Arc::new(FakePsql::new());
    let loader = fixture.loader(fixture.config(), &psql);
    let input = collect_input_files(fixture.input.path()).unwrap();
    let builder = LoadCommandBuilder::new(
        fixture.gphome.path().join("greenplum_path.sh"),
        fixture.config().target,
    );

    let summary = loader.load_files(&builder, &input, 3).await.unwrap();

    assert_eq!(summary.workers, 3);
    assert_eq!(summary.loaded, 3);
    assert!(
        psql.commands
            .lock()
            .iter()
            .all(|c| Path::new(&c.args[2]).ends_with("greenplum_path.sh"))
    );
}
