//! End-to-end pipeline tests against fake process and ssh executors

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use autodeploy::deploy::context::JobContext;
use autodeploy::deploy::executor::{Components, Orchestrator, PipelineOptions};
use autodeploy::deploy::fsm::JobState;
use autodeploy::errors::{DeployError, ErrorKind};
use autodeploy::exec::process::{CommandOutput, CommandSpec, ProcessRunner};
use autodeploy::intake::analyzer::RepoAnalyzer;
use autodeploy::intake::classifier::KeywordClassifier;
use autodeploy::jobs::registry::JobRegistry;
use autodeploy::models::analysis::{Analysis, Framework};
use autodeploy::models::job::{JobId, JobLogLevel, JobSnapshot};
use autodeploy::remote::engine::{RemoteConfigEngine, RemoteOptions};
use autodeploy::remote::session::{RemoteSession, SessionConnector};
use autodeploy::storage::layout::WorkLayout;

const REPO_URL: &str = "https://github.com/acme/shop.git";
const APP_URL: &str = "https://abc123.us-east-1.awsapprunner.com";
const ECR_URL: &str = "123456789012.dkr.ecr.us-east-1.amazonaws.com/autodeploy-x";

fn output(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
        duration: Duration::from_millis(1),
    }
}

fn failed(stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(1),
        stdout: String::new(),
        stderr: stderr.to_string(),
        duration: Duration::from_millis(1),
    }
}

// ================================ FAKES ================================== //

/// Stands in for terraform, docker and aws
struct FakeRunner {
    calls: Mutex<Vec<CommandSpec>>,
    /// `terraform output -json` for the VM path; `None` means container path
    vm_outputs: Option<String>,
    pushed: AtomicBool,
}

impl FakeRunner {
    fn vm(outputs: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            vm_outputs: Some(outputs.to_string()),
            pushed: AtomicBool::new(false),
        }
    }

    fn container() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            vm_outputs: None,
            pushed: AtomicBool::new(false),
        }
    }

    fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.to_string()).collect()
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError> {
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }
        self.calls.lock().unwrap().push(spec.clone());

        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        let stdout = match (spec.program.as_str(), args.first().copied()) {
            ("terraform", Some("apply")) => {
                if args.contains(&"image_pushed=true") {
                    self.pushed.store(true, Ordering::SeqCst);
                }
                // The VM templates write the private key next to the terraform dir
                if let Some(job_root) = spec.cwd.as_deref().and_then(Path::parent) {
                    std::fs::write(job_root.join("ssh_key"), "PRIVATE KEY").unwrap();
                }
                String::new()
            }
            ("terraform", Some("output")) => match &self.vm_outputs {
                Some(outputs) => outputs.clone(),
                None => {
                    let app_url = if self.pushed.load(Ordering::SeqCst) {
                        APP_URL
                    } else {
                        ""
                    };
                    serde_json::json!({
                        "ecr_repo_url": {"value": ECR_URL, "type": "string", "sensitive": false},
                        "app_url": {"value": app_url, "type": "string", "sensitive": false},
                    })
                    .to_string()
                }
            },
            ("aws", Some("sts")) => "123456789012\n".to_string(),
            ("aws", Some("ecr")) => "registry-password\n".to_string(),
            _ => String::new(),
        };
        Ok(output(&stdout))
    }
}

/// Remote side shared by every session a connector hands out
#[derive(Default)]
struct Remote {
    commands: Mutex<Vec<Vec<String>>>,
    uploads: Mutex<Vec<(String, String)>>,
    closed: AtomicUsize,
    entry_points: Vec<String>,
    templates: Vec<String>,
    fail_when: Option<&'static str>,
    /// Matching commands hang until the job is cancelled
    block_when: Option<&'static str>,
}

impl Remote {
    fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }

    fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }

    fn ran(&self, args: &[&str]) -> bool {
        self.commands().iter().any(|c| c == args)
    }
}

struct FakeSession {
    host: String,
    user: String,
    remote: Arc<Remote>,
}

#[async_trait]
impl RemoteSession for FakeSession {
    fn host(&self) -> &str {
        &self.host
    }

    fn username(&self) -> &str {
        &self.user
    }

    async fn exec(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError> {
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }
        self.remote.commands.lock().unwrap().push(args.to_vec());

        let line = args.join(" ");
        if let Some(pattern) = self.remote.block_when {
            if line.contains(pattern) {
                cancel.cancelled().await;
                return Err(DeployError::Cancelled);
            }
        }
        if let Some(pattern) = self.remote.fail_when {
            if line.contains(pattern) {
                return Ok(failed("boom"));
            }
        }

        if args.first().map(String::as_str) == Some("find") {
            let found: Vec<&String> = if args.iter().any(|a| a == "-path") {
                self.remote.templates.iter().collect()
            } else {
                let name = args.last().map(String::as_str).unwrap_or_default();
                self.remote
                    .entry_points
                    .iter()
                    .filter(|e| Path::new(e).file_name().and_then(|n| n.to_str()) == Some(name))
                    .collect()
            };
            let stdout = found
                .iter()
                .map(|s| format!("{}\n", s))
                .collect::<String>();
            return Ok(output(&stdout));
        }
        Ok(output(""))
    }

    async fn upload(
        &self,
        contents: &str,
        remote_path: &str,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, DeployError> {
        self.remote
            .uploads
            .lock()
            .unwrap()
            .push((remote_path.to_string(), contents.to_string()));
        Ok(output(""))
    }

    async fn close(&mut self) -> Result<(), DeployError> {
        self.remote.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Accepts exactly one username
struct FakeConnector {
    accept: String,
    attempts: Mutex<Vec<String>>,
    remote: Arc<Remote>,
}

impl FakeConnector {
    fn new(accept: &str, remote: Remote) -> Self {
        Self {
            accept: accept.to_string(),
            attempts: Mutex::new(Vec::new()),
            remote: Arc::new(remote),
        }
    }

    fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(
        &self,
        host: &str,
        username: &str,
        key_path: &Path,
        _cancel: &CancellationToken,
    ) -> Result<Option<Box<dyn RemoteSession>>, DeployError> {
        assert!(key_path.exists(), "connecting without a key");
        self.attempts.lock().unwrap().push(username.to_string());
        if username != self.accept {
            return Ok(None);
        }
        Ok(Some(Box::new(FakeSession {
            host: host.to_string(),
            user: username.to_string(),
            remote: self.remote.clone(),
        })))
    }
}

/// Skips cloning and reports a fixed analysis
struct StaticAnalyzer {
    framework: Framework,
    port: u16,
    start_command: String,
}

impl StaticAnalyzer {
    fn flask() -> Self {
        Self {
            framework: Framework::Flask,
            port: 5000,
            start_command: "python3 app.py".to_string(),
        }
    }
}

#[async_trait]
impl RepoAnalyzer for StaticAnalyzer {
    async fn analyze(&self, ctx: &JobContext, repo_url: &str) -> Result<Analysis, DeployError> {
        Ok(Analysis {
            repo_path: ctx.paths().repo_dir(),
            repo_url: repo_url.to_string(),
            framework: self.framework,
            port: self.port,
            start_command: self.start_command.clone(),
        })
    }
}

// ================================ HELPERS ================================= //

fn fast_remote_options() -> RemoteOptions {
    RemoteOptions {
        key_poll_attempts: 3,
        key_poll_interval: Duration::from_millis(5),
        readiness_wait: Duration::ZERO,
        ..Default::default()
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    runner: Arc<FakeRunner>,
    connector: Arc<FakeConnector>,
    _work: TempDir,
}

fn harness(runner: FakeRunner, connector: FakeConnector, analyzer: StaticAnalyzer) -> Harness {
    harness_with(runner, connector, analyzer, fast_remote_options())
}

fn harness_with(
    runner: FakeRunner,
    connector: FakeConnector,
    analyzer: StaticAnalyzer,
    remote: RemoteOptions,
) -> Harness {
    let work = tempfile::tempdir().unwrap();
    let runner = Arc::new(runner);
    let connector = Arc::new(connector);
    let options = PipelineOptions {
        layout: WorkLayout::new(work.path()),
        remote,
        ..Default::default()
    };
    let components = Components {
        runner: runner.clone(),
        connector: connector.clone(),
        classifier: Arc::new(KeywordClassifier),
        analyzer: Arc::new(analyzer),
    };
    let orchestrator =
        Orchestrator::with_components(options, Arc::new(JobRegistry::new()), components).unwrap();
    Harness {
        orchestrator: Arc::new(orchestrator),
        runner,
        connector,
        _work: work,
    }
}

fn vm_outputs(ip: &str) -> String {
    serde_json::json!({
        "public_ip": {"value": ip, "type": "string", "sensitive": false}
    })
    .to_string()
}

fn flask_remote(user: &str) -> Remote {
    Remote {
        entry_points: vec![format!("/home/{user}/shop/app/app.py")],
        templates: vec![format!("/home/{user}/shop/app/templates/index.html")],
        ..Default::default()
    }
}

async fn wait_terminal(orchestrator: &Orchestrator, id: &JobId) -> JobSnapshot {
    for _ in 0..400 {
        let job = orchestrator.status(id).unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {id} did not finish");
}

// ================================= TESTS ================================== //

#[tokio::test]
async fn test_aws_vm_flask_deploys_to_public_ip() {
    let h = harness(
        FakeRunner::vm(&vm_outputs("1.2.3.4")),
        FakeConnector::new("ec2-user", flask_remote("ec2-user")),
        StaticAnalyzer::flask(),
    );
    let id = JobId::from("job-a");

    let outcome = h
        .orchestrator
        .run(&id, "deploy my flask app on an aws vm", REPO_URL)
        .await
        .unwrap();
    assert_eq!(outcome.url, "http://1.2.3.4:5000");
    assert_eq!(outcome.public_ip.as_deref(), Some("1.2.3.4"));

    let job = h.orchestrator.status(&id).unwrap();
    assert_eq!(job.status, JobState::Succeeded);
    assert_eq!(job.result, Some(outcome));

    // terraform ran init, apply, output in the job's terraform dir
    let terraform: Vec<String> = h
        .runner
        .calls()
        .into_iter()
        .filter(|c| c.program == "terraform")
        .map(|c| c.args[0].clone())
        .collect();
    assert_eq!(terraform, vec!["init", "apply", "output"]);

    let remote = &h.connector.remote;
    assert!(remote.ran(&["git", "clone", "--", REPO_URL, "/home/ec2-user/shop"]));
    assert!(remote.ran(&[
        "sudo",
        "sed",
        "-i",
        "-e",
        r"s/127\.0\.0\.1/0.0.0.0/g",
        "-e",
        "s/localhost/0.0.0.0/g",
        "/home/ec2-user/shop/app/app.py",
    ]));
    assert!(remote.ran(&[
        "sudo",
        "sed",
        "-i",
        "-e",
        r"s/127\.0\.0\.1/1.2.3.4/g",
        "-e",
        "s/localhost/1.2.3.4/g",
        "/home/ec2-user/shop/app/templates/index.html",
    ]));
    assert!(remote.ran(&["sudo", "systemctl", "restart", "autodeploy-job-a.service"]));

    let uploads = remote.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, "/home/ec2-user/autodeploy-job-a.service");
    assert!(uploads[0].1.contains("User=ec2-user\n"));
    assert!(uploads[0].1.contains("WorkingDirectory=/home/ec2-user/shop/app\n"));
    assert!(uploads[0].1.contains("ExecStart=python3 app.py\n"));

    assert_eq!(remote.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_third_username_is_used_everywhere() {
    let h = harness(
        FakeRunner::vm(&vm_outputs("5.6.7.8")),
        FakeConnector::new("debian", flask_remote("debian")),
        StaticAnalyzer::flask(),
    );
    let id = JobId::from("job-gcp");

    h.orchestrator
        .run(&id, "deploy to google compute", REPO_URL)
        .await
        .unwrap();

    assert_eq!(h.connector.attempts(), vec!["ec2-user", "ubuntu", "debian"]);

    let remote = &h.connector.remote;
    for command in remote.commands() {
        let line = command.join(" ");
        assert!(!line.contains("/home/ec2-user"), "{line}");
        assert!(!line.contains("/home/ubuntu"), "{line}");
    }
    assert!(remote.ran(&["git", "clone", "--", REPO_URL, "/home/debian/shop"]));

    let uploads = remote.uploads();
    assert_eq!(uploads[0].0, "/home/debian/autodeploy-job-gcp.service");
    assert!(uploads[0].1.contains("User=debian\n"));
}

#[tokio::test]
async fn test_no_valid_username_fails_job() {
    let h = harness(
        FakeRunner::vm(&vm_outputs("5.6.7.8")),
        FakeConnector::new("root", Remote::default()),
        StaticAnalyzer::flask(),
    );
    let id = JobId::from("job-nocred");

    let err = h
        .orchestrator
        .run(&id, "aws vm", REPO_URL)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::NoValidCredential { .. }));

    let job = h.orchestrator.status(&id).unwrap();
    assert_eq!(job.status, JobState::Failed);
    assert_eq!(job.error.unwrap().kind, ErrorKind::NoValidCredential);
    assert_eq!(h.connector.attempts().len(), 3);
}

#[tokio::test]
async fn test_app_runner_uses_url_from_second_apply() {
    let h = harness(
        FakeRunner::container(),
        FakeConnector::new("ec2-user", Remote::default()),
        StaticAnalyzer::flask(),
    );
    let id = JobId::from("job-b");

    let outcome = h
        .orchestrator
        .run(&id, "aws serverless container", REPO_URL)
        .await
        .unwrap();
    assert_eq!(outcome.url, APP_URL);

    let lines = h.runner.command_lines();
    let position = |needle: &str| {
        lines
            .iter()
            .position(|l| l.starts_with(needle))
            .unwrap_or_else(|| panic!("missing `{needle}` in {lines:?}"))
    };

    let build = position("docker build -t autodeploy-app:latest .");
    let login = position("docker login --username AWS --password-stdin 123456789012.dkr.ecr.us-east-1.amazonaws.com");
    let first_apply = position("terraform apply");
    let tag = position(&format!("docker tag autodeploy-app:latest {ECR_URL}:latest"));
    let push = position(&format!("docker push {ECR_URL}:latest"));
    let second_apply = lines
        .iter()
        .position(|l| l.contains("image_pushed=true"))
        .unwrap();
    assert!(build < login && login < first_apply && first_apply < tag);
    assert!(tag < push && push < second_apply);

    // The registry password only ever travels on stdin
    let calls = h.runner.calls();
    let login_call = &calls[login];
    assert_eq!(
        login_call.stdin.as_ref().map(|s| s.expose_secret().to_string()),
        Some("registry-password".to_string())
    );
    assert!(lines.iter().all(|l| !l.contains("registry-password")));

    // No ssh for the container path
    assert!(h.connector.attempts().is_empty());
    assert_eq!(
        h.orchestrator.status(&id).unwrap().status,
        JobState::Succeeded
    );
}

#[tokio::test]
async fn test_missing_entry_point_only_warns() {
    let remote = Remote {
        entry_points: Vec::new(),
        ..Default::default()
    };
    let h = harness(
        FakeRunner::vm(&vm_outputs("1.2.3.4")),
        FakeConnector::new("ubuntu", remote),
        StaticAnalyzer::flask(),
    );
    let id = JobId::from("job-c");

    h.orchestrator.run(&id, "aws vm", REPO_URL).await.unwrap();

    let job = h.orchestrator.status(&id).unwrap();
    assert_eq!(job.status, JobState::Succeeded);
    assert!(job
        .logs
        .iter()
        .any(|l| l.level == JobLogLevel::Warn && l.message.contains("Entry point not found")));
    assert!(h
        .connector
        .remote
        .ran(&["sudo", "systemctl", "restart", "autodeploy-job-c.service"]));
}

#[tokio::test]
async fn test_missing_address_never_connects() {
    let outputs = serde_json::json!({
        "instance_id": {"value": "i-123", "type": "string", "sensitive": false}
    })
    .to_string();
    let h = harness(
        FakeRunner::vm(&outputs),
        FakeConnector::new("ec2-user", Remote::default()),
        StaticAnalyzer::flask(),
    );
    let id = JobId::from("job-noip");

    let err = h.orchestrator.run(&id, "aws vm", REPO_URL).await.unwrap_err();
    assert!(matches!(err, DeployError::ProvisioningIncomplete { .. }));
    assert!(h.connector.attempts().is_empty());

    let job = h.orchestrator.status(&id).unwrap();
    assert_eq!(job.status, JobState::Failed);
    assert_eq!(job.error.unwrap().kind, ErrorKind::ProvisioningIncomplete);
}

#[tokio::test]
async fn test_unsupported_provider_fails_before_provisioning() {
    let h = harness(
        FakeRunner::vm(&vm_outputs("1.2.3.4")),
        FakeConnector::new("ec2-user", Remote::default()),
        StaticAnalyzer::flask(),
    );
    let id = JobId::from("job-azure");

    let err = h.orchestrator.run(&id, "azure vm", REPO_URL).await.unwrap_err();
    assert!(matches!(err, DeployError::UnsupportedConfiguration { .. }));
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn test_service_install_failure_closes_session() {
    let remote = Remote {
        fail_when: Some("systemctl restart"),
        ..flask_remote("ec2-user")
    };
    let h = harness(
        FakeRunner::vm(&vm_outputs("1.2.3.4")),
        FakeConnector::new("ec2-user", remote),
        StaticAnalyzer::flask(),
    );
    let id = JobId::from("job-svc");

    let err = h.orchestrator.run(&id, "aws vm", REPO_URL).await.unwrap_err();
    match err {
        DeployError::ServiceInstallFailed { step, output } => {
            assert_eq!(step, "restart");
            assert_eq!(output, "boom");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.connector.remote.closed.load(Ordering::SeqCst), 1);

    let job = h.orchestrator.status(&id).unwrap();
    let stages: Vec<&str> = job
        .logs
        .iter()
        .filter(|l| l.message.starts_with("Remote stage: "))
        .map(|l| l.message.as_str())
        .collect();
    assert_eq!(stages.last(), Some(&"Remote stage: failed"));
    assert!(!stages.contains(&"Remote stage: done"));
}

#[tokio::test]
async fn test_bootstrap_failures_are_tolerated() {
    let remote = Remote {
        fail_when: Some("apt-get"),
        ..flask_remote("ec2-user")
    };
    let h = harness(
        FakeRunner::vm(&vm_outputs("1.2.3.4")),
        FakeConnector::new("ec2-user", remote),
        StaticAnalyzer::flask(),
    );
    let id = JobId::from("job-apt");

    h.orchestrator.run(&id, "aws vm", REPO_URL).await.unwrap();
    let job = h.orchestrator.status(&id).unwrap();
    let warnings = job
        .logs
        .iter()
        .filter(|l| l.level == JobLogLevel::Warn && l.message.contains("Bootstrap step"))
        .count();
    assert_eq!(warnings, 4);
}

#[tokio::test]
async fn test_flask_run_start_command_is_normalized() {
    let h = harness(
        FakeRunner::vm(&vm_outputs("1.2.3.4")),
        FakeConnector::new("ec2-user", flask_remote("ec2-user")),
        StaticAnalyzer {
            framework: Framework::Flask,
            port: 0,
            start_command: "flask run".to_string(),
        },
    );
    let id = JobId::from("job-flask");

    let outcome = h.orchestrator.run(&id, "aws vm", REPO_URL).await.unwrap();
    assert_eq!(outcome.url, "http://1.2.3.4:5000");

    let unit = &h.connector.remote.uploads()[0].1;
    assert!(unit.contains("ExecStart=flask run --host=0.0.0.0 --port=5000\n"));
    assert!(unit.contains("Environment=PORT=5000\n"));
}

#[tokio::test]
async fn test_cancel_during_readiness_wait() {
    let h = harness_with(
        FakeRunner::vm(&vm_outputs("1.2.3.4")),
        FakeConnector::new("ec2-user", Remote::default()),
        StaticAnalyzer::flask(),
        RemoteOptions {
            readiness_wait: Duration::from_secs(600),
            ..fast_remote_options()
        },
    );

    let id = h.orchestrator.submit("aws vm", REPO_URL).unwrap();
    for _ in 0..400 {
        let job = h.orchestrator.status(&id).unwrap();
        if job.logs.iter().any(|l| l.message.contains("awaiting_connectivity")) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.orchestrator.cancel(&id));

    let job = wait_terminal(&h.orchestrator, &id).await;
    assert_eq!(job.status, JobState::Failed);
    assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);
    assert!(h.connector.attempts().is_empty());
    assert!(!h.orchestrator.cancel(&id));
}

#[tokio::test]
async fn test_shutdown_waits_for_sessions_to_close() {
    let remote = Remote {
        block_when: Some("apt-get update"),
        ..flask_remote("ec2-user")
    };
    let h = harness(
        FakeRunner::vm(&vm_outputs("1.2.3.4")),
        FakeConnector::new("ec2-user", remote),
        StaticAnalyzer::flask(),
    );

    let id = h.orchestrator.submit("aws vm", REPO_URL).unwrap();
    for _ in 0..400 {
        if h.connector.remote.ran(&["sudo", "apt-get", "update", "-y"]) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.connector.remote.ran(&["sudo", "apt-get", "update", "-y"]));
    assert_eq!(h.connector.remote.closed.load(Ordering::SeqCst), 0);

    h.orchestrator.shutdown().await;

    // Nothing left to wait for: the job finished and released its session
    assert_eq!(h.connector.remote.closed.load(Ordering::SeqCst), 1);
    let job = h.orchestrator.status(&id).unwrap();
    assert_eq!(job.status, JobState::Failed);
    assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_submit_returns_immediately_and_jobs_are_isolated() {
    let h = harness(
        FakeRunner::vm(&vm_outputs("1.2.3.4")),
        FakeConnector::new("ec2-user", flask_remote("ec2-user")),
        StaticAnalyzer::flask(),
    );

    let a = h.orchestrator.submit("aws vm", REPO_URL).unwrap();
    let b = h.orchestrator.submit("aws vm", REPO_URL).unwrap();
    assert_ne!(a, b);

    let job_a = wait_terminal(&h.orchestrator, &a).await;
    let job_b = wait_terminal(&h.orchestrator, &b).await;
    assert_eq!(job_a.status, JobState::Succeeded);
    assert_eq!(job_b.status, JobState::Succeeded);

    let mut paths: Vec<String> = h
        .connector
        .remote
        .uploads()
        .into_iter()
        .map(|(path, _)| path)
        .collect();
    paths.sort();
    let mut expected = vec![
        format!("/home/ec2-user/autodeploy-{a}.service"),
        format!("/home/ec2-user/autodeploy-{b}.service"),
    ];
    expected.sort();
    assert_eq!(paths, expected);
}

// ============================ REMOTE ENGINE ============================== //

fn engine_context(work: &TempDir, id: &str) -> JobContext {
    let registry = Arc::new(JobRegistry::new());
    let id = JobId::from(id);
    registry.create(&id).unwrap();
    let paths = WorkLayout::new(work.path()).job(&id);
    std::fs::create_dir_all(paths.root()).unwrap();
    JobContext::new(id, paths, registry, CancellationToken::new())
}

fn flask_analysis() -> Analysis {
    Analysis {
        repo_path: "repo".into(),
        repo_url: REPO_URL.to_string(),
        framework: Framework::Flask,
        port: 5000,
        start_command: "python3 app.py".to_string(),
    }
}

#[tokio::test]
async fn test_service_install_is_idempotent() {
    let work = tempfile::tempdir().unwrap();
    let ctx = engine_context(&work, "job-1");
    std::fs::write(ctx.paths().ssh_key_file(), "KEY").unwrap();

    let connector = Arc::new(FakeConnector::new("ubuntu", flask_remote("ubuntu")));
    let engine = RemoteConfigEngine::new(connector.clone(), fast_remote_options());

    let first = engine.configure(&ctx, "1.2.3.4", &flask_analysis()).await.unwrap();
    let second = engine.configure(&ctx, "1.2.3.4", &flask_analysis()).await.unwrap();
    assert_eq!(first, second);

    let uploads = connector.remote.uploads();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0], uploads[1]);
    assert_eq!(uploads[0].0, "/home/ubuntu/autodeploy-job-1.service");

    let restarts = connector
        .remote
        .commands()
        .iter()
        .filter(|c| c.join(" ") == "sudo systemctl restart autodeploy-job-1.service")
        .count();
    assert_eq!(restarts, 2);
    assert_eq!(connector.remote.closed.load(Ordering::SeqCst), 2);
}

fn removed_checkouts(remote: &Remote) -> Vec<String> {
    remote
        .commands()
        .into_iter()
        .filter(|c| c.len() == 3 && c[0] == "rm" && c[1] == "-rf")
        .map(|c| c[2].clone())
        .collect()
}

#[tokio::test]
async fn test_checkout_stays_below_home() {
    let cases = [
        ("file:///srv/git/shop/.git", "/home/ubuntu/shop"),
        ("https://host/group/.git", "/home/ubuntu/group"),
        ("https://host/", "/home/ubuntu/autodeploy-job-4"),
        ("https://host/.git", "/home/ubuntu/autodeploy-job-4"),
    ];

    for (repo_url, expected) in cases {
        let work = tempfile::tempdir().unwrap();
        let ctx = engine_context(&work, "job-4");
        std::fs::write(ctx.paths().ssh_key_file(), "KEY").unwrap();

        let connector = Arc::new(FakeConnector::new("ubuntu", Remote::default()));
        let engine = RemoteConfigEngine::new(connector.clone(), fast_remote_options());
        let analysis = Analysis {
            repo_url: repo_url.to_string(),
            ..flask_analysis()
        };
        engine.configure(&ctx, "1.2.3.4", &analysis).await.unwrap();

        let removed = removed_checkouts(&connector.remote);
        assert_eq!(removed, vec![expected.to_string()], "{repo_url}");

        let name = removed[0].strip_prefix("/home/ubuntu/").unwrap();
        assert!(!name.is_empty() && !name.contains('/'), "{repo_url}");
        assert!(name != "." && name != "..", "{repo_url}");
        assert!(connector
            .remote
            .ran(&["git", "clone", "--", repo_url, expected]));
    }
}

#[tokio::test]
async fn test_key_found_in_nested_terraform_path() {
    let work = tempfile::tempdir().unwrap();
    let ctx = engine_context(&work, "job-2");
    let nested = ctx.paths().nested_ssh_key_file();
    std::fs::create_dir_all(nested.parent().unwrap()).unwrap();
    std::fs::write(&nested, "KEY").unwrap();

    let connector = Arc::new(FakeConnector::new("ec2-user", flask_remote("ec2-user")));
    let engine = RemoteConfigEngine::new(connector.clone(), fast_remote_options());
    engine.configure(&ctx, "1.2.3.4", &flask_analysis()).await.unwrap();
    assert_eq!(connector.attempts(), vec!["ec2-user"]);
}

#[tokio::test]
async fn test_missing_key_fails_without_connecting() {
    let work = tempfile::tempdir().unwrap();
    let ctx = engine_context(&work, "job-3");

    let connector = Arc::new(FakeConnector::new("ec2-user", Remote::default()));
    let engine = RemoteConfigEngine::new(connector.clone(), fast_remote_options());

    let err = engine
        .configure(&ctx, "1.2.3.4", &flask_analysis())
        .await
        .unwrap_err();
    match err {
        DeployError::KeyNotFound { tried } => {
            assert_eq!(tried, vec![ctx.paths().ssh_key_file(), ctx.paths().nested_ssh_key_file()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(connector.attempts().is_empty());
}
