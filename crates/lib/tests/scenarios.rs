//! End-to-end pipeline scenarios against an in-memory build host.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use pibake_lib::executor::{CommandOutput, ExecError, RemoteExecutor, RetryPolicy, RetryingExecutor};
use pibake_lib::pipeline::{CancelSignal, Pipeline, PipelineStatus, Step, StepContext, StepStatus};
use pibake_lib::session::{BuildLayout, BuildSession};
use pibake_lib::template::{MemoryTemplateStore, TemplateSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
  Run { command: String, cwd: Option<String> },
  Upload { path: String, content: String },
}

/// Records runs and uploads; can drop the connection on the next writes.
#[derive(Default)]
struct FakeHost {
  events: Mutex<Vec<Event>>,
  files: Mutex<BTreeMap<String, String>>,
  drop_writes: Mutex<u32>,
  failing: Vec<String>,
}

impl FakeHost {
  fn dropping_writes(times: u32) -> Self {
    Self {
      drop_writes: Mutex::new(times),
      ..Self::default()
    }
  }

  fn failing(command: &str) -> Self {
    Self {
      failing: vec![command.to_string()],
      ..Self::default()
    }
  }

  fn events(&self) -> Vec<Event> {
    self.events.lock().unwrap().clone()
  }
}

impl RemoteExecutor for FakeHost {
  fn describe(&self) -> String {
    "fake".to_string()
  }

  async fn execute(&self, command: &str, working_dir: Option<&str>) -> Result<CommandOutput, ExecError> {
    self.events.lock().unwrap().push(Event::Run {
      command: command.to_string(),
      cwd: working_dir.map(str::to_string),
    });
    let exit_code = if self.failing.iter().any(|f| f == command) { 1 } else { 0 };
    Ok(CommandOutput {
      exit_code: Some(exit_code),
      ..CommandOutput::default()
    })
  }

  async fn write_file(&self, bytes: &[u8], remote_path: &str, _mode: Option<u32>) -> Result<(), ExecError> {
    {
      let mut remaining = self.drop_writes.lock().unwrap();
      if *remaining > 0 {
        *remaining -= 1;
        return Err(ExecError::ConnectionLost {
          host: "fake".to_string(),
          message: "broken pipe".to_string(),
        });
      }
    }
    let content = String::from_utf8_lossy(bytes).to_string();
    self.events.lock().unwrap().push(Event::Upload {
      path: remote_path.to_string(),
      content: content.clone(),
    });
    self.files.lock().unwrap().insert(remote_path.to_string(), content);
    Ok(())
  }

  async fn path_exists(&self, path: &str) -> Result<bool, ExecError> {
    Ok(self.files.lock().unwrap().contains_key(path))
  }
}

fn session() -> BuildSession {
  BuildSession::with_id(&BuildLayout::default(), "20150901120000")
}

fn templates() -> MemoryTemplateStore {
  MemoryTemplateStore::new().with("X", "hostname=$${name} build=$${id}\n")
}

/// mkdir /a, upload template X to /a/f, archive /a.
fn three_steps() -> Pipeline {
  Pipeline::new()
    .step(Step::new("mkdir").run("mkdir -p /a"))
    .step(Step::new("upload").upload(TemplateSpec::new("X", "/a/f").with_var("name", "node-1")))
    .step(Step::new("archive").archive("/", "a"))
}

fn statuses(report: &pibake_lib::pipeline::PipelineReport) -> Vec<StepStatus> {
  report.steps.iter().map(|s| s.status).collect()
}

#[tokio::test]
async fn mkdir_upload_archive_completes() {
  let host = FakeHost::default();
  let store = templates();
  let session = session();
  let ctx = StepContext::new(&host, &store, &session);

  let report = three_steps().run(&ctx, &CancelSignal::never()).await;

  assert_eq!(report.status(), PipelineStatus::Completed);
  assert_eq!(statuses(&report), vec![StepStatus::Succeeded; 3]);
  assert_eq!(
    host.events(),
    vec![
      Event::Run {
        command: "mkdir -p /a".to_string(),
        cwd: None,
      },
      Event::Upload {
        path: "/a/f".to_string(),
        content: "hostname=node-1 build=20150901120000\n".to_string(),
      },
      Event::Run {
        command: "tar czf a.tar.gz a".to_string(),
        cwd: Some("/".to_string()),
      },
    ]
  );
}

#[tokio::test]
async fn upload_survives_one_dropped_connection() {
  let host = RetryingExecutor::new(
    FakeHost::dropping_writes(1),
    RetryPolicy {
      max_attempts: 3,
      initial_backoff: Duration::from_millis(1),
      max_backoff: Duration::from_millis(10),
    },
  );
  let store = templates();
  let session = session();
  let ctx = StepContext::new(&host, &store, &session);

  let report = three_steps().run(&ctx, &CancelSignal::never()).await;

  assert_eq!(report.status(), PipelineStatus::Completed);
  assert_eq!(report.step("upload").map(|s| s.status), Some(StepStatus::Succeeded));
  assert_eq!(host.retries(), 1);
  assert_eq!(
    host
      .inner()
      .events()
      .iter()
      .filter(|e| matches!(e, Event::Upload { .. }))
      .count(),
    1
  );
}

#[tokio::test]
async fn dropped_connection_beyond_budget_aborts() {
  let host = RetryingExecutor::new(
    FakeHost::dropping_writes(5),
    RetryPolicy {
      max_attempts: 2,
      initial_backoff: Duration::from_millis(1),
      max_backoff: Duration::from_millis(10),
    },
  );
  let store = templates();
  let session = session();
  let ctx = StepContext::new(&host, &store, &session);

  let report = three_steps().run(&ctx, &CancelSignal::never()).await;

  assert_eq!(report.status(), PipelineStatus::Aborted);
  assert_eq!(
    statuses(&report),
    vec![StepStatus::Succeeded, StepStatus::Failed, StepStatus::Pending]
  );
  let (name, err) = report.failed.as_ref().unwrap();
  assert_eq!(name, "upload");
  assert!(err.is_connection_failure());
}

#[tokio::test]
async fn best_effort_failure_still_completes() {
  let host = FakeHost::failing("/tmp/compile_gateway_iotlab.sh");
  let store = templates();
  let session = session();
  let ctx = StepContext::new(&host, &store, &session);
  let pipeline = Pipeline::new()
    .step(Step::new("mkdir").run("mkdir -p /a"))
    .step(Step::new("gateway/compile").run("/tmp/compile_gateway_iotlab.sh").best_effort())
    .step(Step::new("archive").archive("/", "a"));

  let report = pipeline.run(&ctx, &CancelSignal::never()).await;

  assert_eq!(report.status(), PipelineStatus::Completed);
  assert_eq!(
    statuses(&report),
    vec![StepStatus::Succeeded, StepStatus::Failed, StepStatus::Succeeded]
  );
  assert_eq!(report.best_effort_failures()[0].name, "gateway/compile");
}

#[tokio::test]
async fn unbound_template_variable_uploads_nothing() {
  let host = FakeHost::default();
  let store = templates();
  let session = session();
  let ctx = StepContext::new(&host, &store, &session);
  // No `name` in the context.
  let pipeline = Pipeline::new().step(Step::new("upload").upload(TemplateSpec::new("X", "/a/f")));

  let report = pipeline.run(&ctx, &CancelSignal::never()).await;

  assert_eq!(report.status(), PipelineStatus::Aborted);
  assert!(host.events().is_empty());
}
