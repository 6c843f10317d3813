//! Test utilities for pibake-lib.
//!
//! [`StubExecutor`] stands in for a build host. It keeps an in-memory
//! filesystem, records every call, and can be told to fail commands or drop
//! the connection a given number of times.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use crate::executor::{CommandOutput, ExecError, RemoteExecutor};

/// Executor primitive, used to target injected connection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
  Run,
  Write,
  Exists,
}

/// One recorded executor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
  Run {
    command: String,
    working_dir: Option<String>,
  },
  Write {
    path: String,
    content: String,
    mode: Option<u32>,
  },
  Exists {
    path: String,
  },
  Reconnect,
}

#[derive(Default)]
struct State {
  files: BTreeMap<String, Vec<u8>>,
  dirs: BTreeSet<String>,
  calls: Vec<Call>,
  failures: Vec<(String, i32)>,
  lost: HashMap<Op, u32>,
}

type RunHook = Box<dyn Fn(&str) + Send + Sync>;

/// In-memory build host.
///
/// Understands `mkdir -p` and `cp -p` well enough for the backup and
/// existence-check paths; every other command succeeds without effect.
#[derive(Default)]
pub struct StubExecutor {
  state: Mutex<State>,
  on_run: Option<RunHook>,
}

impl StubExecutor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_file(self, path: &str, content: &str) -> Self {
    self.lock().files.insert(path.to_string(), content.as_bytes().to_vec());
    self
  }

  pub fn with_dir(self, path: &str) -> Self {
    self.lock().dirs.insert(path.to_string());
    self
  }

  /// Any command containing `pattern` exits with `code`.
  pub fn fail_command(self, pattern: &str, code: i32) -> Self {
    self.lock().failures.push((pattern.to_string(), code));
    self
  }

  /// The next `times` calls of `op` report a lost connection.
  pub fn lose_connection(self, op: Op, times: u32) -> Self {
    self.lock().lost.insert(op, times);
    self
  }

  /// Called with every command line before it runs.
  pub fn on_run(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
    self.on_run = Some(Box::new(hook));
    self
  }

  pub fn file(&self, path: &str) -> Option<String> {
    self
      .lock()
      .files
      .get(path)
      .map(|bytes| String::from_utf8_lossy(bytes).to_string())
  }

  pub fn has_dir(&self, path: &str) -> bool {
    self.lock().dirs.contains(path)
  }

  pub fn calls(&self) -> Vec<Call> {
    self.lock().calls.clone()
  }

  /// Command lines run so far, in order.
  pub fn commands(&self) -> Vec<String> {
    self
      .calls()
      .into_iter()
      .filter_map(|c| match c {
        Call::Run { command, .. } => Some(command),
        _ => None,
      })
      .collect()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, State> {
    self.state.lock().unwrap()
  }

  fn take_lost(&self, op: Op) -> Result<(), ExecError> {
    let mut state = self.lock();
    match state.lost.get_mut(&op) {
      Some(remaining) if *remaining > 0 => {
        *remaining -= 1;
        Err(ExecError::ConnectionLost {
          host: "stub".to_string(),
          message: "connection reset by peer".to_string(),
        })
      }
      _ => Ok(()),
    }
  }
}

fn absolute(path: &str, working_dir: Option<&str>) -> String {
  match working_dir {
    Some(dir) if !path.starts_with('/') => format!("{}/{}", dir.trim_end_matches('/'), path),
    _ => path.to_string(),
  }
}

impl State {
  fn exists(&self, path: &str) -> bool {
    let prefix = format!("{}/", path.trim_end_matches('/'));
    self.files.contains_key(path)
      || self.dirs.contains(path)
      || self.files.keys().any(|f| f.starts_with(&prefix))
      || self.dirs.iter().any(|d| d.starts_with(&prefix))
  }

  fn simulate(&mut self, command: &str, working_dir: Option<&str>) {
    let words: Vec<&str> = command.split_whitespace().collect();
    match words.as_slice() {
      ["mkdir", "-p", paths @ ..] => {
        for path in paths {
          self.dirs.insert(absolute(path, working_dir));
        }
      }
      ["cp", "-p", src, dst] => {
        let src = absolute(src, working_dir);
        if let Some(bytes) = self.files.get(&src).cloned() {
          self.files.insert(absolute(dst, working_dir), bytes);
        }
      }
      _ => {}
    }
  }
}

impl RemoteExecutor for StubExecutor {
  fn describe(&self) -> String {
    "stub".to_string()
  }

  async fn execute(&self, command: &str, working_dir: Option<&str>) -> Result<CommandOutput, ExecError> {
    if let Some(hook) = &self.on_run {
      hook(command);
    }
    self.lock().calls.push(Call::Run {
      command: command.to_string(),
      working_dir: working_dir.map(str::to_string),
    });
    self.take_lost(Op::Run)?;

    let mut state = self.lock();
    let failure = state
      .failures
      .iter()
      .find(|(pattern, _)| command.contains(pattern.as_str()))
      .map(|(_, code)| *code);

    if let Some(code) = failure {
      return Ok(CommandOutput {
        stdout: String::new(),
        stderr: format!("stub failure for {command}"),
        exit_code: Some(code),
      });
    }

    state.simulate(command, working_dir);
    Ok(CommandOutput::success(""))
  }

  async fn write_file(&self, bytes: &[u8], remote_path: &str, mode: Option<u32>) -> Result<(), ExecError> {
    self.lock().calls.push(Call::Write {
      path: remote_path.to_string(),
      content: String::from_utf8_lossy(bytes).to_string(),
      mode,
    });
    self.take_lost(Op::Write)?;
    self.lock().files.insert(remote_path.to_string(), bytes.to_vec());
    Ok(())
  }

  async fn path_exists(&self, path: &str) -> Result<bool, ExecError> {
    self.lock().calls.push(Call::Exists { path: path.to_string() });
    self.take_lost(Op::Exists)?;
    Ok(self.lock().exists(path))
  }

  async fn reconnect(&self) -> Result<(), ExecError> {
    self.lock().calls.push(Call::Reconnect);
    Ok(())
  }
}

/// Process id and process group id from a `/proc/<pid>/stat` line.
pub fn proc_stat_ids(stat: &str) -> (u32, u32) {
  let pid = stat.split_whitespace().next().unwrap().parse().unwrap();
  // The command name may contain spaces; fields after it are fixed.
  let rest = &stat[stat.rfind(')').unwrap() + 1..];
  let group = rest.split_whitespace().nth(2).unwrap().parse().unwrap();
  (pid, group)
}
