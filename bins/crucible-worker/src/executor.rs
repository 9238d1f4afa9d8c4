/// Job Executor - Submission Lifecycle
///
/// **Responsibility:**
/// Own one submission from workspace creation through execution to
/// teardown: `Ready --prime--> Primed --execute--> Executed`, with
/// `cleanup` legal from any state.
///
/// **Architecture:**
/// 1. `prime` materialises the workspace on disk, owned by the job's
///    uid/gid (nothing else may share it; the path is keyed by UUID)
/// 2. `execute` drives the sandbox engine: one optional compile pass,
///    then one run per stdin payload
/// 3. `cleanup` removes the workspace and never fails the job
///
/// This module knows nothing about how a child is confined (engine's job)
/// or how outputs are judged (evaluator's job).

use crate::engine::{Sandbox, SandboxCall};
use crate::evaluator;
use crate::registry::Runtime;
use crucible_common::error::JudgeError;
use crucible_common::types::{JobRequest, RunResult};
use futures_util::future::join_all;
use nix::unistd::{chown, Gid, Uid};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Ready,
    Primed,
    Executed,
}

/// Raw results of the execute phase, handed to the evaluator.
///
/// `runs` is empty when compilation failed (runs are skipped) or when the
/// job carried no stdin payloads.
#[derive(Debug)]
pub struct ExecutionArtifacts {
    pub compile: Option<RunResult>,
    pub runs: Vec<RunResult>,
}

/// A single submission bound to a workspace and a sandbox identity.
///
/// A Job is single-owner: lifecycle transitions must not be driven from
/// concurrent contexts. The only internal parallelism is across test-case
/// invocations inside `execute`.
pub struct Job {
    pub id: Uuid,
    pub request: JobRequest,
    pub runtime: Runtime,
    uid: u32,
    gid: u32,
    workspace: PathBuf,
    state: JobState,
}

impl Job {
    pub fn new(request: JobRequest, runtime: Runtime, uid: u32, gid: u32, jobs_root: &Path) -> Self {
        let id = Uuid::new_v4();
        let workspace = jobs_root.join(id.to_string());
        Self {
            id,
            request,
            runtime,
            uid,
            gid,
            workspace,
            state: JobState::Ready,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Create the workspace and write every submitted file into it.
    ///
    /// The directory gets mode 0700 and, like every file below it, is
    /// chowned to the job's uid/gid so the sandboxed child can read its
    /// own sources and nothing else can.
    pub async fn prime(&mut self) -> Result<(), JudgeError> {
        if self.state != JobState::Ready {
            return Err(JudgeError::InvalidState(format!(
                "prime called in state {:?}",
                self.state
            )));
        }

        debug!(
            job_id = %self.id,
            workspace = %self.workspace.display(),
            "Priming workspace"
        );

        fs::create_dir_all(&self.workspace).await?;
        fs::set_permissions(&self.workspace, std::fs::Permissions::from_mode(0o700)).await?;
        self.chown_to_owner(&self.workspace)?;

        for file in &self.request.files {
            let content = file.decoded_content()?;
            let path = self.workspace.join(&file.name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&path, &content).await?;
            self.chown_to_owner(&path)?;
            // Intermediate directories of nested names belong to the job
            // owner as well.
            for dir in path.ancestors().skip(1) {
                if dir == self.workspace {
                    break;
                }
                self.chown_to_owner(dir)?;
            }
        }

        self.state = JobState::Primed;
        info!(job_id = %self.id, phase = "primed", files = self.request.files.len(), "Workspace primed");
        Ok(())
    }

    /// Run the compile phase (for compiled runtimes) and one sandboxed
    /// invocation per stdin payload.
    ///
    /// A failed compile skips the runs entirely; the evaluator turns the
    /// captured compile result into the final verdict. Dispatch is serial
    /// for java and parallel for everything else.
    pub async fn execute(&mut self, sandbox: &Sandbox) -> Result<ExecutionArtifacts, JudgeError> {
        if self.state != JobState::Primed {
            return Err(JudgeError::InvalidState(format!(
                "execute called in state {:?}",
                self.state
            )));
        }

        let env = self.child_env();

        let mut compile = None;
        if self.runtime.compiled {
            info!(job_id = %self.id, phase = "compile", "Compiling sources");
            let file_names: Vec<String> =
                self.request.files.iter().map(|f| f.name.clone()).collect();
            let result = sandbox
                .safe_call(SandboxCall {
                    exe: self.runtime.compile_script(),
                    argv: file_names,
                    timeout_ms: self.request.timeouts.compile,
                    stdin: String::new(),
                    env: env.clone(),
                    cwd: self.workspace.clone(),
                    uid: self.uid,
                    gid: self.gid,
                })
                .await?;

            let failed = evaluator::compile_failed(&result);
            compile = Some(result);
            if failed {
                warn!(job_id = %self.id, phase = "compile", "Compilation failed, skipping runs");
                self.state = JobState::Executed;
                return Ok(ExecutionArtifacts {
                    compile,
                    runs: Vec::new(),
                });
            }
        }

        let entry = self.run_entry_file();

        let runs = if self.runtime.language == "java" {
            // javac leaves shared class files in the workspace; concurrent
            // JVM invocations race on them, so java runs one case at a time.
            let mut runs = Vec::with_capacity(self.request.stdin.len());
            for stdin in &self.request.stdin {
                runs.push(self.run_case(sandbox, &entry, stdin, &env).await?);
            }
            runs
        } else {
            let job = &*self;
            let pending: Vec<_> = job
                .request
                .stdin
                .iter()
                .map(|stdin| job.run_case(sandbox, &entry, stdin, &env))
                .collect();
            join_all(pending)
                .await
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?
        };

        self.state = JobState::Executed;
        info!(
            job_id = %self.id,
            phase = "executed",
            runs = runs.len(),
            "All test cases executed"
        );
        Ok(ExecutionArtifacts { compile, runs })
    }

    /// Remove the workspace. Idempotent; failures are logged and swallowed
    /// so teardown never masks the job outcome.
    pub async fn cleanup(&self) {
        match fs::remove_dir_all(&self.workspace).await {
            Ok(()) => debug!(job_id = %self.id, "Workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    job_id = %self.id,
                    workspace = %self.workspace.display(),
                    error = %e,
                    "Failed to remove workspace"
                );
            }
        }
    }

    async fn run_case(
        &self,
        sandbox: &Sandbox,
        entry: &str,
        stdin: &str,
        env: &HashMap<String, String>,
    ) -> Result<RunResult, JudgeError> {
        let mut argv = Vec::with_capacity(1 + self.request.args.len());
        argv.push(entry.to_string());
        argv.extend(self.request.args.iter().cloned());

        sandbox
            .safe_call(SandboxCall {
                exe: self.runtime.run_script(),
                argv,
                timeout_ms: self.request.timeouts.run,
                stdin: stdin.to_string(),
                env: env.clone(),
                cwd: self.workspace.clone(),
                uid: self.uid,
                gid: self.gid,
            })
            .await
    }

    /// Compiled java runs on the class name, not the source file name.
    fn run_entry_file(&self) -> String {
        if self.runtime.language == "java" && self.runtime.compiled {
            if let Some(stripped) = self.request.main.strip_suffix(".java") {
                return stripped.to_string();
            }
        }
        self.request.main.clone()
    }

    fn child_env(&self) -> HashMap<String, String> {
        let mut env = self.runtime.env_vars.clone();
        env.insert("PISTON_ALIAS".to_string(), self.request.alias.clone());
        env
    }

    fn chown_to_owner(&self, path: &Path) -> Result<(), JudgeError> {
        chown(
            path,
            Some(Uid::from_raw(self.uid)),
            Some(Gid::from_raw(self.gid)),
        )
        .map_err(|e| JudgeError::Filesystem(format!("chown {}: {}", path.display(), e)))
    }
}
