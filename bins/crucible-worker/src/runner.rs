/// Judge Runner - Submission Facade
///
/// **Responsibility:**
/// The one inbound operation: take a wire-level job request, produce a
/// wire-level response with an adjudicated verdict.
///
/// **Architecture:**
/// 1. Validate the request; bad specs are rejected before a job exists
/// 2. Resolve the runtime and allocate a sandbox identity
/// 3. Drive the job lifecycle (prime, execute) and adjudicate
/// 4. Clean the workspace up on every path, success or failure
///
/// Structural failures after the job exists (spawn or filesystem errors)
/// become an ERROR verdict rather than propagating to the caller.

use crate::evaluator;
use crate::executor::{ExecutionArtifacts, Job};
use crate::engine::Sandbox;
use crate::pool::IdentityPool;
use crate::registry::{Runtime, RuntimeRegistry};
use crucible_common::error::JudgeError;
use crucible_common::types::{JobRequest, JobResponse, Verdict, VerdictStatus};
use crucible_common::Settings;
use std::path::{Component, Path};
use tracing::{error, info};

pub struct JudgeRunner {
    settings: Settings,
    registry: RuntimeRegistry,
    pool: IdentityPool,
    sandbox: Sandbox,
}

impl JudgeRunner {
    pub fn new(settings: Settings, registry: RuntimeRegistry) -> Self {
        let pool = IdentityPool::new(&settings);
        let sandbox = Sandbox::new(&settings);
        Self {
            settings,
            registry,
            pool,
            sandbox,
        }
    }

    /// Execute one submission end to end.
    ///
    /// `Err` is returned only for requests rejected at validation time;
    /// anything that goes wrong after the job is created is reported in
    /// the response verdict.
    pub async fn submit(&self, request: JobRequest) -> Result<JobResponse, JudgeError> {
        let runtime = self.validate(&request)?.clone();
        let (uid, gid) = self.pool.allocate();
        let mut job = Job::new(request, runtime, uid, gid, &self.settings.jobs_root());

        info!(
            job_id = %job.id,
            language = %job.runtime.language,
            version = %job.runtime.version,
            test_cases = job.request.stdin.len(),
            workspace = %job.workspace().display(),
            uid,
            gid,
            phase = "accepted",
            "Job accepted"
        );

        let outcome = self.drive(&mut job).await;

        // Teardown runs regardless of how the job went.
        job.cleanup().await;

        let response = match outcome {
            Ok(artifacts) => {
                let verdict = evaluator::adjudicate(
                    artifacts.compile.as_ref(),
                    &artifacts.runs,
                    job.request.expected_output.as_deref(),
                );
                info!(
                    job_id = %job.id,
                    status = ?verdict.status,
                    phase = "adjudicated",
                    "Job complete"
                );
                JobResponse {
                    compile: artifacts.compile,
                    run: artifacts.runs,
                    verdict,
                }
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    state = ?job.state(),
                    error = %e,
                    phase = "failed",
                    "Job failed"
                );
                // Partial output captured before a spawn-class failure is
                // part of the diagnostic.
                let diagnostic = match &e {
                    JudgeError::Spawn { stderr, .. } if !stderr.is_empty() => {
                        format!("{}: {}", e, String::from_utf8_lossy(stderr))
                    }
                    _ => e.to_string(),
                };
                JobResponse {
                    compile: None,
                    run: Vec::new(),
                    verdict: Verdict {
                        status: VerdictStatus::Error,
                        stdout: Some(diagnostic),
                        stdin: None,
                        expected_output: None,
                    },
                }
            }
        };

        Ok(response)
    }

    async fn drive(&self, job: &mut Job) -> Result<ExecutionArtifacts, JudgeError> {
        job.prime().await?;
        job.execute(&self.sandbox).await
    }

    fn validate(&self, request: &JobRequest) -> Result<&Runtime, JudgeError> {
        if request.files.is_empty() {
            return Err(JudgeError::InvalidSpec(
                "at least one file is required".to_string(),
            ));
        }

        for file in &request.files {
            if !is_safe_relative_path(&file.name) {
                return Err(JudgeError::InvalidSpec(format!(
                    "unsafe file name: {}",
                    file.name
                )));
            }
            // Broken encodings are rejected before a job exists.
            file.decoded_content()?;
        }

        if !request.files.iter().any(|f| f.name == request.main) {
            return Err(JudgeError::InvalidSpec(format!(
                "main file {} is not among the submitted files",
                request.main
            )));
        }

        if let Some(expected) = &request.expected_output {
            if expected.len() != request.stdin.len() {
                return Err(JudgeError::InvalidSpec(format!(
                    "expected_output length {} does not match stdin length {}",
                    expected.len(),
                    request.stdin.len()
                )));
            }
        }

        if request.timeouts.run == 0 {
            return Err(JudgeError::InvalidSpec(
                "run timeout must be positive".to_string(),
            ));
        }

        let runtime = self
            .registry
            .lookup(&request.language, &request.version)
            .ok_or_else(|| {
                JudgeError::InvalidSpec(format!(
                    "unknown runtime: {} {}",
                    request.language, request.version
                ))
            })?;

        if runtime.compiled && request.timeouts.compile == 0 {
            return Err(JudgeError::InvalidSpec(
                "compile timeout must be positive".to_string(),
            ));
        }

        Ok(runtime)
    }
}

/// A workspace-relative path: non-empty, not absolute, made of plain
/// segments only (no `..`, no `.`).
fn is_safe_relative_path(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let path = Path::new(name);
    path.is_relative()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}
