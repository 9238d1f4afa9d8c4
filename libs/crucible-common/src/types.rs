use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::JudgeError;

/// A submitted job, as received from the request layer.
///
/// Field names are wire-stable: external clients serialize exactly this
/// shape, so renames here are breaking changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub language: String,
    pub version: String,
    pub files: Vec<FileSpec>,
    /// Entry file name; must appear in `files`.
    pub main: String,
    /// The name the caller used to select the runtime; exported to the
    /// child as `PISTON_ALIAS`.
    pub alias: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// One run is performed per stdin payload.
    #[serde(default)]
    pub stdin: Vec<String>,
    /// When present, must be the same length as `stdin`.
    #[serde(default)]
    pub expected_output: Option<Vec<String>>,
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSpec {
    /// Path relative to the job workspace. Absolute paths and `..`
    /// segments are rejected at validation time.
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub encoding: FileEncoding,
}

/// Transfer encoding of `FileSpec::content`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEncoding {
    #[default]
    Utf8,
    Base64,
    Hex,
}

impl FileSpec {
    /// Decode `content` into the bytes that land on disk.
    pub fn decoded_content(&self) -> Result<Vec<u8>, JudgeError> {
        match self.encoding {
            FileEncoding::Utf8 => Ok(self.content.as_bytes().to_vec()),
            FileEncoding::Base64 => general_purpose::STANDARD
                .decode(&self.content)
                .map_err(|e| {
                    JudgeError::InvalidSpec(format!("file {}: invalid base64: {}", self.name, e))
                }),
            FileEncoding::Hex => decode_hex(&self.name, &self.content),
        }
    }
}

fn decode_hex(name: &str, content: &str) -> Result<Vec<u8>, JudgeError> {
    if !content.is_ascii() || content.len() % 2 != 0 {
        return Err(JudgeError::InvalidSpec(format!(
            "file {}: invalid hex payload",
            name
        )));
    }
    (0..content.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&content[i..i + 2], 16).map_err(|_| {
                JudgeError::InvalidSpec(format!("file {}: invalid hex payload", name))
            })
        })
        .collect()
}

/// Per-phase wall-clock budgets in milliseconds.
///
/// `compile` is ignored for interpreted runtimes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Timeouts {
    pub compile: u64,
    pub run: u64,
}

/// Raw outcome of one sandboxed invocation.
///
/// `stdout`/`stderr` are truncated at the configured output cap. `signal`
/// holds the symbolic name (e.g. "SIGKILL") when the child died on one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub stdin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictStatus {
    Ac,
    Wa,
    Compilation,
    Runtime,
    Tle,
    /// Reserved: never produced by the core (no memory accounting).
    Mle,
    /// Reserved: caller-side marker for queued jobs.
    Pending,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub stdout: Option<String>,
    pub stdin: Option<String>,
    pub expected_output: Option<String>,
}

/// Response body for a completed submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile: Option<RunResult>,
    pub run: Vec<RunResult>,
    pub verdict: Verdict,
}
