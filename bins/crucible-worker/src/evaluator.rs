/// Verdict Evaluator - Language-Agnostic Adjudication
///
/// **Core Responsibility:**
/// Fold the raw results of a job (optional compile pass plus one result
/// per test case) into a single verdict.
///
/// **Critical Properties:**
/// - Knows nothing about processes or the sandbox
/// - Knows nothing about language runtimes
/// - Pure function: (compile, runs, expected outputs) → verdict
///
/// **Adjudication Rules:**
/// - A failed compile wins over everything: COMPILATION
/// - Test cases are considered in ascending index order; the first
///   non-accepting case decides the verdict regardless of which parallel
///   invocation finished first
/// - Within one case the priority is fixed: RUNTIME > TLE > WA
/// - Any stderr output is a runtime error, even on a zero exit code;
///   callers depend on this, so do not gate it on exit status
/// - Output comparison trims leading/trailing whitespace on both sides
///   (which also absorbs \n vs \r\n endings); case matters
///
/// **Why This Exists:**
/// Separates correctness judgement from the execution mechanism, and
/// guarantees a deterministic verdict for a given set of raw results.

use crucible_common::types::{RunResult, Verdict, VerdictStatus};

/// Message used when a compile is killed without producing diagnostics.
const GENERIC_COMPILE_FAILURE: &str = "Compilation failed";

/// Compile policy: any stderr content counts as failure, even with exit
/// code 0, as does a kill (timeout or output cap).
pub fn compile_failed(result: &RunResult) -> bool {
    !result.stderr.is_empty() || result.signal.as_deref() == Some("SIGKILL")
}

/// Normalize output for comparison.
///
/// Trims leading and trailing whitespace; internal whitespace, empty lines
/// and case are preserved.
fn normalize_output(output: &str) -> &str {
    output.trim()
}

/// Adjudicate a completed job.
///
/// ## Arguments
/// * `compile` - Compile-phase result, present only for compiled runtimes
/// * `runs` - One result per test case, in submission order
/// * `expected_output` - Reference outputs; when absent, WA cannot occur
///
/// ## Returns
/// The first non-accepting verdict by index, or AC when every case passes
/// (vacuously AC when there are no cases).
pub fn adjudicate(
    compile: Option<&RunResult>,
    runs: &[RunResult],
    expected_output: Option<&[String]>,
) -> Verdict {
    if let Some(compile) = compile {
        if compile_failed(compile) {
            let diagnostic = if compile.stderr.is_empty() {
                GENERIC_COMPILE_FAILURE.to_string()
            } else {
                compile.stderr.clone()
            };
            return Verdict {
                status: VerdictStatus::Compilation,
                stdout: Some(diagnostic),
                stdin: None,
                expected_output: None,
            };
        }
    }

    for (index, run) in runs.iter().enumerate() {
        let expected = expected_output.and_then(|outputs| outputs.get(index));

        if !run.stderr.is_empty() {
            // The failing diagnostic is surfaced in the stdout slot.
            return Verdict {
                status: VerdictStatus::Runtime,
                stdout: Some(run.stderr.clone()),
                stdin: Some(run.stdin.clone()),
                expected_output: expected.cloned(),
            };
        }

        if run.signal.as_deref() == Some("SIGKILL") {
            return Verdict {
                status: VerdictStatus::Tle,
                stdout: Some(run.stdout.clone()),
                stdin: Some(run.stdin.clone()),
                expected_output: expected.cloned(),
            };
        }

        if let Some(expected) = expected {
            let actual = normalize_output(&run.stdout);
            let wanted = normalize_output(expected);
            if actual != wanted {
                return Verdict {
                    status: VerdictStatus::Wa,
                    stdout: Some(actual.to_string()),
                    stdin: Some(run.stdin.clone()),
                    expected_output: Some(wanted.to_string()),
                };
            }
        }
    }

    Verdict {
        status: VerdictStatus::Ac,
        stdout: runs.first().map(|r| r.stdout.clone()),
        stdin: runs.first().map(|r| r.stdin.clone()),
        expected_output: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to create a clean run with the given stdout.
    fn make_run(stdout: &str, stdin: &str) -> RunResult {
        RunResult {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            signal: None,
            stdin: stdin.to_string(),
        }
    }

    fn make_killed_run(stdout: &str, stdin: &str) -> RunResult {
        RunResult {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: None,
            signal: Some("SIGKILL".to_string()),
            stdin: stdin.to_string(),
        }
    }

    fn make_stderr_run(stderr: &str, stdin: &str) -> RunResult {
        RunResult {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: Some(0),
            signal: None,
            stdin: stdin.to_string(),
        }
    }

    fn expected(outputs: &[&str]) -> Vec<String> {
        outputs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("hello"), "hello");
        assert_eq!(normalize_output("  hello  "), "hello");
        assert_eq!(normalize_output("hello\n"), "hello");
        assert_eq!(normalize_output("hello\r\n"), "hello");
        assert_eq!(normalize_output(""), "");
        assert_eq!(normalize_output("   "), "");
    }

    #[test]
    fn test_all_pass_returns_first_case_output() {
        let runs = vec![make_run("10\n", "5"), make_run("20\n", "10")];
        let want = expected(&["10", "20"]);

        let verdict = adjudicate(None, &runs, Some(&want));

        assert_eq!(verdict.status, VerdictStatus::Ac);
        assert_eq!(verdict.stdout.as_deref(), Some("10\n"));
        assert_eq!(verdict.stdin.as_deref(), Some("5"));
        assert!(verdict.expected_output.is_none());
    }

    #[test]
    fn test_no_cases_is_vacuously_accepting() {
        let verdict = adjudicate(None, &[], None);
        assert_eq!(verdict.status, VerdictStatus::Ac);
        assert!(verdict.stdout.is_none());
        assert!(verdict.stdin.is_none());
    }

    #[test]
    fn test_wrong_answer_carries_trimmed_sides() {
        let runs = vec![make_run("  hi  \n", "x")];
        let want = expected(&["ho\n"]);

        let verdict = adjudicate(None, &runs, Some(&want));

        assert_eq!(verdict.status, VerdictStatus::Wa);
        assert_eq!(verdict.stdout.as_deref(), Some("hi"));
        assert_eq!(verdict.stdin.as_deref(), Some("x"));
        assert_eq!(verdict.expected_output.as_deref(), Some("ho"));
    }

    #[test]
    fn test_trailing_newline_still_accepts() {
        let runs = vec![make_run("hi\n", "hi")];
        let want = expected(&["hi"]);

        let verdict = adjudicate(None, &runs, Some(&want));
        assert_eq!(verdict.status, VerdictStatus::Ac);
    }

    #[test]
    fn test_comparison_is_case_sensitive() {
        let runs = vec![make_run("Hello", "x")];
        let want = expected(&["hello"]);

        let verdict = adjudicate(None, &runs, Some(&want));
        assert_eq!(verdict.status, VerdictStatus::Wa);
    }

    #[test]
    fn test_without_expected_output_wa_is_impossible() {
        let runs = vec![make_run("anything at all", "x")];
        let verdict = adjudicate(None, &runs, None);
        assert_eq!(verdict.status, VerdictStatus::Ac);
    }

    #[test]
    fn test_stderr_is_a_runtime_error_even_on_exit_zero() {
        let runs = vec![make_stderr_run("warning: deprecated API", "x")];
        let want = expected(&["anything"]);

        let verdict = adjudicate(None, &runs, Some(&want));

        assert_eq!(verdict.status, VerdictStatus::Runtime);
        // The diagnostic rides in the stdout slot.
        assert_eq!(verdict.stdout.as_deref(), Some("warning: deprecated API"));
        assert_eq!(verdict.stdin.as_deref(), Some("x"));
        assert_eq!(verdict.expected_output.as_deref(), Some("anything"));
    }

    #[test]
    fn test_sigkill_is_a_time_limit() {
        let runs = vec![make_killed_run("partial", "x")];
        let verdict = adjudicate(None, &runs, None);

        assert_eq!(verdict.status, VerdictStatus::Tle);
        assert_eq!(verdict.stdout.as_deref(), Some("partial"));
        assert_eq!(verdict.stdin.as_deref(), Some("x"));
    }

    #[test]
    fn test_runtime_takes_precedence_over_tle_within_a_case() {
        let runs = vec![RunResult {
            stdout: String::new(),
            stderr: "boom".to_string(),
            exit_code: None,
            signal: Some("SIGKILL".to_string()),
            stdin: "x".to_string(),
        }];

        let verdict = adjudicate(None, &runs, None);
        assert_eq!(verdict.status, VerdictStatus::Runtime);
    }

    #[test]
    fn test_first_failing_index_wins_over_later_ones() {
        // Case 1 is WA, case 2 is a runtime error: index order beats
        // per-case severity.
        let runs = vec![
            make_run("right", "a"),
            make_run("wrong", "b"),
            make_stderr_run("crash", "c"),
        ];
        let want = expected(&["right", "right", "right"]);

        let verdict = adjudicate(None, &runs, Some(&want));

        assert_eq!(verdict.status, VerdictStatus::Wa);
        assert_eq!(verdict.stdin.as_deref(), Some("b"));
    }

    #[test]
    fn test_compile_stderr_short_circuits_everything() {
        let compile = make_stderr_run("syntax error", "");
        // Runs would all pass, but a failed compile never reaches them.
        let runs = vec![make_run("ok", "x")];
        let want = expected(&["ok"]);

        let verdict = adjudicate(Some(&compile), &runs, Some(&want));

        assert_eq!(verdict.status, VerdictStatus::Compilation);
        assert_eq!(verdict.stdout.as_deref(), Some("syntax error"));
        assert!(verdict.stdin.is_none());
    }

    #[test]
    fn test_compile_warning_with_exit_zero_still_fails() {
        let compile = RunResult {
            stdout: String::new(),
            stderr: "warning: unused variable".to_string(),
            exit_code: Some(0),
            signal: None,
            stdin: String::new(),
        };

        assert!(compile_failed(&compile));
        let verdict = adjudicate(Some(&compile), &[], None);
        assert_eq!(verdict.status, VerdictStatus::Compilation);
    }

    #[test]
    fn test_killed_compile_uses_generic_diagnostic() {
        let compile = make_killed_run("", "");

        let verdict = adjudicate(Some(&compile), &[], None);

        assert_eq!(verdict.status, VerdictStatus::Compilation);
        assert_eq!(verdict.stdout.as_deref(), Some("Compilation failed"));
    }

    #[test]
    fn test_clean_compile_is_transparent() {
        let compile = make_run("", "");
        let runs = vec![make_run("out", "in")];

        let verdict = adjudicate(Some(&compile), &runs, None);
        assert_eq!(verdict.status, VerdictStatus::Ac);
    }

    // ========================================================================
    // Invariant tests - the contract callers depend on
    // ========================================================================

    /// A runtime error must never be accepted, even when stdout matches.
    #[test]
    fn test_runtime_error_never_accepts_matching_output() {
        let runs = vec![RunResult {
            stdout: "expected".to_string(),
            stderr: "Traceback (most recent call last): ZeroDivisionError".to_string(),
            exit_code: Some(0),
            signal: None,
            stdin: "x".to_string(),
        }];
        let want = expected(&["expected"]);

        let verdict = adjudicate(None, &runs, Some(&want));
        assert_eq!(verdict.status, VerdictStatus::Runtime);
    }

    /// A killed run must never be accepted, even when stdout matches.
    #[test]
    fn test_killed_run_never_accepts_matching_output() {
        let runs = vec![make_killed_run("expected", "x")];
        let want = expected(&["expected"]);

        let verdict = adjudicate(None, &runs, Some(&want));
        assert_eq!(verdict.status, VerdictStatus::Tle);
    }

    /// Adjudication is a pure function: same inputs, same verdict.
    #[test]
    fn test_adjudication_is_deterministic() {
        let runs = vec![make_run("wrong", "a"), make_stderr_run("crash", "b")];
        let want = expected(&["right", "right"]);

        let first = adjudicate(None, &runs, Some(&want));
        let second = adjudicate(None, &runs, Some(&want));

        assert_eq!(first.status, second.status);
        assert_eq!(first.stdout, second.stdout);
        assert_eq!(first.stdin, second.stdin);
        assert_eq!(first.expected_output, second.expected_output);
    }
}
