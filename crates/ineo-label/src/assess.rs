//! External FAIR assessment.
//!
//! The assessment itself is opaque: an [`Evaluator`] takes a record's file
//! reference plus bindings and returns a score and a full textual report.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EvaluateError {
    #[error("failed to run evaluator {program}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("evaluator exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("evaluator output has no numeric score: {0}")]
    Output(String),
}

/// Result of one assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub score: f64,
    /// Full evaluator result, archived in the assessment cache.
    pub report: String,
}

/// Bindings handed to the evaluator: `{"FACETS": <record document>}`.
pub fn facet_bindings(facets: &Map<String, Value>) -> Value {
    let mut bindings = Map::new();
    bindings.insert("FACETS".to_string(), Value::Object(facets.clone()));
    Value::Object(bindings)
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        file_reference: &str,
        bindings: &Value,
    ) -> Result<Assessment, EvaluateError>;
}

/// Runs an external program as the evaluator.
///
/// Invoked as `<program> <args..> <file_reference>` with the bindings as JSON
/// on stdin. Stdout must be a JSON object with a numeric `score`; the whole
/// stdout is kept as the report.
#[derive(Debug, Clone)]
pub struct CommandEvaluator {
    program: PathBuf,
    args: Vec<String>,
}

#[derive(Deserialize)]
struct EvaluatorOutput {
    score: f64,
}

impl CommandEvaluator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl Evaluator for CommandEvaluator {
    async fn evaluate(
        &self,
        file_reference: &str,
        bindings: &Value,
    ) -> Result<Assessment, EvaluateError> {
        let spawn_err = |source| EvaluateError::Spawn {
            program: self.program.clone(),
            source,
        };

        let input = serde_json::to_vec(bindings)
            .map_err(|e| EvaluateError::Output(format!("bindings not serialisable: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(file_reference)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        // Stdin is fed while stdout and stderr drain; either side may fill its
        // pipe first.
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(&input).await {
                // The evaluator may exit without reading its bindings.
                Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
                written => written,
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(spawn_err)?;
        fed.map_err(spawn_err)?;

        if !output.status.success() {
            return Err(EvaluateError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let report = String::from_utf8_lossy(&output.stdout).into_owned();
        let parsed: EvaluatorOutput = serde_json::from_str(report.trim())
            .map_err(|e| EvaluateError::Output(e.to_string()))?;
        debug!(file = file_reference, score = parsed.score, "evaluated");

        Ok(Assessment {
            score: parsed.score,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bindings_wrap_facets() {
        let mut facets = Map::new();
        facets.insert("id".into(), json!("r1"));
        assert_eq!(facet_bindings(&facets), json!({"FACETS": {"id": "r1"}}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_evaluator_reads_score_from_stdout() {
        let eval = CommandEvaluator::new("sh").with_args([
            "-c",
            r#"cat > /dev/null; printf '{"score": 0.42, "file": "%s"}' "$0""#,
        ]);
        let result = eval.evaluate("/data/r1.xml", &json!({})).await.unwrap();
        assert_eq!(result.score, 0.42);
        assert!(result.report.contains("/data/r1.xml"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_evaluator_receives_bindings_on_stdin() {
        let eval = CommandEvaluator::new("sh").with_args([
            "-c",
            r#"case "$(cat)" in *FACETS*) echo '{"score": 1}';; *) echo '{"score": 0}';; esac"#,
        ]);
        let bindings = json!({"FACETS": {"id": "r1"}});
        let result = eval.evaluate("f", &bindings).await.unwrap();
        assert_eq!(result.score, 1.0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_evaluator_failure_propagates() {
        let eval = CommandEvaluator::new("sh").with_args(["-c", "echo broken >&2; exit 3"]);
        let err = eval.evaluate("f", &json!({})).await.unwrap_err();
        assert!(matches!(err, EvaluateError::Failed { ref stderr, .. } if stderr == "broken"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_evaluator_rejects_output_without_score() {
        let eval = CommandEvaluator::new("sh").with_args(["-c", "echo '{\"grade\": \"A\"}'"]);
        let err = eval.evaluate("f", &json!({})).await.unwrap_err();
        assert!(matches!(err, EvaluateError::Output(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_evaluator_writing_before_reading_does_not_block() {
        // Both payloads exceed a pipe buffer.
        let eval = CommandEvaluator::new("sh").with_args([
            "-c",
            r#"head -c 262144 /dev/zero | tr '\0' ' '; cat > /dev/null; echo '{"score": 1}'"#,
        ]);
        let bindings = json!({ "FACETS": { "description": "x".repeat(262_144) } });

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            eval.evaluate("f", &bindings),
        )
        .await
        .expect("evaluator stalled")
        .unwrap();
        assert_eq!(result.score, 1.0);
        assert!(result.report.len() > 262_144);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let eval = CommandEvaluator::new("/nonexistent/evaluator");
        let err = eval.evaluate("f", &json!({})).await.unwrap_err();
        assert!(matches!(err, EvaluateError::Spawn { .. }));
    }
}
