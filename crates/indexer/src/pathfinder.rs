//! Transfer-step resolution through the external max-flow solver.
//!
//! The resolver validates the request, exports the current edge snapshot,
//! runs the solver and renames its output into the public response shape.
//! It never writes edges.

use async_trait::async_trait;
use circles_core::{parse_address, Address, Amount};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{info, warn};

use crate::export::export_snapshot;
use crate::storage::Storage;

/// Errors surfaced by transfer-step resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid transfer value: {0}")]
    InvalidValue(String),

    #[error("Sender and receiver are the same account")]
    SameAccount,

    #[error("Failed to export edge snapshot")]
    Export(#[source] anyhow::Error),

    #[error("Solver did not finish within {0}ms")]
    SolverTimeout(u64),

    #[error("Solver failed: {0}")]
    SolverFailure(String),
}

impl ResolveError {
    /// Whether the request itself was rejected, before any I/O.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ResolveError::InvalidAddress(_) | ResolveError::InvalidValue(_) | ResolveError::SameAccount
        )
    }
}

/// Arguments handed to the solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveRequest {
    pub from: Address,
    pub to: Address,
    pub value: Amount,
    pub hops: u32,
}

/// Raw solver output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverOutput {
    #[serde(deserialize_with = "integer_string")]
    pub max_flow_value: String,
    #[serde(default)]
    pub transfer_steps: Vec<SolverStep>,
}

/// One step as reported by the solver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SolverStep {
    pub from: String,
    pub to: String,
    pub token: String,
    #[serde(deserialize_with = "integer_string")]
    pub value: String,
}

/// Solvers print amounts either as JSON strings or plain numbers.
fn integer_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected integer string, got {}",
            other
        ))),
    }
}

/// Resolved transfer route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSteps {
    pub max_flow_value: String,
    pub transfer_steps: Vec<TransferStep>,
    /// Solver wall-clock time in milliseconds.
    pub process_duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStep {
    pub from: String,
    pub to: String,
    pub token_owner_address: String,
    pub value: String,
}

impl From<SolverStep> for TransferStep {
    fn from(step: SolverStep) -> Self {
        Self {
            from: step.from,
            to: step.to,
            token_owner_address: step.token,
            value: step.value,
        }
    }
}

/// Max-flow solver over an exported edge file.
#[async_trait]
pub trait Solver: Send + Sync {
    async fn solve(
        &self,
        request: &SolveRequest,
        edges_file: &Path,
    ) -> Result<SolverOutput, ResolveError>;
}

/// Runs the solver as a child process.
///
/// Invocation: `<executable> [args..] <edges_file> <from> <to> <value> <hops>`,
/// with the result as JSON on stdout.
#[derive(Debug, Clone)]
pub struct ProcessSolver {
    executable: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessSolver {
    pub fn new(executable: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl Solver for ProcessSolver {
    async fn solve(
        &self,
        request: &SolveRequest,
        edges_file: &Path,
    ) -> Result<SolverOutput, ResolveError> {
        let mut child = Command::new(&self.executable)
            .args(&self.args)
            .arg(edges_file)
            .arg(request.from.to_checksum(None))
            .arg(request.to.to_checksum(None))
            .arg(request.value.as_str())
            .arg(request.hops.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ResolveError::SolverFailure(format!(
                    "failed to start {}: {}",
                    self.executable.display(),
                    e
                ))
            })?;

        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            return Err(ResolveError::SolverFailure(
                "solver output pipes unavailable".to_string(),
            ));
        };

        let finished = tokio::time::timeout(self.timeout, async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (status, out_read, err_read) = tokio::join!(
                child.wait(),
                stdout.read_to_end(&mut out),
                stderr.read_to_end(&mut err)
            );
            out_read?;
            err_read?;
            Ok::<_, std::io::Error>((status?, out, err))
        })
        .await;

        let (status, out, err) = match finished {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                return Err(ResolveError::SolverFailure(format!(
                    "failed to collect solver output: {}",
                    e
                )))
            }
            Err(_) => {
                warn!("Solver exceeded {:?}, killing it", self.timeout);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill solver process: {}", e);
                }
                return Err(ResolveError::SolverTimeout(self.timeout.as_millis() as u64));
            }
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&err);
            return Err(ResolveError::SolverFailure(format!(
                "exited with {}: {}",
                status,
                stderr.trim()
            )));
        }

        serde_json::from_slice(&out)
            .map_err(|e| ResolveError::SolverFailure(format!("unparseable output: {}", e)))
    }
}

/// Resolves transfer steps against the current edge store.
#[derive(Clone)]
pub struct TransferStepResolver {
    storage: Storage,
    solver: Arc<dyn Solver>,
    edges_file: PathBuf,
    default_hops: u32,
}

impl TransferStepResolver {
    pub fn new(
        storage: Storage,
        solver: Arc<dyn Solver>,
        edges_file: PathBuf,
        default_hops: u32,
    ) -> Self {
        Self {
            storage,
            solver,
            edges_file,
            default_hops,
        }
    }

    /// Compute a route sending up to `value` from `from` to `to`.
    ///
    /// Input is validated before any I/O. `hops` defaults to the configured
    /// maximum.
    pub async fn resolve_transfer_steps(
        &self,
        from: &str,
        to: &str,
        value: &str,
        hops: Option<u32>,
    ) -> Result<TransferSteps, ResolveError> {
        let from = parse_address(from).map_err(|_| ResolveError::InvalidAddress(from.to_string()))?;
        let to = parse_address(to).map_err(|_| ResolveError::InvalidAddress(to.to_string()))?;
        let value = Amount::new(value).map_err(|_| ResolveError::InvalidValue(value.to_string()))?;
        if from == to {
            return Err(ResolveError::SameAccount);
        }

        let request = SolveRequest {
            from,
            to,
            value,
            hops: hops.unwrap_or(self.default_hops),
        };

        export_snapshot(&self.storage, &self.edges_file)
            .await
            .map_err(ResolveError::Export)?;

        let started = Instant::now();
        let output = self.solver.solve(&request, &self.edges_file).await?;
        let process_duration = started.elapsed().as_millis() as u64;

        info!(
            "Resolved {} -> {} in {}ms: max flow {}, {} steps",
            from,
            to,
            process_duration,
            output.max_flow_value,
            output.transfer_steps.len()
        );

        Ok(TransferSteps {
            max_flow_value: output.max_flow_value,
            transfer_steps: output
                .transfer_steps
                .into_iter()
                .map(TransferStep::from)
                .collect(),
            process_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circles_core::Edge;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{NamedTempFile, TempDir};

    const A: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    const B: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";

    struct MockSolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Solver for MockSolver {
        async fn solve(
            &self,
            request: &SolveRequest,
            edges_file: &Path,
        ) -> Result<SolverOutput, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(edges_file.exists());
            Ok(SolverOutput {
                max_flow_value: request.value.to_string(),
                transfer_steps: vec![SolverStep {
                    from: request.from.to_checksum(None),
                    to: request.to.to_checksum(None),
                    token: request.from.to_checksum(None),
                    value: request.value.to_string(),
                }],
            })
        }
    }

    async fn setup_storage() -> (Storage, NamedTempFile) {
        let temp_db = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp_db.path(), None, None)
            .await
            .unwrap();
        storage.run_migrations().await.unwrap();
        (storage, temp_db)
    }

    fn request() -> SolveRequest {
        SolveRequest {
            from: parse_address(A).unwrap(),
            to: parse_address(B).unwrap(),
            value: Amount::from(50u64),
            hops: 3,
        }
    }

    #[tokio::test]
    async fn test_same_account_rejected_before_io() {
        let (storage, _temp_db) = setup_storage().await;
        let dir = TempDir::new().unwrap();
        let edges_file = dir.path().join("edges.json");
        let solver = Arc::new(MockSolver {
            calls: AtomicUsize::new(0),
        });
        let resolver = TransferStepResolver::new(storage, solver.clone(), edges_file.clone(), 3);

        let err = resolver
            .resolve_transfer_steps(A, &A.to_lowercase(), "10", None)
            .await
            .unwrap_err();

        assert!(matches!(err, ResolveError::SameAccount));
        assert!(err.is_client_error());
        assert_eq!(solver.calls.load(Ordering::SeqCst), 0);
        assert!(!edges_file.exists());
    }

    #[tokio::test]
    async fn test_invalid_input_rejected() {
        let (storage, _temp_db) = setup_storage().await;
        let dir = TempDir::new().unwrap();
        let solver = Arc::new(MockSolver {
            calls: AtomicUsize::new(0),
        });
        let resolver =
            TransferStepResolver::new(storage, solver.clone(), dir.path().join("edges.json"), 3);

        let err = resolver
            .resolve_transfer_steps("0x1234", B, "10", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidAddress(_)));

        let err = resolver
            .resolve_transfer_steps(A, B, "1.5", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidValue(_)));
        assert_eq!(solver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_steps_renamed_to_token_owner_address() {
        let (storage, _temp_db) = setup_storage().await;
        let from = parse_address(A).unwrap();
        let to = parse_address(B).unwrap();
        storage
            .upsert_edge(&Edge::new(from, to, from, Amount::from(80u64)).unwrap())
            .await
            .unwrap();

        let dir = TempDir::new().unwrap();
        let edges_file = dir.path().join("edges.json");
        let solver = Arc::new(MockSolver {
            calls: AtomicUsize::new(0),
        });
        let resolver = TransferStepResolver::new(storage, solver.clone(), edges_file.clone(), 3);

        let steps = resolver
            .resolve_transfer_steps(A, B, "50", Some(2))
            .await
            .unwrap();

        assert_eq!(steps.max_flow_value, "50");
        assert_eq!(steps.transfer_steps[0].token_owner_address, A);
        assert_eq!(solver.calls.load(Ordering::SeqCst), 1);

        let json = serde_json::to_value(&steps).unwrap();
        assert_eq!(json["transferSteps"][0]["tokenOwnerAddress"], A);
        assert!(json["transferSteps"][0].get("token").is_none());
        assert!(json.get("processDuration").is_some());
    }

    #[test]
    fn test_solver_output_accepts_numbers() {
        let output: SolverOutput = serde_json::from_str(
            r#"{"maxFlowValue": 50, "transferSteps": [{"from": "a", "to": "b", "token": "a", "value": "50"}]}"#,
        )
        .unwrap();
        assert_eq!(output.max_flow_value, "50");
        assert_eq!(output.transfer_steps[0].value, "50");
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn script(dir: &TempDir, body: &str) -> ProcessSolver {
            let path = dir.path().join("solver.sh");
            std::fs::write(&path, body).unwrap();
            ProcessSolver::new(
                "sh",
                vec![path.to_string_lossy().into_owned()],
                Duration::from_millis(500),
            )
        }

        #[tokio::test]
        async fn test_process_solver_success() {
            let dir = TempDir::new().unwrap();
            let edges_file = dir.path().join("edges.json");
            std::fs::write(&edges_file, "[]").unwrap();
            let solver = script(
                &dir,
                r#"test -f "$1" || exit 3
printf '{"maxFlowValue":"%s","transferSteps":[{"from":"%s","to":"%s","token":"%s","value":"%s"}]}' "$4" "$2" "$3" "$2" "$4"
"#,
            );

            let output = solver.solve(&request(), &edges_file).await.unwrap();
            assert_eq!(output.max_flow_value, "50");
            assert_eq!(output.transfer_steps[0].from, A);
            assert_eq!(output.transfer_steps[0].to, B);
        }

        #[tokio::test]
        async fn test_process_solver_nonzero_exit() {
            let dir = TempDir::new().unwrap();
            let solver = script(&dir, "echo 'no route' >&2\nexit 2\n");

            let err = solver
                .solve(&request(), &dir.path().join("edges.json"))
                .await
                .unwrap_err();
            match err {
                ResolveError::SolverFailure(message) => assert!(message.contains("no route")),
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_process_solver_garbage_output() {
            let dir = TempDir::new().unwrap();
            let solver = script(&dir, "echo not json\n");

            let err = solver
                .solve(&request(), &dir.path().join("edges.json"))
                .await
                .unwrap_err();
            assert!(matches!(err, ResolveError::SolverFailure(_)));
        }

        fn process_exists(pid: &str) -> bool {
            std::process::Command::new("kill")
                .args(["-0", pid])
                .stderr(Stdio::null())
                .status()
                .unwrap()
                .success()
        }

        #[tokio::test]
        async fn test_process_solver_timeout() {
            let dir = TempDir::new().unwrap();
            let pid_file = dir.path().join("solver.pid");
            let solver = script(
                &dir,
                &format!("echo $$ > '{}'\nexec sleep 10\n", pid_file.display()),
            );

            let started = Instant::now();
            let err = solver
                .solve(&request(), &dir.path().join("edges.json"))
                .await
                .unwrap_err();

            assert!(matches!(err, ResolveError::SolverTimeout(500)));
            assert!(started.elapsed() < Duration::from_secs(5));

            // Killed and reaped: not even a zombie remains.
            let pid = std::fs::read_to_string(&pid_file).unwrap();
            assert!(!process_exists(pid.trim()), "solver {} still running", pid.trim());
        }
    }
}
