#![cfg(test)]
//! Executor scenarios over a scripted stub sandbox.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use pretty_assertions::assert_eq as pretty_eq;
use serde_json::json;

use crate::client::err::ExecutionError;
use crate::langs::LanguageRegistry;
use crate::runner::exec::{ContainerSpec, LogStream, Sandbox, SandboxDriver};
use crate::tester::model::{CaseStatus, Job};

use super::JobExecutor;

/// One scripted container: canned log chunks and a canned exit code.
/// `exit: None` never exits (for timeout scenarios).
struct StubSandbox {
    chunks: Vec<Vec<u8>>,
    exit: Option<i64>,
    disposed: Arc<AtomicBool>,
}

#[async_trait]
impl Sandbox for StubSandbox {
    async fn start(&mut self) -> anyhow::Result<LogStream> {
        let chunks: Vec<anyhow::Result<bytes::Bytes>> = self
            .chunks
            .drain(..)
            .map(|c| Ok(bytes::Bytes::from(c)))
            .collect();
        if self.exit.is_some() {
            Ok(Box::pin(stream::iter(chunks)))
        } else {
            // Never signal end-of-logs either; mirrors a wedged process.
            Ok(Box::pin(stream::iter(chunks).chain(stream::pending())))
        }
    }

    async fn wait(&mut self) -> anyhow::Result<i64> {
        match self.exit {
            Some(code) => Ok(code),
            None => futures::future::pending().await,
        }
    }

    async fn dispose(&mut self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// Hands out scripted sandboxes in order and records every spec it was
/// asked to create.
#[derive(Default)]
struct StubDriver {
    script: Mutex<Vec<StubSandbox>>,
    created: Mutex<Vec<ContainerSpec>>,
}

impl StubDriver {
    fn scripted(sandboxes: Vec<StubSandbox>) -> Arc<StubDriver> {
        Arc::new(StubDriver {
            script: Mutex::new(sandboxes),
            created: Mutex::new(Vec::new()),
        })
    }

    fn created_specs(&self) -> Vec<ContainerSpec> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxDriver for StubDriver {
    async fn create(&self, spec: &ContainerSpec) -> anyhow::Result<Box<dyn Sandbox>> {
        self.created.lock().unwrap().push(spec.clone());
        let mut script = self.script.lock().unwrap();
        anyhow::ensure!(!script.is_empty(), "no scripted sandbox left");
        Ok(Box::new(script.remove(0)))
    }
}

fn sandbox(chunks: Vec<&[u8]>, exit: Option<i64>) -> (StubSandbox, Arc<AtomicBool>) {
    let disposed = Arc::new(AtomicBool::new(false));
    (
        StubSandbox {
            chunks: chunks.into_iter().map(|c| c.to_vec()).collect(),
            exit,
            disposed: disposed.clone(),
        },
        disposed,
    )
}

fn python_job(code: &str, cases: serde_json::Value) -> Job {
    Job {
        id: "job-1".into(),
        language: "python".into(),
        code: code.into(),
        test_cases: cases,
    }
}

fn executor(driver: Arc<StubDriver>, root: &std::path::Path) -> JobExecutor {
    JobExecutor::new(
        driver,
        Arc::new(LanguageRegistry::builtin()),
        root.to_owned(),
    )
}

fn workspace_entries(root: &std::path::Path) -> usize {
    std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}

#[tokio::test]
async fn happy_path_two_passing_cases() {
    let logs = concat!(
        r#"{"type":"test_result","data":{"id":1,"status":"passed","input":[1,2],"expected":3,"actual":3,"time":0.2}}"#, "\n",
        r#"{"type":"test_result","data":{"id":2,"status":"passed","input":[2,2],"expected":4,"actual":4,"time":0.1}}"#, "\n",
        r#"{"type":"final_result","data":{"total":2,"passed":2,"failed":0,"execution_time":1.4,"cases":[{"id":1,"status":"passed","input":[1,2],"expected":3,"actual":3,"time":0.2},{"id":2,"status":"passed","input":[2,2],"expected":4,"actual":4,"time":0.1}]}}"#, "\n",
    );
    let (run, disposed) = sandbox(vec![logs.as_bytes()], Some(0));
    let driver = StubDriver::scripted(vec![run]);
    let root = tempfile::tempdir().unwrap();

    let job = python_job(
        "def solution(a, b):\n    return a + b",
        json!([{"input": [1, 2], "expected": 3}, {"input": [2, 2], "expected": 4}]),
    );
    let outcome = executor(driver.clone(), root.path())
        .execute(&job)
        .await
        .unwrap();

    assert!(outcome.success);
    pretty_eq!((outcome.total, outcome.passed, outcome.failed), (2, 2, 0));
    assert_eq!(
        outcome.total as usize,
        job.test_cases.as_array().unwrap().len()
    );
    assert!(disposed.load(Ordering::SeqCst));
    // Workspace released before execute returned.
    assert_eq!(workspace_entries(root.path()), 0);
    // No compile step for python.
    assert_eq!(driver.created_specs().len(), 1);
}

#[tokio::test]
async fn wrong_answer_fails_the_job() {
    let logs = concat!(
        r#"{"type":"final_result","data":{"total":2,"passed":1,"failed":1,"execution_time":1.1,"cases":[{"id":1,"status":"passed","input":[1,2],"expected":3,"actual":3,"time":0.2},{"id":2,"status":"failed","input":[2,2],"expected":5,"actual":4,"time":0.1,"reason":"Wrong Answer"}]}}"#, "\n",
    );
    let (run, _) = sandbox(vec![logs.as_bytes()], Some(0));
    let driver = StubDriver::scripted(vec![run]);
    let root = tempfile::tempdir().unwrap();

    let job = python_job(
        "def solution(a, b):\n    return a + b",
        json!([{"input": [1, 2], "expected": 3}, {"input": [2, 2], "expected": 5}]),
    );
    let outcome = executor(driver, root.path()).execute(&job).await.unwrap();

    assert!(!outcome.success);
    pretty_eq!((outcome.passed, outcome.failed), (1, 1));
    assert_eq!(outcome.cases[1].status, CaseStatus::Failed);
    assert_eq!(outcome.cases[1].reason.as_deref(), Some("Wrong Answer"));
}

#[tokio::test]
async fn runtime_error_cases_carry_error_details() {
    let logs = concat!(
        r#"{"type":"final_result","data":{"total":2,"passed":0,"failed":2,"execution_time":0.9,"cases":[{"id":1,"status":"error","input":[1,2],"expected":3,"time":0.1,"error":{"type":"ZeroDivisionError","message":"division by zero","trace":"Traceback..."}},{"id":2,"status":"error","input":[2,2],"expected":4,"time":0.1,"error":{"type":"ZeroDivisionError","message":"division by zero","trace":"Traceback..."}}]}}"#, "\n",
    );
    let (run, _) = sandbox(vec![logs.as_bytes()], Some(0));
    let driver = StubDriver::scripted(vec![run]);
    let root = tempfile::tempdir().unwrap();

    let job = python_job(
        "def solution(a, b):\n    return a / 0",
        json!([{"input": [1, 2], "expected": 3}, {"input": [2, 2], "expected": 4}]),
    );
    let outcome = executor(driver, root.path()).execute(&job).await.unwrap();

    assert!(!outcome.success);
    for case in &outcome.cases {
        assert_eq!(case.status, CaseStatus::Error);
        let error = case.error.as_ref().unwrap();
        assert_eq!(error["type"], "ZeroDivisionError");
        assert_eq!(error["message"], "division by zero");
    }
}

#[tokio::test]
async fn compile_failure_skips_run_container() {
    let (compile, disposed) = sandbox(
        vec![b"TestRunner.java:3: error: ';' expected\n1 error\n"],
        Some(1),
    );
    let driver = StubDriver::scripted(vec![compile]);
    let root = tempfile::tempdir().unwrap();

    let job = Job {
        id: "job-2".into(),
        language: "java".into(),
        code: "class Solution { static int solution(int a, int b) { return a + b } }".into(),
        test_cases: json!([{"input": [1, 2], "expected": 3}]),
    };
    let err = executor(driver.clone(), root.path())
        .execute(&job)
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutionError::Compile(_)));
    let message = err.to_string();
    assert!(message.starts_with("Compilation failed:"), "{}", message);
    assert!(message.contains("';' expected"));

    // Only the compile container was ever created, and it was disposed.
    let specs = driver.created_specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].argv[0], "javac");
    assert!(disposed.load(Ordering::SeqCst));
    assert_eq!(workspace_entries(root.path()), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_without_final_result() {
    let (run, disposed) = sandbox(vec![b"warming up...\n"], None);
    let driver = StubDriver::scripted(vec![run]);
    let root = tempfile::tempdir().unwrap();

    let job = python_job(
        "import time\ndef solution(a, b):\n    time.sleep(60)",
        json!([{"input": [1, 2], "expected": 3}]),
    );
    let err = executor(driver, root.path()).execute(&job).await.unwrap_err();

    assert!(matches!(err, ExecutionError::Timeout));
    assert_eq!(err.to_string(), "Execution timeout");
    assert!(disposed.load(Ordering::SeqCst));
    assert_eq!(workspace_entries(root.path()), 0);
}

#[tokio::test]
async fn unknown_language_fails_before_any_io() {
    let driver = StubDriver::scripted(vec![]);
    let root = tempfile::tempdir().unwrap();

    let job = Job {
        id: "job-3".into(),
        language: "ruby".into(),
        code: "def solution(a, b) = a + b".into(),
        test_cases: json!([]),
    };
    let err = executor(driver.clone(), root.path())
        .execute(&job)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Unsupported language: ruby");
    assert!(driver.created_specs().is_empty());
    // No workspace was ever created.
    assert_eq!(workspace_entries(root.path()), 0);
}

#[tokio::test]
async fn nonzero_exit_reports_container_exit() {
    let (run, _) = sandbox(vec![b"Killed\n"], Some(137));
    let driver = StubDriver::scripted(vec![run]);
    let root = tempfile::tempdir().unwrap();

    let job = python_job("def solution(a, b):\n    return a + b", json!([]));
    let err = executor(driver, root.path()).execute(&job).await.unwrap_err();

    assert!(matches!(err, ExecutionError::ContainerExit(137)));
}

#[tokio::test]
async fn clean_exit_without_final_result_is_no_result() {
    let (run, _) = sandbox(vec![b"hello from user code\n"], Some(0));
    let driver = StubDriver::scripted(vec![run]);
    let root = tempfile::tempdir().unwrap();

    let job = python_job("print('hello from user code')", json!([]));
    let err = executor(driver, root.path()).execute(&job).await.unwrap_err();

    assert!(matches!(err, ExecutionError::NoResult));
    assert_eq!(err.to_string(), "No test results received");
}

#[tokio::test]
async fn final_result_split_across_chunks_still_parses() {
    let line = concat!(
        r#"{"type":"final_result","data":{"total":1,"passed":1,"failed":0,"execution_time":0.5,"cases":[{"id":1,"status":"passed","input":[1,2],"expected":3,"actual":3,"time":0.1}]}}"#,
        "\n"
    );
    let half = line.len() / 2;
    let (run, _) = sandbox(vec![&line.as_bytes()[..half], &line.as_bytes()[half..]], Some(0));
    let driver = StubDriver::scripted(vec![run]);
    let root = tempfile::tempdir().unwrap();

    let job = python_job("def solution(a, b):\n    return a + b", json!([{"input": [1, 2], "expected": 3}]));
    let outcome = executor(driver, root.path()).execute(&job).await.unwrap();
    assert!(outcome.success);
}

#[tokio::test]
async fn sandbox_creation_failure_is_sandbox_error() {
    // Empty script: the driver refuses to create the run container.
    let driver = StubDriver::scripted(vec![]);
    let root = tempfile::tempdir().unwrap();

    let job = python_job("def solution(a, b):\n    return a + b", json!([]));
    let err = executor(driver, root.path()).execute(&job).await.unwrap_err();

    assert!(matches!(err, ExecutionError::Sandbox(_)));
    assert_eq!(workspace_entries(root.path()), 0);
}
