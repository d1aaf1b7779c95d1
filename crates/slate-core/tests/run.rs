mod common;

use common::{engine, is_empty_dir, python_engine};
use slate_core::{Engine, EngineConfig, ExecutionRequest, SlateError, ValidationError};
use std::time::{Duration, Instant};

#[tokio::test]
async fn oversized_code_never_spawns() {
    let (engine, spawner, _root) = engine();
    let limit = engine.config().limits.max_code_bytes;
    let code = "x = 1\n".repeat(limit / 6 + 1);

    let err = engine.run(ExecutionRequest::new(code.clone())).await.unwrap_err();
    assert!(matches!(
        err,
        SlateError::Validation(ValidationError::CodeTooLarge { .. })
    ));
    let err = engine.trace(ExecutionRequest::new(code)).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(spawner.count(), 0);
}

#[tokio::test]
async fn oversized_stdin_never_spawns() {
    let (engine, spawner, _root) = engine();
    let stdin = "a".repeat(engine.config().limits.max_stdin_bytes + 1);
    let request = ExecutionRequest::builder("print(input())").stdin(stdin).build();

    let err = engine.run(request).await.unwrap_err();
    assert!(matches!(
        err,
        SlateError::Validation(ValidationError::StdinTooLarge { .. })
    ));
    assert_eq!(spawner.count(), 0);
}

#[test]
fn step_requests_are_clamped() {
    let (engine, _, _root) = engine();
    let ceiling = engine.config().limits.max_steps;
    for requested in [ceiling + 1, ceiling * 10, u64::MAX] {
        let request = ExecutionRequest::builder("pass").max_steps(requested).build();
        assert_eq!(engine.validate(request).unwrap().max_steps(), ceiling);
    }
}

#[tokio::test]
async fn missing_interpreter_is_spawn_error() {
    let root = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.sandbox.python_path = "/nonexistent/bin/python3".into();
    config.sandbox.work_root = root.path().to_path_buf();
    let engine = Engine::new(config).unwrap();

    let err = engine.run(ExecutionRequest::new("print(1)")).await.unwrap_err();
    assert!(matches!(err, SlateError::Spawn(_)));
    assert!(is_empty_dir(root.path()));
}

#[tokio::test]
async fn prints_hello() {
    let Some((engine, spawner, root)) = python_engine() else {
        return;
    };
    let result = engine.run(ExecutionRequest::new(r#"print("Hello")"#)).await.unwrap();

    assert!(result.success, "{result:?}");
    assert_eq!(result.stdout, "Hello\n");
    assert_eq!(result.error, "");
    assert_eq!(result.exit_code, 0);
    assert_eq!(spawner.count(), 1);
    assert!(is_empty_dir(root.path()));
}

#[tokio::test]
async fn reads_stdin() {
    let Some((engine, _, _root)) = python_engine() else {
        return;
    };
    let code = "name = input()\nage = input()\nprint(f\"{name} is {age}\")\n";
    let request = ExecutionRequest::builder(code).stdin("Alice\n25\n").build();
    let result = engine.run(request).await.unwrap();

    assert!(result.success, "{result:?}");
    assert!(result.stdout.contains("Alice is 25"));
}

#[tokio::test]
async fn seeded_runs_are_deterministic() {
    let Some((engine, _, _root)) = python_engine() else {
        return;
    };
    let code = "import random\nprint([random.randint(0, 10**6) for _ in range(5)])\n";
    let request = || {
        ExecutionRequest::builder(code)
            .stdin("unused\n")
            .random_seed(42)
            .build()
    };

    let first = engine.run(request()).await.unwrap();
    let second = engine.run(request()).await.unwrap();
    assert!(first.success, "{first:?}");
    assert_eq!(first.stdout, second.stdout);
}

#[tokio::test]
async fn attached_files_are_readable() {
    let Some((engine, _, _root)) = python_engine() else {
        return;
    };
    let request = ExecutionRequest::builder("print(open('data.txt').read().upper())")
        .file("data.txt", "hello")
        .build();
    let result = engine.run(request).await.unwrap();

    assert!(result.success, "{result:?}");
    assert_eq!(result.stdout, "HELLO\n");
}

#[tokio::test]
async fn host_paths_never_reach_the_error() {
    let Some((engine, _, root)) = python_engine() else {
        return;
    };
    let result = engine
        .run(ExecutionRequest::new("open('missing.txt')"))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, 1);
    assert!(result.error.contains("FileNotFoundError"), "{}", result.error);
    assert!(result.error.contains("[Error]"), "{}", result.error);
    assert!(result.error.contains("<sandbox>/main.py"), "{}", result.error);
    let root = root.path().canonicalize().unwrap();
    assert!(!result.error.contains(root.to_str().unwrap()));
}

#[tokio::test]
async fn stderr_marks_run_failed() {
    let Some((engine, _, _root)) = python_engine() else {
        return;
    };
    let code = "import sys\nprint('out')\nsys.stderr.write('careful\\n')\n";
    let result = engine.run(ExecutionRequest::new(code)).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "out\n");
    assert_eq!(result.error, "careful\n");
}

#[tokio::test]
async fn explicit_exit_code_is_reported() {
    let Some((engine, _, _root)) = python_engine() else {
        return;
    };
    let result = engine
        .run(ExecutionRequest::new("import sys\nsys.exit(3)"))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, 3);
    assert_eq!(result.error, "Process exited with code 3");
}

#[tokio::test]
async fn infinite_loop_times_out() {
    let Some((engine, _, root)) = python_engine() else {
        return;
    };
    let code = "print('started', flush=True)\nwhile True:\n    pass\n";
    let request = ExecutionRequest::builder(code).timeout_ms(300).build();

    let started = Instant::now();
    let result = engine.run(request).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!result.success);
    assert!(result.timed_out);
    assert!(result.exit_code < 0, "{result:?}");
    assert_eq!(result.stdout, "started\n");
    assert!(result.error.starts_with("Execution timed out after 300 ms"));
    assert!(is_empty_dir(root.path()));
}

#[tokio::test]
async fn program_ignoring_sigterm_is_killed() {
    let Some((engine, _, root)) = python_engine() else {
        return;
    };
    let code = "import signal, time\n\
        signal.signal(signal.SIGTERM, signal.SIG_IGN)\n\
        print('armed', flush=True)\n\
        while True:\n    time.sleep(0.05)\n";
    let request = ExecutionRequest::builder(code).timeout_ms(300).build();
    let grace = engine.config().sandbox.termination_grace;

    let started = Instant::now();
    let result = engine.run(request).await.unwrap();

    // SIGTERM is ignored, so only SIGKILL after the grace period ends it.
    assert!(started.elapsed() >= grace);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(result.timed_out);
    assert_eq!(result.exit_code, -9, "{result:?}");
    assert_eq!(result.stdout, "armed\n");
    assert!(result.error.starts_with("Execution timed out after 300 ms"));
    assert!(is_empty_dir(root.path()));
}

#[tokio::test]
async fn forked_children_are_reaped() {
    let Some((engine, _, root)) = python_engine() else {
        return;
    };
    // The child outlives the parent unless the process group is swept.
    let code = "import os, time\nif os.fork() == 0:\n    time.sleep(60)\nprint('parent done')\n";
    let started = Instant::now();
    let result = engine.run(ExecutionRequest::new(code)).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.stdout, "parent done\n");
    assert!(is_empty_dir(root.path()));
}

#[tokio::test]
async fn concurrent_runs_are_independent() {
    let Some((engine, spawner, _root)) = python_engine() else {
        return;
    };
    let (a, b, c) = tokio::join!(
        engine.run(ExecutionRequest::new("print('a')")),
        engine.run(ExecutionRequest::new("print('b')")),
        engine.run(ExecutionRequest::new("print('c')")),
    );

    assert_eq!(a.unwrap().stdout, "a\n");
    assert_eq!(b.unwrap().stdout, "b\n");
    assert_eq!(c.unwrap().stdout, "c\n");
    assert_eq!(spawner.count(), 3);
}
