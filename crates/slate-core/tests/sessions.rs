mod common;

use common::{engine, is_empty_dir, python_engine};
use slate_core::{BackendState, Engine, EngineConfig, ExecutionRequest, SessionId};

#[tokio::test]
async fn cleanup_twice_is_silent() {
    let (engine, spawner, _root) = engine();
    let id = SessionId::from("never-prepared");

    engine.cleanup_session(&id).await;
    engine.cleanup_session(&id).await;

    assert_eq!(engine.session_state(&id), None);
    assert_eq!(spawner.count(), 0);
}

#[tokio::test]
async fn empty_session_id_is_rejected() {
    let (engine, spawner, _root) = engine();
    let request = ExecutionRequest::builder("print(1)").session("").build();
    let err = engine.run(request).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(spawner.count(), 0);
}

#[tokio::test]
async fn failed_prepare_leaves_no_entry() {
    let root = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.sandbox.python_path = "/nonexistent/bin/python3".into();
    config.sandbox.work_root = root.path().to_path_buf();
    let engine = Engine::new(config).unwrap();
    let id = SessionId::from("broken");

    engine.prepare_for_session(&id).await;

    assert_eq!(engine.session_state(&id), None);
    assert!(engine.active_sessions().is_empty());
    assert!(is_empty_dir(root.path()));
}

#[tokio::test]
async fn prepared_session_runs_warm() {
    let Some((engine, spawner, root)) = python_engine() else {
        return;
    };
    let id = SessionId::from("algebra-1");

    engine.prepare_for_session(&id).await;
    assert_eq!(engine.session_state(&id), Some(BackendState::Ready));
    assert_eq!(spawner.count(), 1);

    // Preparing again is a no-op.
    engine.prepare_for_session(&id).await;
    assert_eq!(spawner.count(), 1);

    let request = ExecutionRequest::builder("print('warm')").session(id.clone()).build();
    let result = engine.run(request).await.unwrap();
    assert!(result.success, "{result:?}");
    assert_eq!(result.stdout, "warm\n");
    // The warm unit ran the job and a replacement was started; no cold spawn.
    assert_eq!(spawner.count(), 2);
    assert_eq!(engine.active_sessions(), vec![id.clone()]);

    let request = ExecutionRequest::builder("x = 1\nprint(x)").session(id.clone()).build();
    let trace = engine.trace(request).await.unwrap();
    assert_eq!(trace.stdout(), "1\n");
    assert_eq!(spawner.count(), 3);

    engine.cleanup_session(&id).await;
    engine.cleanup_session(&id).await;
    assert_eq!(engine.session_state(&id), None);
    assert!(engine.active_sessions().is_empty());
    assert!(is_empty_dir(root.path()));
}

#[tokio::test]
async fn torn_down_session_falls_back_to_cold_units() {
    let Some((engine, spawner, root)) = python_engine() else {
        return;
    };
    let id = SessionId::from("closed");
    engine.prepare_for_session(&id).await;
    engine.cleanup_session(&id).await;
    let before = spawner.count();

    let request = ExecutionRequest::builder("print('cold')").session(id.clone()).build();
    let result = engine.run(request).await.unwrap();
    assert_eq!(result.stdout, "cold\n");
    assert_eq!(spawner.count(), before + 1);
    assert_eq!(engine.session_state(&id), None);
    assert!(is_empty_dir(root.path()));

    // A fresh prepare creates a new backend under the same id.
    engine.prepare_for_session(&id).await;
    assert_eq!(engine.session_state(&id), Some(BackendState::Ready));
    engine.shutdown().await;
    assert!(is_empty_dir(root.path()));
}

#[tokio::test]
async fn sessions_do_not_share_units() {
    let Some((engine, _, _root)) = python_engine() else {
        return;
    };
    let a = SessionId::from("a");
    let b = SessionId::from("b");
    tokio::join!(engine.prepare_for_session(&a), engine.prepare_for_session(&b));

    let code = "import os\nprint(os.getcwd())";
    let (ra, rb) = tokio::join!(
        engine.run(ExecutionRequest::builder(code).session(a.clone()).build()),
        engine.run(ExecutionRequest::builder(code).session(b.clone()).build()),
    );
    assert_ne!(ra.unwrap().stdout, rb.unwrap().stdout);
    engine.shutdown().await;
}
