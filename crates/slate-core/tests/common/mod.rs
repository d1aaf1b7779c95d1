#![allow(dead_code)]

use slate_core::sandbox::{ProcessSpawner, SandboxUnit, Spawner};
use slate_core::{Engine, EngineConfig, Result, SandboxConfig};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Starts real interpreters and counts how many it started
#[derive(Default)]
pub struct CountingSpawner {
    spawned: AtomicUsize,
}

impl CountingSpawner {
    pub fn count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

impl Spawner for CountingSpawner {
    fn spawn(&self, config: &SandboxConfig) -> Result<SandboxUnit> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        ProcessSpawner.spawn(config)
    }
}

pub fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

/// Engine whose units live under a private root, plus its spawn counter
pub fn engine() -> (Engine, Arc<CountingSpawner>, TempDir) {
    let root = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.sandbox.work_root = root.path().to_path_buf();
    let spawner = Arc::new(CountingSpawner::default());
    let engine = Engine::with_spawner(config, spawner.clone()).unwrap();
    (engine, spawner, root)
}

/// Same as [`engine`], or `None` (with a note) when there is no `python3`
pub fn python_engine() -> Option<(Engine, Arc<CountingSpawner>, TempDir)> {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return None;
    }
    Some(engine())
}

pub fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}
