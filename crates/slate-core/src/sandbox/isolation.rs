//! Restrictions applied in the forked child before exec

use crate::config::SandboxConfig;
use nix::sched::CloneFlags;
use nix::sys::resource::{Resource, setrlimit};

/// Configuration for namespace isolation
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceConfig {
    /// Create new user namespace
    pub user: bool,
    /// Create new network namespace
    pub net: bool,
}

impl NamespaceConfig {
    #[must_use]
    pub const fn from_config(config: &SandboxConfig) -> Self {
        Self {
            user: config.isolate_network,
            net: config.isolate_network,
        }
    }

    /// Convert to nix CloneFlags
    #[must_use]
    pub fn to_clone_flags(self) -> CloneFlags {
        let mut flags = CloneFlags::empty();

        if self.user {
            flags |= CloneFlags::CLONE_NEWUSER;
        }
        if self.net {
            flags |= CloneFlags::CLONE_NEWNET;
        }

        flags
    }

    /// Enter new namespaces using unshare
    pub fn enter(self) -> nix::Result<()> {
        let flags = self.to_clone_flags();
        if flags.is_empty() {
            return Ok(());
        }
        nix::sched::unshare(flags)
    }
}

/// POSIX resource limits; zero leaves a resource unlimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub address_space: u64,
    pub cpu_seconds: u64,
    pub file_size: u64,
    pub open_files: u64,
}

impl ResourceLimits {
    #[must_use]
    pub const fn from_config(config: &SandboxConfig) -> Self {
        Self {
            address_space: config.memory_limit,
            cpu_seconds: config.cpu_time_limit,
            file_size: config.file_size_limit,
            open_files: config.open_files_limit,
        }
    }

    /// The non-zero limits, as (resource, value) pairs
    #[must_use]
    pub fn entries(&self) -> Vec<(Resource, u64)> {
        [
            (Resource::RLIMIT_AS, self.address_space),
            (Resource::RLIMIT_CPU, self.cpu_seconds),
            (Resource::RLIMIT_FSIZE, self.file_size),
            (Resource::RLIMIT_NOFILE, self.open_files),
        ]
        .into_iter()
        .filter(|&(_, limit)| limit > 0)
        .collect()
    }
}

/// Everything the child does between fork and exec
#[derive(Debug, Clone)]
pub struct ChildSetup {
    namespaces: NamespaceConfig,
    /// Resolved up front: the hook must not allocate
    limits: Vec<(Resource, u64)>,
}

impl ChildSetup {
    #[must_use]
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            namespaces: NamespaceConfig::from_config(config),
            limits: ResourceLimits::from_config(config).entries(),
        }
    }

    /// Runs in the child after fork. Only issues `unshare` and `setrlimit`.
    pub fn apply(&self) -> std::io::Result<()> {
        self.namespaces.enter()?;
        for &(resource, limit) in &self.limits {
            setrlimit(resource, limit, limit)?;
        }
        Ok(())
    }
}
