//! Executor factory

use crate::config::schema::{TargetConfig, TargetKind};
use crate::error::KcacheResult;
use crate::target::executor::RemoteExecutor;
use crate::target::local::LocalExecutor;
use crate::target::ssh::SshExecutor;
use std::sync::Arc;
use tracing::debug;

/// Create the executor described by the target section of the config
pub fn create_executor(config: &TargetConfig) -> KcacheResult<Arc<dyn RemoteExecutor>> {
    match config.kind {
        TargetKind::Local => {
            debug!("Using local target");
            Ok(Arc::new(LocalExecutor::new(config.sudo)))
        }
        TargetKind::Ssh => {
            let exec = SshExecutor::from_config(config)?;
            debug!("Using ssh target {}", exec.name());
            Ok(Arc::new(exec))
        }
    }
}
