//! Shared agent state: configuration and collaborator handles.
//!
//! Built once in `main` and cloned into every connection handler; nothing in
//! here is mutated after startup.

use std::sync::Arc;

use crate::config::AgentConfig;
use crate::executor::{CommandExecutor, SystemExecutor};
use crate::metrics::{MetricSource, SysinfoSource};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AgentConfig>,
    pub source: Arc<dyn MetricSource>,
    pub executor: Arc<dyn CommandExecutor>,
}

impl AppState {
    pub fn new(
        config: AgentConfig,
        source: Arc<dyn MetricSource>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            source,
            executor,
        }
    }

    /// State wired to the real host: sysinfo metrics and system commands.
    pub fn for_host(config: AgentConfig) -> Self {
        let source = SysinfoSource::new(
            config.sample_interval,
            config.software_tool.clone(),
            config.services_tool.clone(),
        );
        Self::new(config, Arc::new(source), Arc::new(SystemExecutor))
    }
}
