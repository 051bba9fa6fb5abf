use crate::config::AppConfig;
use crate::core::JobService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub jobs: JobService,
}

impl AppContext {
    /// Build the context and start the job workers.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let jobs = JobService::start(config.clone())?;
        Ok(Self { config, jobs })
    }
}
