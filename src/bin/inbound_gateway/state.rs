use std::sync::Arc;

use followup_module::{JobQueue, PipelineConfig, Store};

pub struct GatewayState {
    pub store: Arc<Store>,
    pub queue: Arc<JobQueue>,
    pub config: Arc<PipelineConfig>,
}
