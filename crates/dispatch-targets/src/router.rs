//! Per-cloud fan-out of dispatch requests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use carbon_core::{AdviceResult, DispatchTarget, JobSpec, RequestContext};
use tracing::warn;
use uuid::Uuid;

use crate::github::GitHubActionsTarget;
use crate::{CloudKind, GitHubActionsConfig, Result};

/// Routes advice to the target registered for its cloud (case-insensitive)
#[derive(Default, Clone)]
pub struct TargetRouter {
    by_cloud: HashMap<String, Arc<dyn DispatchTarget>>,
}

impl TargetRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// GitHub Actions targets for every supported cloud
    pub fn github_actions(config: &GitHubActionsConfig) -> Result<Self> {
        let mut router = Self::new();
        for kind in CloudKind::ALL {
            let target = GitHubActionsTarget::new(kind, config.clone())?;
            router = router.with_target(kind.as_str(), Arc::new(target));
        }
        Ok(router)
    }

    pub fn with_target(mut self, cloud: &str, target: Arc<dyn DispatchTarget>) -> Self {
        self.by_cloud.insert(cloud.trim().to_lowercase(), target);
        self
    }

    pub fn clouds(&self) -> Vec<String> {
        let mut clouds: Vec<String> = self.by_cloud.keys().cloned().collect();
        clouds.sort();
        clouds
    }
}

#[async_trait]
impl DispatchTarget for TargetRouter {
    async fn schedule(
        &self,
        advice: &AdviceResult,
        job: &JobSpec,
        ctx: &RequestContext,
    ) -> Result<String> {
        match self.by_cloud.get(&advice.cloud.trim().to_lowercase()) {
            Some(target) => target.schedule(advice, job, ctx).await,
            None => {
                warn!(cloud = %advice.cloud, "no dispatch target registered");
                Ok(format!("no-target-{}-{}", advice.cloud, Uuid::new_v4()))
            }
        }
    }
}
