//! Dispatch Targets
//!
//! Turns a final placement into a running workload by triggering a GitHub
//! Actions `workflow_dispatch` in the repository that provisions it.
//!
//! | Cloud | Workflow inputs |
//! |-------|-----------------|
//! | aws   | `region`, `instanceType = t3.micro` |
//! | azure | `vmsize = Standard_B2s`, `region` |
//! | gcp   | `region`, `machineType = e2-micro` |
//!
//! [`TargetRouter`] fans out to the per-cloud target by cloud name.

use serde::{Deserialize, Serialize};

pub mod github;
pub mod router;

pub use carbon_core::DispatchError;
pub use github::GitHubActionsTarget;
pub use router::TargetRouter;

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Clouds with a provisioning workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudKind {
    Aws,
    Azure,
    Gcp,
}

impl CloudKind {
    pub const ALL: [CloudKind; 3] = [CloudKind::Aws, CloudKind::Azure, CloudKind::Gcp];

    pub fn as_str(&self) -> &'static str {
        match self {
            CloudKind::Aws => "aws",
            CloudKind::Azure => "azure",
            CloudKind::Gcp => "gcp",
        }
    }

    pub fn matches(&self, cloud: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(cloud.trim())
    }
}

impl std::fmt::Display for CloudKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GitHub repository and workflows that provision each cloud
#[derive(Clone, Serialize, Deserialize)]
pub struct GitHubActionsConfig {
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub azure_workflow: String,
    pub gcp_workflow: String,
    pub aws_workflow: String,
    pub token: String,
    /// Request timeout in seconds
    pub timeout_sec: u64,
}

impl Default for GitHubActionsConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            owner: String::new(),
            repo: String::new(),
            branch: "main".to_string(),
            azure_workflow: String::new(),
            gcp_workflow: String::new(),
            aws_workflow: String::new(),
            token: String::new(),
            timeout_sec: 30,
        }
    }
}

impl GitHubActionsConfig {
    /// Defaults overridden by `GITHUB_API_BASE`, `GITHUB_OWNER`, `GITHUB_REPO`,
    /// `GITHUB_BRANCH`, `GITHUB_{AZURE,GCP,AWS}_WORKFLOW` and `GITHUB_TOKEN`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        let fields: [(&str, &mut String); 8] = [
            ("GITHUB_API_BASE", &mut config.api_base),
            ("GITHUB_OWNER", &mut config.owner),
            ("GITHUB_REPO", &mut config.repo),
            ("GITHUB_BRANCH", &mut config.branch),
            ("GITHUB_AZURE_WORKFLOW", &mut config.azure_workflow),
            ("GITHUB_GCP_WORKFLOW", &mut config.gcp_workflow),
            ("GITHUB_AWS_WORKFLOW", &mut config.aws_workflow),
            ("GITHUB_TOKEN", &mut config.token),
        ];
        for (key, slot) in fields {
            if let Ok(value) = std::env::var(key) {
                if !value.trim().is_empty() {
                    *slot = value.trim().to_string();
                }
            }
        }
        config
    }

    pub fn workflow(&self, kind: CloudKind) -> &str {
        match kind {
            CloudKind::Aws => &self.aws_workflow,
            CloudKind::Azure => &self.azure_workflow,
            CloudKind::Gcp => &self.gcp_workflow,
        }
    }
}

impl std::fmt::Debug for GitHubActionsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubActionsConfig")
            .field("api_base", &self.api_base)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("azure_workflow", &self.azure_workflow)
            .field("gcp_workflow", &self.gcp_workflow)
            .field("aws_workflow", &self.aws_workflow)
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("timeout_sec", &self.timeout_sec)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_kind_matching() {
        assert!(CloudKind::Gcp.matches("GCP"));
        assert!(CloudKind::Azure.matches(" azure "));
        assert!(!CloudKind::Aws.matches("azure"));
        assert_eq!(CloudKind::Aws.to_string(), "aws");
    }

    #[test]
    fn test_workflow_lookup() {
        let config = GitHubActionsConfig {
            gcp_workflow: "gcp-vm.yml".to_string(),
            token: "ghp_secret".to_string(),
            ..Default::default()
        };
        assert_eq!(config.workflow(CloudKind::Gcp), "gcp-vm.yml");
        assert_eq!(config.workflow(CloudKind::Aws), "");
        assert!(!format!("{config:?}").contains("ghp_secret"));
    }
}
