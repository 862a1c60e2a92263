//! GitHub Actions `workflow_dispatch` target

use async_trait::async_trait;
use carbon_core::{AdviceResult, DispatchTarget, JobSpec, RequestContext};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::{CloudKind, DispatchError, GitHubActionsConfig, Result};

const USER_AGENT: &str = "CarbonAware-Scheduler/1.0";

const AWS_INSTANCE_TYPE: &str = "t3.micro";
const AZURE_VM_SIZE: &str = "Standard_B2s";
const GCP_MACHINE_TYPE: &str = "e2-micro";

/// Request body for one dispatch
pub fn dispatch_body(kind: CloudKind, branch: &str, region: &str) -> Value {
    let inputs = match kind {
        CloudKind::Aws => json!({ "region": region, "instanceType": AWS_INSTANCE_TYPE }),
        CloudKind::Azure => json!({ "vmsize": AZURE_VM_SIZE, "region": region }),
        CloudKind::Gcp => json!({ "region": region, "machineType": GCP_MACHINE_TYPE }),
    };
    json!({ "ref": branch, "inputs": inputs })
}

/// Triggers the provisioning workflow for one cloud
pub struct GitHubActionsTarget {
    kind: CloudKind,
    config: GitHubActionsConfig,
    client: reqwest::Client,
}

impl GitHubActionsTarget {
    pub fn new(kind: CloudKind, config: GitHubActionsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_sec))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DispatchError::Http(e.to_string()))?;
        Ok(Self {
            kind,
            config,
            client,
        })
    }

    fn dispatch_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/actions/workflows/{}/dispatches",
            self.config.api_base.trim_end_matches('/'),
            self.config.owner,
            self.config.repo,
            self.config.workflow(self.kind)
        )
    }
}

#[async_trait]
impl DispatchTarget for GitHubActionsTarget {
    async fn schedule(
        &self,
        advice: &AdviceResult,
        _job: &JobSpec,
        ctx: &RequestContext,
    ) -> Result<String> {
        if !self.kind.matches(&advice.cloud) {
            return Ok(format!(
                "skipped-non-{}-{}",
                self.kind,
                Utc::now().format("%Y%m%d%H%M%S")
            ));
        }

        let mut request = self
            .client
            .post(self.dispatch_url())
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .json(&dispatch_body(self.kind, &self.config.branch, &advice.region));
        if !self.config.token.trim().is_empty() {
            request = request.bearer_auth(self.config.token.trim());
        }

        let response = ctx
            .guard(request.send())
            .await?
            .map_err(|e| DispatchError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            let id = format!(
                "gha-{}-dispatch-{}",
                self.kind,
                Utc::now().format("%Y%m%d%H%M%S%3f")
            );
            info!(
                cloud = %self.kind,
                region = %advice.region,
                branch = %self.config.branch,
                dispatch_id = %id,
                request_id = ?ctx.correlation_id,
                "workflow dispatched"
            );
            return Ok(id);
        }

        let body = match ctx.guard(response.text()).await? {
            Ok(body) => body,
            Err(e) => {
                warn!(cloud = %self.kind, status = status.as_u16(), error = %e, "failed to read rejection body");
                String::new()
            }
        };
        error!(
            cloud = %self.kind,
            status = status.as_u16(),
            body = %body,
            "workflow_dispatch failed"
        );
        Err(DispatchError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use futures::StreamExt;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Seen {
        requests: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
    }

    async fn spawn_github(status: StatusCode) -> (String, Seen) {
        let seen = Seen::default();
        let captured = seen.clone();
        let app = Router::new().route(
            "/repos/:owner/:repo/actions/workflows/:workflow/dispatches",
            post(
                move |Path((_owner, _repo, workflow)): Path<(String, String, String)>,
                      headers: HeaderMap,
                      Json(body): Json<Value>| {
                    let captured = captured.clone();
                    async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        captured.requests.lock().unwrap().push((workflow, auth, body));
                        (status, "nope")
                    }
                },
            ),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    fn make_config(api_base: String) -> GitHubActionsConfig {
        GitHubActionsConfig {
            api_base,
            owner: "acme".to_string(),
            repo: "infra".to_string(),
            azure_workflow: "azure-vm.yml".to_string(),
            gcp_workflow: "gcp-vm.yml".to_string(),
            aws_workflow: "aws-ec2.yml".to_string(),
            token: "ghp_test".to_string(),
            ..Default::default()
        }
    }

    fn make_advice(cloud: &str, region: &str) -> AdviceResult {
        AdviceResult::fallback(
            &carbon_core::LocationSpec::new(cloud, region),
            Utc::now(),
            "test".to_string(),
        )
    }

    #[test]
    fn test_dispatch_bodies() {
        let aws = dispatch_body(CloudKind::Aws, "main", "us-east-1");
        assert_eq!(aws["ref"], "main");
        assert_eq!(aws["inputs"]["instanceType"], "t3.micro");

        let azure = dispatch_body(CloudKind::Azure, "release", "westeurope");
        assert_eq!(azure["inputs"]["vmsize"], "Standard_B2s");
        assert_eq!(azure["inputs"]["region"], "westeurope");

        let gcp = dispatch_body(CloudKind::Gcp, "main", "us-west1");
        assert_eq!(gcp["inputs"]["machineType"], "e2-micro");
    }

    #[tokio::test]
    async fn test_other_cloud_is_skipped_without_request() {
        let (base, seen) = spawn_github(StatusCode::NO_CONTENT).await;
        let target = GitHubActionsTarget::new(CloudKind::Gcp, make_config(base)).unwrap();

        let id = target
            .schedule(&make_advice("azure", "eastus"), &JobSpec::default(), &RequestContext::detached())
            .await
            .unwrap();
        assert!(id.starts_with("skipped-non-gcp-"));
        assert!(seen.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_accepted_dispatch_returns_id() {
        let (base, seen) = spawn_github(StatusCode::NO_CONTENT).await;
        let target = GitHubActionsTarget::new(CloudKind::Azure, make_config(base)).unwrap();

        let id = target
            .schedule(&make_advice("Azure", "westeurope"), &JobSpec::default(), &RequestContext::detached())
            .await
            .unwrap();
        assert!(id.starts_with("gha-azure-dispatch-"));

        let requests = seen.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (workflow, auth, body) = &requests[0];
        assert_eq!(workflow, "azure-vm.yml");
        assert_eq!(auth.as_deref(), Some("Bearer ghp_test"));
        assert_eq!(body["inputs"]["region"], "westeurope");
    }

    #[tokio::test]
    async fn test_rejected_dispatch_is_error() {
        let (base, _seen) = spawn_github(StatusCode::UNPROCESSABLE_ENTITY).await;
        let target = GitHubActionsTarget::new(CloudKind::Aws, make_config(base)).unwrap();

        let err = target
            .schedule(&make_advice("aws", "us-east-1"), &JobSpec::default(), &RequestContext::detached())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Rejected {
                status: 422,
                body: "nope".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_cancelled_rejection_body_read_is_cancelled() {
        let app = Router::new().route(
            "/repos/:owner/:repo/actions/workflows/:workflow/dispatches",
            post(|| async {
                let chunks = futures::stream::once(async { Ok::<_, std::io::Error>("partial ") })
                    .chain(futures::stream::once(async {
                        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                        Ok::<_, std::io::Error>("never")
                    }));
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    axum::body::Body::from_stream(chunks),
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let target =
            GitHubActionsTarget::new(CloudKind::Gcp, make_config(format!("http://{addr}"))).unwrap();
        let (handle, signal) = carbon_core::CancelHandle::new();
        let ctx = RequestContext::with_cancel(None, signal);
        let task = tokio::spawn(async move {
            target
                .schedule(&make_advice("gcp", "us-east1"), &JobSpec::default(), &ctx)
                .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        handle.cancel();

        let err = tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .expect("cancelled dispatch should return promptly")
            .unwrap()
            .unwrap_err();
        assert_eq!(err, DispatchError::Cancelled);
    }
}
