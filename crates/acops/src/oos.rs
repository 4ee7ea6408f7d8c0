use crate::error::{CloudError, CloudResult};
use crate::openapi::{params, RpcClient, OOS};
use async_trait::async_trait;
use serde_json::Value;

pub const APPLICATION_NOT_FOUND: &str = "EntityNotExists.Application";
pub const APPLICATION_GROUP_NOT_FOUND: &str = "EntityNotExists.ApplicationGroup";

/// Application management calls of the orchestration service.
#[async_trait]
pub trait OosApi: Send + Sync {
    async fn get_application(&self, region: &str, name: &str) -> CloudResult<Value>;

    async fn create_application(&self, region: &str, name: &str) -> CloudResult<Value>;

    async fn get_application_group(
        &self,
        region: &str,
        application: &str,
        group: &str,
    ) -> CloudResult<Value>;

    async fn create_application_group(
        &self,
        region: &str,
        application: &str,
        group: &str,
        deploy_region: &str,
    ) -> CloudResult<Value>;

    /// Returns the new revision id.
    async fn create_deploy_revision(
        &self,
        region: &str,
        application: &str,
        location: &str,
        hooks: &str,
    ) -> CloudResult<String>;

    async fn deploy_application_group(
        &self,
        region: &str,
        application: &str,
        group: &str,
        deploy_parameters: &str,
        revision_id: Option<&str>,
    ) -> CloudResult<Value>;

    async fn list_executions(&self, region: &str, execution_id: &str) -> CloudResult<Value>;
}

#[async_trait]
impl OosApi for RpcClient {
    async fn get_application(&self, region: &str, name: &str) -> CloudResult<Value> {
        let p = params([("RegionId", region), ("Name", name)]);
        self.call(OOS, region, "GetApplication", &p).await
    }

    async fn create_application(&self, region: &str, name: &str) -> CloudResult<Value> {
        let p = params([("RegionId", region), ("Name", name), ("AlarmConfig", "{}")]);
        self.call(OOS, region, "CreateApplication", &p).await
    }

    async fn get_application_group(
        &self,
        region: &str,
        application: &str,
        group: &str,
    ) -> CloudResult<Value> {
        let p = params([
            ("RegionId", region),
            ("ApplicationName", application),
            ("Name", group),
        ]);
        self.call(OOS, region, "GetApplicationGroup", &p).await
    }

    async fn create_application_group(
        &self,
        region: &str,
        application: &str,
        group: &str,
        deploy_region: &str,
    ) -> CloudResult<Value> {
        let p = params([
            ("RegionId", region),
            ("ApplicationName", application),
            ("DeployRegionId", deploy_region),
            ("Name", group),
        ]);
        self.call(OOS, region, "CreateApplicationGroup", &p).await
    }

    async fn create_deploy_revision(
        &self,
        region: &str,
        application: &str,
        location: &str,
        hooks: &str,
    ) -> CloudResult<String> {
        let p = params([
            ("RegionId", region),
            ("ApplicationName", application),
            ("Description", ""),
            ("RevisionType", "Oss"),
            ("Location", location),
            ("Hooks", hooks),
        ]);
        let doc = self.call(OOS, region, "CreateDeployRevision", &p).await?;
        revision_id(&doc)
    }

    async fn deploy_application_group(
        &self,
        region: &str,
        application: &str,
        group: &str,
        deploy_parameters: &str,
        revision_id: Option<&str>,
    ) -> CloudResult<Value> {
        let mut p = params([
            ("RegionId", region),
            ("ApplicationName", application),
            ("Name", group),
            ("DeployParameters", deploy_parameters),
        ]);
        if let Some(r) = revision_id {
            p.insert("RevisionId".into(), r.into());
        }
        self.call(OOS, region, "DeployApplicationGroup", &p).await
    }

    async fn list_executions(&self, region: &str, execution_id: &str) -> CloudResult<Value> {
        let p = params([("RegionId", region), ("ExecutionId", execution_id)]);
        self.call(OOS, region, "ListExecutions", &p).await
    }
}

pub fn revision_id(doc: &Value) -> CloudResult<String> {
    match doc.pointer("/Revision/RevisionId") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(CloudError::Decode(
            "CreateDeployRevision response has no Revision.RevisionId".to_string(),
        )),
    }
}

/// `(status, execution_id)` of a `GetApplicationGroup` document.
pub fn group_status(doc: &Value) -> (Option<String>, Option<String>) {
    let field = |k: &str| {
        doc.pointer(&format!("/ApplicationGroup/{k}"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    (field("Status"), field("ExecutionId"))
}
