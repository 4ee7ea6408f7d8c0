use crate::ecs::{describe_instances_with_retry, EcsApi};
use crate::error::{CloudError, CloudResult};
use crate::oos::{OosApi, APPLICATION_GROUP_NOT_FOUND, APPLICATION_NOT_FOUND};
use crate::synth::Runtime;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

pub const WORKING_DIR: &str = "/root";
pub const DEPLOY_TEMPLATE: &str = "oss-revision";
pub const DEPLOY_SERVICE_ID: &str = "service-af8acc2d6f4044f4b5ea";
pub const DEFAULT_ZONE: &str = "cn-hangzhou-b";

/// Where the uploaded artifact lives in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactLocation {
    pub region_id: String,
    pub bucket_name: String,
    pub object_name: String,
    pub version_id: Option<String>,
    pub is_internal: bool,
}

/// Everything needed to deploy one application group.
#[derive(Debug, Clone)]
pub struct GroupDeploy<'a> {
    pub application: &'a str,
    pub group: &'a str,
    pub deploy_region: &'a str,
    /// Region of the orchestration API.
    pub management_region: &'a str,
    pub port: u16,
    pub instance_ids: &'a [String],
    pub start: &'a str,
    pub stop: &'a str,
    pub runtime: Option<Runtime>,
    pub location: &'a ArtifactLocation,
}

/// The provider deploy call, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployCall {
    pub deploy_parameters: String,
    pub revision_id: Option<String>,
    pub created_group: bool,
}

pub fn ownership_tag_key(application: &str) -> String {
    format!("app-{application}")
}

fn exists(result: CloudResult<Value>, not_found: &str) -> CloudResult<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found(not_found) => Ok(false),
        Err(e) => Err(e),
    }
}

pub async fn application_exists(oos: &dyn OosApi, region: &str, name: &str) -> CloudResult<bool> {
    exists(oos.get_application(region, name).await, APPLICATION_NOT_FOUND)
}

pub async fn application_group_exists(
    oos: &dyn OosApi,
    region: &str,
    application: &str,
    group: &str,
) -> CloudResult<bool> {
    exists(
        oos.get_application_group(region, application, group).await,
        APPLICATION_GROUP_NOT_FOUND,
    )
}

/// Creates the application unless it exists. Returns whether it was created.
pub async fn ensure_application(oos: &dyn OosApi, region: &str, name: &str) -> CloudResult<bool> {
    if application_exists(oos, region, name).await? {
        info!("application {name} already exists");
        return Ok(false);
    }
    oos.create_application(region, name).await?;
    info!("created application {name}");
    Ok(true)
}

/// Tags every instance lacking `app-<application>=<group>` with one write.
/// A failed tag check counts as untagged. Returns the ids that were tagged.
pub async fn ensure_instances_tagged(
    ecs: &dyn EcsApi,
    region: &str,
    application: &str,
    group: &str,
    instance_ids: &[String],
) -> CloudResult<Vec<String>> {
    let key = ownership_tag_key(application);
    let mut to_tag = Vec::new();
    for id in instance_ids {
        let single = std::slice::from_ref(id);
        let tagged = match describe_instances_with_retry(ecs, region, single).await {
            Ok(found) => found.iter().any(|i| &i.id == id && i.has_tag(&key, group)),
            Err(e) => {
                warn!("tag check for {id} failed, will tag it: {e}");
                false
            }
        };
        if !tagged {
            to_tag.push(id.clone());
        }
    }

    if to_tag.is_empty() {
        info!("all instances already carry {key}={group}");
        return Ok(to_tag);
    }
    ecs.tag_resources(region, &to_tag, &key, group).await?;
    info!("tagged {to_tag:?} with {key}={group}");
    Ok(to_tag)
}

/// Inline parameters for a group that is being created by this deploy.
pub fn new_group_parameters(d: &GroupDeploy<'_>) -> Value {
    let package = d.runtime.unwrap_or(Runtime::Docker).extension_package();
    json!({
        "Parameters": {
            "CreateEcsOption": if d.instance_ids.is_empty() { "NewECS" } else { "ExistECS" },
            "InstanceId": d.instance_ids.first(),
            "ApplicationName": d.application,
            "Description": "",
            "ZoneId": DEFAULT_ZONE,
            "Port": d.port,
            "RevisionType": "Oss",
            "RegionIdOSS": d.location.region_id,
            "BucketName": d.location.bucket_name,
            "ObjectName": d.location.object_name,
            "VersionId": d.location.version_id,
            "IsInternalOSS": d.location.is_internal,
            "ApplicationGroupName": d.group,
            "WorkingDir": WORKING_DIR,
            "ApplicationStart": d.start,
            "ApplicationStop": d.stop,
            "PackageName": package,
        },
        "TemplateName": DEPLOY_TEMPLATE,
        "ServiceId": DEPLOY_SERVICE_ID,
    })
}

pub fn revision_location(location: &ArtifactLocation) -> Value {
    json!({
        "regionId": location.region_id,
        "bucketName": location.bucket_name,
        "objectName": location.object_name,
        "versionId": location.version_id,
        "isInternal": if location.is_internal { "true" } else { "false" },
    })
}

pub fn revision_hooks(start: &str, stop: &str) -> Value {
    json!({
        "workingDir": WORKING_DIR,
        "applicationStart": start,
        "applicationStop": stop,
    })
}

/// Execution parameters for redeploying an existing group at `revision_id`.
/// The inner documents are JSON strings embedded in JSON.
pub fn existing_group_parameters(application: &str, group: &str, revision_id: &str) -> String {
    let inner = json!({
        "applicationName": application,
        "applicationGroupName": group,
        "deployRevisionId": revision_id,
        "deployMethod": "all",
        "batchNumber": 2,
        "batchPauseOption": "Automatic",
    });
    let start = json!({
        "Parameters": inner.to_string(),
        "Mode": "FailurePause",
    });
    json!({ "StartExecutionParameters": start.to_string() }).to_string()
}

/// Creates the group or a new revision as needed, tags the instances, and
/// returns the deploy call to issue.
pub async fn prepare_group_deploy(
    oos: &dyn OosApi,
    ecs: &dyn EcsApi,
    d: &GroupDeploy<'_>,
) -> CloudResult<DeployCall> {
    let region = d.management_region;
    if !application_group_exists(oos, region, d.application, d.group).await? {
        info!("creating application group {}/{}", d.application, d.group);
        oos.create_application_group(region, d.application, d.group, d.deploy_region)
            .await?;
        ensure_instances_tagged(ecs, d.deploy_region, d.application, d.group, d.instance_ids)
            .await?;
        return Ok(DeployCall {
            deploy_parameters: new_group_parameters(d).to_string(),
            revision_id: None,
            created_group: true,
        });
    }

    info!("application group {}/{} exists, creating revision", d.application, d.group);
    ensure_instances_tagged(ecs, d.deploy_region, d.application, d.group, d.instance_ids).await?;
    let location = revision_location(d.location).to_string();
    let hooks = revision_hooks(d.start, d.stop).to_string();
    let revision_id = oos
        .create_deploy_revision(region, d.application, &location, &hooks)
        .await?;
    if revision_id.is_empty() {
        return Err(CloudError::Decode("empty deploy revision id".to_string()));
    }
    Ok(DeployCall {
        deploy_parameters: existing_group_parameters(d.application, d.group, &revision_id),
        revision_id: Some(revision_id),
        created_group: false,
    })
}
