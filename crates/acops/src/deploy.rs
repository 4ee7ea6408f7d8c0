use crate::config::Settings;
use crate::ecs::{missing_instances, EcsApi};
use crate::oos::{group_status, OosApi};
use crate::oss::{content_type_for, ensure_deploy_bucket, read_upload, OssApi};
use crate::provision::{self, ArtifactLocation, GroupDeploy};
use crate::synth::{self, Runtime};
use crate::{archive, project, state};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const OSS_CONSOLE_LINK: &str = "https://oss.console.aliyun.com/";

/// Cloud collaborators used by the deploy workflow.
pub struct CloudContext<'a> {
    pub settings: &'a Settings,
    pub oos: &'a dyn OosApi,
    pub ecs: &'a dyn EcsApi,
    pub oss: &'a dyn OssApi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployRequest {
    pub name: String,
    pub deploy_region_id: String,
    pub application_group_name: String,
    /// Object key of the uploaded artifact; defaults to the file name.
    #[serde(default)]
    pub object_name: Option<String>,
    pub file_path: PathBuf,
    pub deploy_language: String,
    pub port: u16,
    #[serde(default)]
    pub project_path: Option<PathBuf>,
    #[serde(default)]
    pub application_start: Option<String>,
    #[serde(default)]
    pub application_stop: Option<String>,
    #[serde(default)]
    pub instance_ids: Vec<String>,
}

/// A deploy the caller must fix before retrying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "error", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rejection {
    EcsInstanceRequired {
        message: String,
        ecs_purchase_link: String,
        security_group_link: String,
        instructions: String,
    },
    EcsInstanceNotFound {
        message: String,
        region_id: String,
        missing_instance_ids: Vec<String>,
        provided_instance_ids: Vec<String>,
        console_link: String,
        instructions: String,
    },
    StartCommandRequired {
        message: String,
        file_path: String,
        deploy_language: String,
        instructions: String,
    },
    OssServiceNotActivated {
        message: String,
        oss_console_link: String,
        instructions: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deployed {
    pub response: Value,
    pub service_link: String,
    pub security_group_link: String,
    pub port: u16,
    pub deploy_region_id: String,
    pub bucket_name: String,
    pub oss_bucket_link: String,
    pub start_command: String,
    pub stop_command: String,
    pub security_group_instructions: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DeployOutcome {
    Deployed(Box<Deployed>),
    Rejected(Rejection),
}

impl DeployOutcome {
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            DeployOutcome::Deployed(_) => None,
            DeployOutcome::Rejected(r) => Some(match r {
                Rejection::EcsInstanceRequired { .. } => "ECS_INSTANCE_REQUIRED",
                Rejection::EcsInstanceNotFound { .. } => "ECS_INSTANCE_NOT_FOUND",
                Rejection::StartCommandRequired { .. } => "START_COMMAND_REQUIRED",
                Rejection::OssServiceNotActivated { .. } => "OSS_SERVICE_NOT_ACTIVATED",
            }),
        }
    }
}

pub fn ecs_purchase_link(region: &str) -> String {
    format!("https://ecs-buy.aliyun.com/ecs#/custom/prepay/{region}?orderSource=buyWizard-console-list")
}
pub fn security_group_console_link(region: &str) -> String {
    format!("https://ecs.console.aliyun.com/securityGroup?regionId={region}")
}
pub fn instance_console_link(region: &str) -> String {
    format!("https://ecs.console.aliyun.com/?regionId={region}#/server/instance")
}
pub fn service_link(app: &str, group: &str) -> String {
    format!("https://ecs.console.aliyun.com/app/detail?tabKey=overview&appName={app}&groupName={group}")
}
pub fn instance_security_group_link(instance: &str, region: &str) -> String {
    format!("https://ecs.console.aliyun.com/server/{instance}/group?regionId={region}#/")
}
pub fn oss_bucket_link(bucket: &str) -> String {
    format!("https://oss.console.aliyun.com/bucket/oss-cn-hangzhou/{bucket}/object")
}

fn instance_required(region: &str) -> Rejection {
    let purchase = ecs_purchase_link(region);
    let sg = security_group_console_link(region);
    Rejection::EcsInstanceRequired {
        message: "At least one ECS instance id is required to deploy.".to_string(),
        instructions: format!(
            "## ECS instance required\n\n\
             Purchase an instance in region {region}: [{purchase}]({purchase})\n\n\
             Then open the application port in its security group: [{sg}]({sg})\n\n\
             Add an inbound TCP rule for the port with source 0.0.0.0/0 (or a narrower range)."
        ),
        ecs_purchase_link: purchase,
        security_group_link: sg,
    }
}

fn instances_not_found(region: &str, missing: Vec<String>, provided: &[String]) -> Rejection {
    let console = instance_console_link(region);
    Rejection::EcsInstanceNotFound {
        message: format!("Some ECS instances do not exist in region {region}."),
        instructions: format!(
            "## ECS instance validation failed\n\n\
             **Deployment region**: {region}\n\n\
             **Missing instance ids**: {}\n\n\
             **All provided instance ids**: {}\n\n\
             Check that the ids are correct, that the instances live in region {region} \
             and that your credentials may access them: {console}",
            missing.join(", "),
            provided.join(", ")
        ),
        region_id: region.to_string(),
        missing_instance_ids: missing,
        provided_instance_ids: provided.to_vec(),
        console_link: console,
    }
}

fn start_command_required(file_path: &Path, language: &str) -> Rejection {
    Rejection::StartCommandRequired {
        message: "No start command could be derived from the artifact; \
                  call again with application_start set."
            .to_string(),
        file_path: file_path.display().to_string(),
        deploy_language: language.to_string(),
        instructions: format!(
            "## Start command required\n\n\
             **File**: {}\n**Language**: {language}\n\n\
             The start command must:\n\
             1. extract the archive first when the artifact is a tar.gz, tar or zip file\n\
             2. guard every path it uses with `[ -f <path> ]` or `[ -d <path> ]`\n\
             3. run in the background and log to /root/app.log: `nohup <command> > /root/app.log 2>&1 &`\n\n\
             Example (java): `[ -f app.tar.gz ] && tar -xzf app.tar.gz && [ -f app/app.jar ] && \
             nohup java -jar app/app.jar > /root/app.log 2>&1 &`",
            file_path.display()
        ),
    }
}

fn oss_not_activated() -> Rejection {
    Rejection::OssServiceNotActivated {
        message: "Object Storage Service is not activated for this account.".to_string(),
        oss_console_link: OSS_CONSOLE_LINK.to_string(),
        instructions: format!(
            "## OSS not activated\n\n\
             Activate OSS at [{OSS_CONSOLE_LINK}]({OSS_CONSOLE_LINK}) and retry the deploy."
        ),
    }
}

fn security_group_instructions(service: &str, sg: &str, port: u16) -> String {
    format!(
        "## Deployment successful\n\n\
         **Service link**: [View deployment details]({service})\n\n\
         ### Open the application port\n\n\
         Port **{port}** must be allowed by the instance's security group before the \
         application is reachable.\n\n\
         **Security group link**: [{sg}]({sg})\n\n\
         1. Open the security group link above\n\
         2. Select the security group of the instance\n\
         3. Choose \"Add Security Group Rule\" for inbound traffic\n\
         4. Port range {port}/{port}, protocol TCP, source 0.0.0.0/0 or narrower\n\n\
         The application is then reachable on the instance's public IP at port {port}."
    )
}

/// Upload, provision and deploy one artifact to a set of instances.
pub async fn code_deploy(cloud: &CloudContext<'_>, req: DeployRequest) -> Result<DeployOutcome> {
    if req.name.trim().is_empty() {
        anyhow::bail!("application name cannot be empty");
    }
    if req.application_group_name.trim().is_empty() {
        anyhow::bail!("application group name cannot be empty");
    }
    let region = req.deploy_region_id.as_str();
    let runtime = match req.deploy_language.parse::<Runtime>() {
        Ok(r) => Some(r),
        Err(e) => {
            warn!("{e}; only a generic stop command can be derived");
            None
        }
    };

    if req.instance_ids.is_empty() {
        return Ok(DeployOutcome::Rejected(instance_required(region)));
    }
    let missing = missing_instances(cloud.ecs, region, &req.instance_ids)
        .await
        .context("validate ECS instances")?;
    if !missing.is_empty() {
        return Ok(DeployOutcome::Rejected(instances_not_found(
            region,
            missing,
            &req.instance_ids,
        )));
    }

    let artifact_path = absolute(&req.file_path)?;
    if !artifact_path.is_file() {
        anyhow::bail!("file does not exist: {}", artifact_path.display());
    }
    let layout = project::resolve_layout(req.project_path.as_deref(), &artifact_path)?;
    let staged = project::stage_artifact(&layout, &artifact_path)?;

    let supplied = |cmd: &Option<String>| cmd.clone().filter(|c| !c.trim().is_empty());
    let (start, stop) = match (supplied(&req.application_start), supplied(&req.application_stop)) {
        (Some(start), Some(stop)) => (start, stop),
        (start, stop) => {
            let artifact = archive::inspect(&staged).await?;
            let synthesized = synth::synthesize(&artifact, runtime, &req.name, Some(req.port));
            let Some(start) = start.or(synthesized.start) else {
                return Ok(DeployOutcome::Rejected(start_command_required(
                    &staged,
                    &req.deploy_language,
                )));
            };
            (start, stop.unwrap_or(synthesized.stop))
        }
    };

    let bucket = match ensure_deploy_bucket(cloud.oss, &req.name).await {
        Ok(b) => b,
        Err(e) => {
            warn!("deploy bucket unavailable: {e}");
            return Ok(DeployOutcome::Rejected(oss_not_activated()));
        }
    };

    let file_name = staged
        .file_name()
        .and_then(|n| n.to_str())
        .context("artifact file name is not valid UTF-8")?
        .to_string();
    let object_name = req.object_name.clone().unwrap_or(file_name);
    let body = read_upload(&staged).await?;
    let uploaded = cloud
        .oss
        .put_object(&bucket, &object_name, body, content_type_for(&staged))
        .await
        .with_context(|| format!("upload {object_name} to bucket {bucket}"))?;
    info!("uploaded {object_name} to {bucket} (version {:?})", uploaded.version_id);

    let oss_region = cloud.settings.oss_region.as_str();
    let location = ArtifactLocation {
        region_id: oss_region.to_string(),
        bucket_name: bucket.clone(),
        object_name,
        version_id: uploaded.version_id,
        is_internal: region.eq_ignore_ascii_case(oss_region),
    };

    let mgmt = cloud.settings.management_region.as_str();
    provision::ensure_application(cloud.oos, mgmt, &req.name)
        .await
        .with_context(|| format!("ensure application {}", req.name))?;

    let group = GroupDeploy {
        application: &req.name,
        group: &req.application_group_name,
        deploy_region: region,
        management_region: mgmt,
        port: req.port,
        instance_ids: &req.instance_ids,
        start: &start,
        stop: &stop,
        runtime,
        location: &location,
    };
    let call = provision::prepare_group_deploy(cloud.oos, cloud.ecs, &group)
        .await
        .with_context(|| format!("prepare application group {}", req.application_group_name))?;
    let response = cloud
        .oos
        .deploy_application_group(
            mgmt,
            &req.name,
            &req.application_group_name,
            &call.deploy_parameters,
            call.revision_id.as_deref(),
        )
        .await
        .context("deploy application group")?;
    info!("deploy of {}/{} submitted", req.name, req.application_group_name);

    state::save_json(
        &layout.application_json(),
        &state::ApplicationFile {
            last_deployment: Some(state::LastDeployment {
                application_name: req.name.clone(),
                application_group_name: req.application_group_name.clone(),
                deploy_region_id: region.to_string(),
                port: req.port,
                instance_ids: req.instance_ids.clone(),
                deploy_time: state::now_timestamp(),
            }),
        },
    )?;

    let service = service_link(&req.name, &req.application_group_name);
    let sg = match req.instance_ids.first() {
        Some(id) => instance_security_group_link(id, region),
        None => security_group_console_link(region),
    };
    Ok(DeployOutcome::Deployed(Box::new(Deployed {
        response,
        security_group_instructions: security_group_instructions(&service, &sg, req.port),
        service_link: service,
        security_group_link: sg,
        port: req.port,
        deploy_region_id: region.to_string(),
        oss_bucket_link: oss_bucket_link(&bucket),
        bucket_name: bucket,
        start_command: start,
        stop_command: stop,
    })))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("get current working directory")?
        .join(path))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastDeploymentReport {
    pub message: String,
    pub info: Value,
}

pub fn last_deployment(layout: &project::ProjectLayout) -> Result<LastDeploymentReport> {
    let file: state::ApplicationFile = state::load_json(&layout.application_json())?;
    Ok(match file.last_deployment {
        Some(last) => LastDeploymentReport {
            message: "Successfully retrieved last deployment information".to_string(),
            info: serde_json::to_value(last).context("serialize last deployment")?,
        },
        None => LastDeploymentReport {
            message: "No information found about the last deployment".to_string(),
            info: json!({}),
        },
    })
}

/// Group status plus, when an execution is recorded, its listing.
pub async fn deploy_status(
    oos: &dyn OosApi,
    region: &str,
    application: &str,
    group: &str,
) -> Result<Value> {
    let doc = oos
        .get_application_group(region, application, group)
        .await
        .with_context(|| format!("get application group {application}/{group}"))?;
    let (status, execution_id) = group_status(&doc);

    let executions = match &execution_id {
        Some(id) => match oos.list_executions(region, id).await {
            Ok(v) => v,
            Err(e) => {
                warn!("listing executions for {group} failed: {e}");
                Value::Null
            }
        },
        None => Value::Null,
    };

    Ok(json!({
        "info": doc,
        "status": status,
        "execution_id": execution_id,
        "deploy_execution_info": executions,
    }))
}
