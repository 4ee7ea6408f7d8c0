use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;

use acops::config::Settings;
use acops::deploy::{self, CloudContext, DeployRequest};
use acops::openapi::RpcClient;
use acops::oss::{self, OssApi, OssClient};
use acops::{catalog, cms, ecs, local, project};
use anyhow::{Context, Result};
use rmcp::schemars::JsonSchema;
use rmcp::{
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    transport::stdio,
    ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

fn internal(err: impl Display) -> McpError {
    McpError::internal_error(err.to_string(), None)
}

fn anyhow_internal(err: anyhow::Error) -> McpError {
    McpError::internal_error(format!("{err:#}"), None)
}

fn invalid(msg: impl Into<String>) -> McpError {
    McpError::invalid_params(msg.into(), None)
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value).map_err(internal)?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn require_ids(ids: &[String]) -> Result<(), McpError> {
    if ids.is_empty() {
        return Err(invalid("instance_ids must contain at least one instance id"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct CodeDeployParams {
    /// Application name. Created when it does not exist yet.
    name: String,
    /// Region of the target ECS instances, e.g. "cn-hangzhou".
    deploy_region_id: String,
    /// Application group name. Created when it does not exist yet.
    application_group_name: String,
    /// Object key for the uploaded artifact. Defaults to the file name.
    object_name: Option<String>,
    /// Absolute path of the artifact (tar.gz, tar, zip or a single file).
    file_path: String,
    /// One of docker, java, python, nodejs, golang, nginx, git.
    deploy_language: String,
    /// Port the application listens on.
    port: u16,
    /// Project root. Discovered from the artifact location when omitted.
    project_path: Option<String>,
    /// Start command. Synthesized from the artifact when omitted.
    application_start: Option<String>,
    /// Stop command. Synthesized from the runtime when omitted.
    application_stop: Option<String>,
    /// ECS instance ids supplied by the user. Never pick instances on their behalf.
    #[serde(default)]
    instance_ids: Vec<String>,
}

impl From<CodeDeployParams> for DeployRequest {
    fn from(p: CodeDeployParams) -> Self {
        DeployRequest {
            name: p.name,
            deploy_region_id: p.deploy_region_id,
            application_group_name: p.application_group_name,
            object_name: p.object_name,
            file_path: PathBuf::from(p.file_path),
            deploy_language: p.deploy_language,
            port: p.port,
            project_path: p.project_path.map(PathBuf::from),
            application_start: p.application_start,
            application_stop: p.application_stop,
            instance_ids: p.instance_ids,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
struct ProjectParams {
    /// Project root holding `.code_deploy/`. Discovered from the working directory when omitted.
    project_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct DeployStatusParams {
    /// Application name.
    name: String,
    /// Application group name.
    application_group_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct InstancesParams {
    /// Region of the instances. Defaults to the configured region.
    region_id: Option<String>,
    /// ECS instance ids.
    #[serde(default)]
    instance_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
struct ListBucketsParams {
    /// OSS region. Defaults to the configured OSS region.
    region_id: Option<String>,
    /// Only buckets carrying this tag key (needs tag_value too).
    tag_key: Option<String>,
    tag_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct ListObjectsParams {
    region_id: Option<String>,
    bucket_name: String,
    /// Key prefix filter.
    prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct PutObjectParams {
    region_id: Option<String>,
    bucket_name: String,
    /// Key of the new object.
    object_key: String,
    /// Local file to upload.
    file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct ListDirectoryParams {
    /// Directory to list.
    path: String,
    /// Descend into subdirectories.
    #[serde(default)]
    recursive: bool,
}

fn default_timeout() -> u64 {
    300
}

fn default_shell() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct RunShellParams {
    /// Script text.
    script: String,
    /// Working directory. Defaults to the server's working directory.
    working_directory: Option<String>,
    /// Seconds before the script is killed.
    #[serde(default = "default_timeout")]
    timeout: u64,
    /// Run through `sh -c`. When false the script is split on whitespace and executed directly.
    #[serde(default = "default_shell")]
    shell: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct AnalyzeParams {
    /// Project directory to analyse.
    directory: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
struct ListOperationsParams {
    /// Only operations of this product, e.g. "ecs".
    service: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct ApiCallParams {
    /// Product code, e.g. "ecs", "vpc", "rds", "oos".
    service: String,
    /// Operation name, e.g. "DescribeRegions".
    action: String,
    /// Operation parameters. Arrays are sent JSON-encoded. RegionId selects the endpoint.
    #[serde(default)]
    parameters: Map<String, Value>,
}

#[derive(Clone)]
struct AcopsMcp {
    settings: Arc<Settings>,
    tool_router: ToolRouter<Self>,
}

#[rmcp::tool_router]
impl AcopsMcp {
    fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            tool_router: Self::tool_router(),
        }
    }

    fn rpc(&self) -> Result<RpcClient, McpError> {
        RpcClient::from_settings(&self.settings).map_err(internal)
    }

    fn oss(&self, region: Option<&str>) -> Result<OssClient, McpError> {
        let region = region.unwrap_or(&self.settings.oss_region);
        OssClient::new(&self.settings, region).map_err(internal)
    }

    fn region<'a>(&'a self, region: &'a Option<String>) -> &'a str {
        region.as_deref().unwrap_or(&self.settings.default_region)
    }

    async fn metric(&self, p: InstancesParams, tool: &str) -> Result<CallToolResult, McpError> {
        let metric = cms::metric_for(tool).ok_or_else(|| internal(format!("no metric for {tool}")))?;
        require_ids(&p.instance_ids)?;
        let rpc = self.rpc()?;
        let points = cms::describe_metric_last(&rpc, self.region(&p.region_id), &p.instance_ids, metric)
            .await
            .map_err(internal)?;
        json_result(&points)
    }

    #[rmcp::tool(
        name = "OOS_CodeDeploy",
        description = "Deploy an application artifact to ECS instances the user supplied. Uploads the artifact to OSS, creates the application and group when missing, synthesizes start/stop commands when omitted and starts the deployment. Call LOCAL_AnalyzeDeployStack first to pick deploy_language, and build the artifact locally. Structured errors (ECS_INSTANCE_REQUIRED, ECS_INSTANCE_NOT_FOUND, START_COMMAND_REQUIRED, OSS_SERVICE_NOT_ACTIVATED) carry instructions to show the user."
    )]
    async fn code_deploy(
        &self,
        params: Parameters<CodeDeployParams>,
    ) -> Result<CallToolResult, McpError> {
        let rpc = self.rpc()?;
        let oss = self.oss(None)?;
        let cloud = CloudContext {
            settings: &self.settings,
            oos: &rpc,
            ecs: &rpc,
            oss: &oss,
        };
        let outcome = deploy::code_deploy(&cloud, params.0.into())
            .await
            .map_err(anyhow_internal)?;
        json_result(&outcome)
    }

    #[rmcp::tool(
        name = "OOS_GetLastDeploymentInfo",
        description = "Read the record of the last deployment made from a project (application, group, region, port, instances, time)."
    )]
    async fn last_deployment_info(
        &self,
        params: Parameters<ProjectParams>,
    ) -> Result<CallToolResult, McpError> {
        let layout = project::load_layout(params.0.project_path.map(PathBuf::from))
            .map_err(anyhow_internal)?;
        json_result(&deploy::last_deployment(&layout).map_err(anyhow_internal)?)
    }

    #[rmcp::tool(
        name = "OOS_GetDeployStatus",
        description = "Deployment status of an application group, including its latest execution when there is one."
    )]
    async fn deploy_status(
        &self,
        params: Parameters<DeployStatusParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let rpc = self.rpc()?;
        let status = deploy::deploy_status(
            &rpc,
            &self.settings.management_region,
            &p.name,
            &p.application_group_name,
        )
        .await
        .map_err(anyhow_internal)?;
        json_result(&status)
    }

    #[rmcp::tool(
        name = "ECS_DescribeInstances",
        description = "Describe the given ECS instances. instance_ids must not be empty."
    )]
    async fn describe_instances(
        &self,
        params: Parameters<InstancesParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        require_ids(&p.instance_ids)?;
        let rpc = self.rpc()?;
        let doc = ecs::describe_instances_raw(&rpc, self.region(&p.region_id), &p.instance_ids)
            .await
            .map_err(internal)?;
        json_result(&doc)
    }

    #[rmcp::tool(name = "CMS_GetCpuUsageData", description = "Latest CPU utilisation of ECS instances.")]
    async fn cpu_usage(&self, params: Parameters<InstancesParams>) -> Result<CallToolResult, McpError> {
        self.metric(params.0, "GetCpuUsageData").await
    }

    #[rmcp::tool(name = "CMS_GetCpuLoadavgData", description = "Latest 1 minute CPU load average of ECS instances.")]
    async fn cpu_load_1m(&self, params: Parameters<InstancesParams>) -> Result<CallToolResult, McpError> {
        self.metric(params.0, "GetCpuLoadavgData").await
    }

    #[rmcp::tool(name = "CMS_GetCpuloadavg5mData", description = "Latest 5 minute CPU load average of ECS instances.")]
    async fn cpu_load_5m(&self, params: Parameters<InstancesParams>) -> Result<CallToolResult, McpError> {
        self.metric(params.0, "GetCpuloadavg5mData").await
    }

    #[rmcp::tool(name = "CMS_GetCpuloadavg15mData", description = "Latest 15 minute CPU load average of ECS instances.")]
    async fn cpu_load_15m(&self, params: Parameters<InstancesParams>) -> Result<CallToolResult, McpError> {
        self.metric(params.0, "GetCpuloadavg15mData").await
    }

    #[rmcp::tool(name = "CMS_GetMemUsedData", description = "Latest memory used by ECS instances.")]
    async fn mem_used(&self, params: Parameters<InstancesParams>) -> Result<CallToolResult, McpError> {
        self.metric(params.0, "GetMemUsedData").await
    }

    #[rmcp::tool(name = "CMS_GetMemUsageData", description = "Latest memory utilisation of ECS instances.")]
    async fn mem_usage(&self, params: Parameters<InstancesParams>) -> Result<CallToolResult, McpError> {
        self.metric(params.0, "GetMemUsageData").await
    }

    #[rmcp::tool(name = "CMS_GetDiskUsageData", description = "Latest disk utilisation of ECS instances.")]
    async fn disk_usage(&self, params: Parameters<InstancesParams>) -> Result<CallToolResult, McpError> {
        self.metric(params.0, "GetDiskUsageData").await
    }

    #[rmcp::tool(name = "CMS_GetDiskTotalData", description = "Total disk capacity of ECS instances.")]
    async fn disk_total(&self, params: Parameters<InstancesParams>) -> Result<CallToolResult, McpError> {
        self.metric(params.0, "GetDiskTotalData").await
    }

    #[rmcp::tool(name = "CMS_GetDiskUsedData", description = "Latest disk space used by ECS instances.")]
    async fn disk_used(&self, params: Parameters<InstancesParams>) -> Result<CallToolResult, McpError> {
        self.metric(params.0, "GetDiskUsedData").await
    }

    #[rmcp::tool(name = "OSS_ListBuckets", description = "List OSS buckets, optionally only those carrying a tag.")]
    async fn list_buckets(
        &self,
        params: Parameters<ListBucketsParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let tag = match (&p.tag_key, &p.tag_value) {
            (Some(k), Some(v)) => Some((k.as_str(), v.as_str())),
            (None, None) => None,
            _ => return Err(invalid("tag_key and tag_value must be given together")),
        };
        let client = self.oss(p.region_id.as_deref())?;
        json_result(&client.list_buckets(tag).await.map_err(internal)?)
    }

    #[rmcp::tool(name = "OSS_ListObjects", description = "List objects of an OSS bucket.")]
    async fn list_objects(
        &self,
        params: Parameters<ListObjectsParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let client = self.oss(p.region_id.as_deref())?;
        let objects = client
            .list_objects(&p.bucket_name, p.prefix.as_deref())
            .await
            .map_err(internal)?;
        json_result(&objects)
    }

    #[rmcp::tool(name = "OSS_PutObject", description = "Upload a local file to an OSS bucket.")]
    async fn put_object(
        &self,
        params: Parameters<PutObjectParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let path = PathBuf::from(&p.file_path);
        let body = oss::read_upload(&path).await.map_err(|e| invalid(format!("{e:#}")))?;
        let client = self.oss(p.region_id.as_deref())?;
        let put = client
            .put_object(&p.bucket_name, &p.object_key, body, oss::content_type_for(&path))
            .await
            .map_err(internal)?;
        json_result(&json!({
            "bucket_name": p.bucket_name,
            "object_key": p.object_key,
            "status_code": put.status_code,
            "etag": put.etag,
            "version_id": put.version_id,
        }))
    }

    #[rmcp::tool(name = "LOCAL_ListDirectory", description = "List files and directories under a local path.")]
    async fn list_directory(
        &self,
        params: Parameters<ListDirectoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let listing = local::list_directory(&PathBuf::from(&p.path), p.recursive)
            .map_err(|e| invalid(format!("{e:#}")))?;
        json_result(&listing)
    }

    #[rmcp::tool(
        name = "LOCAL_RunShellScript",
        description = "Run a shell script on the local machine, e.g. to build the artifact before OOS_CodeDeploy. Returns exit code, stdout and stderr."
    )]
    async fn run_shell_script(
        &self,
        params: Parameters<RunShellParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let dir = p.working_directory.map(PathBuf::from);
        let out = local::run_shell_script(&p.script, dir.as_deref(), p.timeout, p.shell)
            .await
            .map_err(anyhow_internal)?;
        json_result(&out)
    }

    #[rmcp::tool(
        name = "LOCAL_AnalyzeDeployStack",
        description = "Detect package managers, frameworks, deployment methods and runtime versions of a local project from its marker files."
    )]
    async fn analyze_deploy_stack(
        &self,
        params: Parameters<AnalyzeParams>,
    ) -> Result<CallToolResult, McpError> {
        let report = local::analyze_deploy_stack(&PathBuf::from(&params.0.directory))
            .map_err(|e| invalid(format!("{e:#}")))?;
        json_result(&report)
    }

    #[rmcp::tool(
        name = "API_ListOperations",
        description = "List the cloud operations callable through API_Call with their parameters."
    )]
    async fn list_operations(
        &self,
        params: Parameters<ListOperationsParams>,
    ) -> Result<CallToolResult, McpError> {
        let filter = params.0.service;
        let ops: Vec<catalog::ApiSummary> = catalog::list()
            .iter()
            .filter(|s| {
                filter
                    .as_deref()
                    .is_none_or(|f| s.service.endpoint_prefix.eq_ignore_ascii_case(f))
            })
            .map(catalog::ApiSummary::from)
            .collect();
        json_result(&ops)
    }

    #[rmcp::tool(
        name = "API_Call",
        description = "Call one operation listed by API_ListOperations, e.g. service \"ecs\" action \"StopInstances\"."
    )]
    async fn api_call(&self, params: Parameters<ApiCallParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let spec = catalog::find(&p.service, &p.action).ok_or_else(|| {
            invalid(format!("unknown operation {}/{}; see API_ListOperations", p.service, p.action))
        })?;
        let wire = catalog::validate(spec, &p.parameters).map_err(|e| invalid(e.to_string()))?;
        let rpc = self.rpc()?;
        let doc = catalog::call(&rpc, spec, wire, &self.settings.default_region)
            .await
            .map_err(internal)?;
        json_result(&doc)
    }
}

#[rmcp::tool_handler]
impl ServerHandler for AcopsMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                r#"Tools for deploying applications to Alibaba Cloud ECS and operating them.

## Deploying

1. `LOCAL_AnalyzeDeployStack` on the project to learn its stack.
2. Build the artifact locally (`LOCAL_RunShellScript`), preferably a tar.gz.
3. `OOS_CodeDeploy` with the ECS instance ids the user gave you. Never choose instances yourself.
4. `OOS_GetDeployStatus` to follow progress; `OOS_GetLastDeploymentInfo` to recall the last deploy.

When `OOS_CodeDeploy` returns an `error` field, show its `instructions` to the user.

## Operating

- `ECS_DescribeInstances` and the `CMS_*` metric tools for instance health.
- `OSS_*` tools for buckets and objects.
- `API_ListOperations` / `API_Call` for other ECS, VPC, RDS and OOS operations.

Credentials come from ALIBABA_CLOUD_ACCESS_KEY_ID / ALIBABA_CLOUD_ACCESS_KEY_SECRET."#
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    acops::logging::init(None, "warn");
    let settings = Settings::load(None).context("load settings")?;
    info!("starting acops MCP server (management region {})", settings.management_region);

    let service = AcopsMcp::new(settings)
        .serve(stdio())
        .await
        .context("start MCP stdio service")?;

    service.waiting().await.context("MCP service wait")?;
    Ok(())
}
