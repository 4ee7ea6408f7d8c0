//! Compiled-in table of generic RPC operations that can be called by name.

use crate::error::CloudResult;
use crate::openapi::{Params, RpcClient, Service, ECS, OOS, RDS, VPC};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

pub const REGION_PARAM: &str = "RegionId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Boolean,
    /// Sent JSON-encoded.
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiSpec {
    pub service: Service,
    pub action: &'static str,
    pub summary: &'static str,
    pub params: &'static [ParamSpec],
}

impl ApiSpec {
    /// Tool-style name, e.g. `ECS_DescribeRegions`.
    pub fn tool_name(&self) -> String {
        format!("{}_{}", self.service.endpoint_prefix.to_uppercase(), self.action)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiSummary {
    pub service: &'static str,
    pub action: &'static str,
    pub version: &'static str,
    pub summary: &'static str,
    pub params: &'static [ParamSpec],
}

impl From<&ApiSpec> for ApiSummary {
    fn from(s: &ApiSpec) -> Self {
        Self {
            service: s.service.endpoint_prefix,
            action: s.action,
            version: s.service.version,
            summary: s.summary,
            params: s.params,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("missing required parameter {0}")]
    Missing(String),

    #[error("parameter {name} must be {expected:?}")]
    WrongType { name: String, expected: ParamKind },

    #[error("unknown parameter {0}")]
    Unknown(String),
}

const fn p(name: &'static str, kind: ParamKind, required: bool, description: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required,
        description,
    }
}

use ParamKind::{Array, Boolean, Integer, String as Str};

const PAGING: [ParamSpec; 2] = [
    p("PageNumber", Integer, false, "Page to return, starting at 1"),
    p("PageSize", Integer, false, "Entries per page"),
];

static APIS: &[ApiSpec] = &[
    ApiSpec {
        service: ECS,
        action: "DescribeRegions",
        summary: "List the regions available to the account",
        params: &[p("AcceptLanguage", Str, false, "Language of region names")],
    },
    ApiSpec {
        service: ECS,
        action: "DescribeZones",
        summary: "List zones of a region",
        params: &[p("InstanceChargeType", Str, false, "PrePaid or PostPaid")],
    },
    ApiSpec {
        service: ECS,
        action: "DescribeInstances",
        summary: "Describe ECS instances",
        params: &[
            p("InstanceIds", Array, false, "Instance ids"),
            p("Status", Str, false, "Running, Stopped, ..."),
            p("VpcId", Str, false, "Restrict to a VPC"),
            PAGING[0],
            PAGING[1],
        ],
    },
    ApiSpec {
        service: ECS,
        action: "DescribeInstanceStatus",
        summary: "Status of ECS instances in a region",
        params: &[
            p("InstanceIds", Array, false, "Instance ids"),
            PAGING[0],
            PAGING[1],
        ],
    },
    ApiSpec {
        service: ECS,
        action: "StartInstances",
        summary: "Start stopped ECS instances",
        params: &[
            p("InstanceId", Array, true, "Instance ids"),
            p("DryRun", Boolean, false, "Only check the request"),
        ],
    },
    ApiSpec {
        service: ECS,
        action: "StopInstances",
        summary: "Stop running ECS instances",
        params: &[
            p("InstanceId", Array, true, "Instance ids"),
            p("ForceStop", Boolean, false, "Stop without a graceful shutdown"),
            p("DryRun", Boolean, false, "Only check the request"),
        ],
    },
    ApiSpec {
        service: ECS,
        action: "RebootInstances",
        summary: "Reboot ECS instances",
        params: &[
            p("InstanceId", Array, true, "Instance ids"),
            p("ForceReboot", Boolean, false, "Reboot without a graceful shutdown"),
            p("DryRun", Boolean, false, "Only check the request"),
        ],
    },
    ApiSpec {
        service: ECS,
        action: "RunCommand",
        summary: "Run a shell command on ECS instances through the cloud assistant",
        params: &[
            p("Type", Str, true, "RunShellScript, RunBatScript or RunPowerShellScript"),
            p("CommandContent", Str, true, "Command text"),
            p("InstanceId", Array, true, "Instance ids"),
            p("Timeout", Integer, false, "Timeout in seconds"),
            p("WorkingDir", Str, false, "Directory the command runs in"),
        ],
    },
    ApiSpec {
        service: ECS,
        action: "DescribeInvocations",
        summary: "Results of cloud assistant invocations",
        params: &[
            p("InvokeId", Str, false, "Invocation id"),
            p("InstanceId", Str, false, "Instance id"),
            PAGING[0],
            PAGING[1],
        ],
    },
    ApiSpec {
        service: ECS,
        action: "DescribeSecurityGroups",
        summary: "List security groups",
        params: &[
            p("VpcId", Str, false, "Restrict to a VPC"),
            p("SecurityGroupIds", Str, false, "JSON array of group ids"),
            PAGING[0],
            PAGING[1],
        ],
    },
    ApiSpec {
        service: VPC,
        action: "DescribeVpcs",
        summary: "List VPCs",
        params: &[
            p("VpcId", Str, false, "Comma separated VPC ids"),
            p("VpcName", Str, false, "VPC name"),
            PAGING[0],
            PAGING[1],
        ],
    },
    ApiSpec {
        service: VPC,
        action: "DescribeVSwitches",
        summary: "List vSwitches",
        params: &[
            p("VpcId", Str, false, "Restrict to a VPC"),
            p("ZoneId", Str, false, "Restrict to a zone"),
            PAGING[0],
            PAGING[1],
        ],
    },
    ApiSpec {
        service: RDS,
        action: "DescribeDBInstances",
        summary: "List RDS instances",
        params: &[
            p("Engine", Str, false, "MySQL, SQLServer, PostgreSQL or MariaDB"),
            p("DBInstanceId", Str, false, "Comma separated instance ids"),
            PAGING[0],
            PAGING[1],
        ],
    },
    ApiSpec {
        service: RDS,
        action: "DescribeDBInstanceAttribute",
        summary: "Details of one RDS instance",
        params: &[p("DBInstanceId", Str, true, "Instance id")],
    },
    ApiSpec {
        service: OOS,
        action: "ListExecutions",
        summary: "List orchestration executions",
        params: &[
            p("ExecutionId", Str, false, "Execution id"),
            p("TemplateName", Str, false, "Template name"),
            p("Status", Str, false, "Running, Success, Failed, ..."),
            p("MaxResults", Integer, false, "Entries per page"),
            p("NextToken", Str, false, "Paging token"),
        ],
    },
    ApiSpec {
        service: OOS,
        action: "ListApplications",
        summary: "List applications",
        params: &[
            p("Name", Str, false, "Application name"),
            p("MaxResults", Integer, false, "Entries per page"),
            p("NextToken", Str, false, "Paging token"),
        ],
    },
];

pub fn list() -> &'static [ApiSpec] {
    APIS
}

/// Case-insensitive on the service, exact on the action.
pub fn find(service: &str, action: &str) -> Option<&'static ApiSpec> {
    APIS.iter()
        .find(|s| s.service.endpoint_prefix.eq_ignore_ascii_case(service) && s.action == action)
}

/// Checks `args` against the operation and renders the wire parameters.
/// `RegionId` is accepted for every operation. Null values count as absent.
pub fn validate(spec: &ApiSpec, args: &Map<String, Value>) -> Result<Params, ParamError> {
    let mut out = Params::new();
    for (name, value) in args {
        if value.is_null() {
            continue;
        }
        if name == REGION_PARAM {
            let region = value.as_str().ok_or_else(|| ParamError::WrongType {
                name: name.clone(),
                expected: ParamKind::String,
            })?;
            out.insert(name.clone(), region.to_string());
            continue;
        }
        let param = spec
            .params
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ParamError::Unknown(name.clone()))?;
        out.insert(name.clone(), render(param, value)?);
    }

    if let Some(missing) = spec.params.iter().find(|p| p.required && !out.contains_key(p.name)) {
        return Err(ParamError::Missing(missing.name.to_string()));
    }
    Ok(out)
}

fn render(param: &ParamSpec, value: &Value) -> Result<String, ParamError> {
    let wrong = || ParamError::WrongType {
        name: param.name.to_string(),
        expected: param.kind,
    };
    match (param.kind, value) {
        (ParamKind::String, Value::String(s)) => Ok(s.clone()),
        (ParamKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        (ParamKind::Boolean, Value::Bool(b)) => Ok(b.to_string()),
        (ParamKind::Array, Value::Array(_)) => Ok(value.to_string()),
        _ => Err(wrong()),
    }
}

/// Validates and sends the call. The region comes from `RegionId` when
/// given, else `default_region`.
pub async fn call(
    rpc: &RpcClient,
    spec: &ApiSpec,
    params: Params,
    default_region: &str,
) -> CloudResult<Value> {
    let mut params = params;
    let region = params
        .entry(REGION_PARAM.to_string())
        .or_insert_with(|| default_region.to_string())
        .clone();
    info!("calling {} in {region}", spec.tool_name());
    rpc.call(spec.service, &region, spec.action, &params).await
}
