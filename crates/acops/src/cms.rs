use crate::error::{CloudError, CloudResult};
use crate::openapi::{params, RpcClient, CMS};
use serde_json::{json, Value};

pub const NAMESPACE: &str = "acs_ecs_dashboard";

/// Dashboard metrics exposed as tools: `(tool suffix, metric name, description)`.
pub const METRICS: &[(&str, &str, &str)] = &[
    ("GetCpuUsageData", "cpu_total", "Latest CPU utilisation of ECS instances."),
    ("GetCpuLoadavgData", "load_1m", "Latest 1 minute CPU load average of ECS instances."),
    ("GetCpuloadavg5mData", "load_5m", "Latest 5 minute CPU load average of ECS instances."),
    ("GetCpuloadavg15mData", "load_15m", "Latest 15 minute CPU load average of ECS instances."),
    ("GetMemUsedData", "memory_usedspace", "Latest memory used by ECS instances."),
    ("GetMemUsageData", "memory_usedutilization", "Latest memory utilisation of ECS instances."),
    ("GetDiskUsageData", "diskusage_utilization", "Latest disk utilisation of ECS instances."),
    ("GetDiskTotalData", "diskusage_total", "Total disk capacity of ECS instances."),
    ("GetDiskUsedData", "diskusage_used", "Latest disk space used by ECS instances."),
];

/// Metric name behind a tool suffix such as `GetCpuUsageData`.
pub fn metric_for(tool: &str) -> Option<&'static str> {
    METRICS
        .iter()
        .find(|(suffix, _, _)| *suffix == tool)
        .map(|(_, metric, _)| *metric)
}

pub fn dimensions(instance_ids: &[String]) -> CloudResult<String> {
    let dims: Vec<Value> = instance_ids
        .iter()
        .map(|id| json!({ "instanceId": id }))
        .collect();
    serde_json::to_string(&dims).map_err(|e| CloudError::Decode(e.to_string()))
}

/// Latest datapoints of `metric` for the given instances.
pub async fn describe_metric_last(
    rpc: &RpcClient,
    region: &str,
    instance_ids: &[String],
    metric: &str,
) -> CloudResult<Value> {
    let dims = dimensions(instance_ids)?;
    let p = params([
        ("RegionId", region),
        ("Namespace", NAMESPACE),
        ("MetricName", metric),
        ("Dimensions", dims.as_str()),
    ]);
    let doc = rpc.call(CMS, region, "DescribeMetricLast", &p).await?;
    Ok(datapoints(&doc))
}

/// The provider returns datapoints as an embedded JSON string.
pub fn datapoints(doc: &Value) -> Value {
    match doc.get("Datapoints") {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        Some(v) => v.clone(),
        None => Value::Array(Vec::new()),
    }
}
