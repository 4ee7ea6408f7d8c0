use crate::error::{CloudError, CloudResult};
use crate::openapi::{params, push_list, RpcClient, ECS};
use crate::retry::with_retry;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

/// Largest id list a single `DescribeInstances` call accepts.
pub const DESCRIBE_BATCH: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub status: String,
    pub tags: BTreeMap<String, String>,
}

impl Instance {
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.get(key).map(String::as_str) == Some(value)
    }
}

#[async_trait]
pub trait EcsApi: Send + Sync {
    /// Describes exactly the given instances; ids that do not exist are simply absent.
    async fn describe_instances(&self, region: &str, ids: &[String]) -> CloudResult<Vec<Instance>>;

    /// One tag write covering every id.
    async fn tag_resources(
        &self,
        region: &str,
        ids: &[String],
        key: &str,
        value: &str,
    ) -> CloudResult<()>;
}

pub async fn describe_instances_with_retry(
    api: &dyn EcsApi,
    region: &str,
    ids: &[String],
) -> CloudResult<Vec<Instance>> {
    let mut found = Vec::with_capacity(ids.len());
    for batch in ids.chunks(DESCRIBE_BATCH) {
        found.extend(with_retry("DescribeInstances", || api.describe_instances(region, batch)).await?);
    }
    Ok(found)
}

/// Ids from `ids` that the provider does not know about, in input order.
pub async fn missing_instances(
    api: &dyn EcsApi,
    region: &str,
    ids: &[String],
) -> CloudResult<Vec<String>> {
    let found = describe_instances_with_retry(api, region, ids).await?;
    let missing: Vec<String> = ids
        .iter()
        .filter(|id| !found.iter().any(|i| &i.id == *id))
        .cloned()
        .collect();
    if missing.is_empty() {
        info!("all {} instances exist in {region}", ids.len());
    } else {
        info!("instances missing in {region}: {missing:?}");
    }
    Ok(missing)
}

/// Raw `DescribeInstances` document for the given ids.
pub async fn describe_instances_raw(
    rpc: &RpcClient,
    region: &str,
    ids: &[String],
) -> CloudResult<Value> {
    let p = describe_params(region, ids)?;
    with_retry("DescribeInstances", || rpc.call(ECS, region, "DescribeInstances", &p)).await
}

fn describe_params(region: &str, ids: &[String]) -> CloudResult<crate::openapi::Params> {
    if ids.len() > DESCRIBE_BATCH {
        return Err(CloudError::InvalidRequest(format!(
            "at most {DESCRIBE_BATCH} instance ids per describe, got {}",
            ids.len()
        )));
    }
    let ids_json = serde_json::to_string(ids).map_err(|e| CloudError::Decode(e.to_string()))?;
    Ok(params([
        ("RegionId", region),
        ("InstanceIds", ids_json.as_str()),
        ("PageSize", "100"),
    ]))
}

pub fn parse_instances(doc: &Value) -> Vec<Instance> {
    let list = doc
        .pointer("/Instances/Instance")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    list.iter()
        .map(|inst| {
            let s = |k: &str| inst.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
            let tags = inst
                .pointer("/Tags/Tag")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(|t| {
                            Some((
                                t.get("TagKey")?.as_str()?.to_string(),
                                t.get("TagValue").and_then(Value::as_str).unwrap_or_default().to_string(),
                            ))
                        })
                        .collect()
                })
                .unwrap_or_default();
            Instance {
                id: s("InstanceId"),
                name: s("InstanceName"),
                status: s("Status"),
                tags,
            }
        })
        .collect()
}

#[async_trait]
impl EcsApi for RpcClient {
    async fn describe_instances(&self, region: &str, ids: &[String]) -> CloudResult<Vec<Instance>> {
        let p = describe_params(region, ids)?;
        let doc = self.call(ECS, region, "DescribeInstances", &p).await?;
        Ok(parse_instances(&doc))
    }

    async fn tag_resources(
        &self,
        region: &str,
        ids: &[String],
        key: &str,
        value: &str,
    ) -> CloudResult<()> {
        let mut p = params([
            ("RegionId", region),
            ("ResourceType", "instance"),
            ("Tag.1.Key", key),
            ("Tag.1.Value", value),
        ]);
        push_list(&mut p, "ResourceId", ids);
        self.call(ECS, region, "TagResources", &p).await?;
        Ok(())
    }
}
