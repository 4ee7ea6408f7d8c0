//! In-memory cloud collaborators that record every call.

use crate::ecs::{EcsApi, Instance};
use crate::error::{CloudError, CloudResult};
use crate::oos::{OosApi, APPLICATION_GROUP_NOT_FOUND, APPLICATION_NOT_FOUND};
use crate::oss::{BucketInfo, ObjectInfo, OssApi, PutObjectResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeEcs {
    instances: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    describe_error: Mutex<Option<String>>,
    tag_writes: Mutex<Vec<Vec<String>>>,
    describes: Mutex<u32>,
}

impl FakeEcs {
    pub fn with_instances(ids: &[&str]) -> Self {
        let fake = Self::default();
        {
            let mut map = fake.instances.lock().unwrap();
            for id in ids {
                map.insert(id.to_string(), BTreeMap::new());
            }
        }
        fake
    }

    pub fn set_tag(&self, id: &str, key: &str, value: &str) {
        self.instances
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn fail_describe(&self, code: &str) {
        *self.describe_error.lock().unwrap() = Some(code.to_string());
    }

    pub fn tag_writes(&self) -> usize {
        self.tag_writes.lock().unwrap().len()
    }

    pub fn describes(&self) -> u32 {
        *self.describes.lock().unwrap()
    }
}

#[async_trait]
impl EcsApi for FakeEcs {
    async fn describe_instances(&self, _region: &str, ids: &[String]) -> CloudResult<Vec<Instance>> {
        *self.describes.lock().unwrap() += 1;
        if let Some(code) = self.describe_error.lock().unwrap().clone() {
            return Err(CloudError::api(400, code, "describe failed"));
        }
        let map = self.instances.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| {
                map.get(id).map(|tags| Instance {
                    id: id.clone(),
                    name: String::new(),
                    status: "Running".to_string(),
                    tags: tags.clone(),
                })
            })
            .collect())
    }

    async fn tag_resources(
        &self,
        _region: &str,
        ids: &[String],
        key: &str,
        value: &str,
    ) -> CloudResult<()> {
        self.tag_writes.lock().unwrap().push(ids.to_vec());
        for id in ids {
            self.set_tag(id, key, value);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeOos {
    calls: Mutex<Vec<String>>,
    applications: Mutex<BTreeSet<String>>,
    groups: Mutex<BTreeSet<(String, String)>>,
    get_application_error: Mutex<Option<String>>,
    list_executions_error: Mutex<bool>,
    revisions: Mutex<Vec<(String, String)>>,
    deploys: Mutex<Vec<(String, String, String, Option<String>)>>,
}

impl FakeOos {
    fn record(&self, action: &str) {
        self.calls.lock().unwrap().push(action.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, action: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == action).count()
    }

    pub fn add_group(&self, application: &str, group: &str) {
        self.applications.lock().unwrap().insert(application.to_string());
        self.groups
            .lock()
            .unwrap()
            .insert((application.to_string(), group.to_string()));
    }

    pub fn fail_get_application(&self, code: &str) {
        *self.get_application_error.lock().unwrap() = Some(code.to_string());
    }

    pub fn fail_list_executions(&self) {
        *self.list_executions_error.lock().unwrap() = true;
    }

    /// `(location, hooks)` of the newest revision.
    pub fn last_revision(&self) -> Option<(String, String)> {
        self.revisions.lock().unwrap().last().cloned()
    }

    /// `(application, group, deploy parameters, revision id)` of the newest deploy.
    pub fn last_deploy(&self) -> Option<(String, String, String, Option<String>)> {
        self.deploys.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl OosApi for FakeOos {
    async fn get_application(&self, _region: &str, name: &str) -> CloudResult<Value> {
        self.record("GetApplication");
        if let Some(code) = self.get_application_error.lock().unwrap().clone() {
            return Err(CloudError::api(403, code, "denied"));
        }
        if self.applications.lock().unwrap().contains(name) {
            Ok(json!({ "Application": { "Name": name } }))
        } else {
            Err(CloudError::api(404, APPLICATION_NOT_FOUND, "no such application"))
        }
    }

    async fn create_application(&self, _region: &str, name: &str) -> CloudResult<Value> {
        self.record("CreateApplication");
        self.applications.lock().unwrap().insert(name.to_string());
        Ok(json!({ "Application": { "Name": name } }))
    }

    async fn get_application_group(
        &self,
        _region: &str,
        application: &str,
        group: &str,
    ) -> CloudResult<Value> {
        self.record("GetApplicationGroup");
        let key = (application.to_string(), group.to_string());
        if self.groups.lock().unwrap().contains(&key) {
            Ok(json!({
                "ApplicationGroup": {
                    "Name": group,
                    "Status": "Deployed",
                    "ExecutionId": "exec-1"
                }
            }))
        } else {
            Err(CloudError::api(404, APPLICATION_GROUP_NOT_FOUND, "no such group"))
        }
    }

    async fn create_application_group(
        &self,
        _region: &str,
        application: &str,
        group: &str,
        _deploy_region: &str,
    ) -> CloudResult<Value> {
        self.record("CreateApplicationGroup");
        self.groups
            .lock()
            .unwrap()
            .insert((application.to_string(), group.to_string()));
        Ok(json!({ "ApplicationGroup": { "Name": group } }))
    }

    async fn create_deploy_revision(
        &self,
        _region: &str,
        _application: &str,
        location: &str,
        hooks: &str,
    ) -> CloudResult<String> {
        self.record("CreateDeployRevision");
        let mut revisions = self.revisions.lock().unwrap();
        revisions.push((location.to_string(), hooks.to_string()));
        Ok(format!("dr-{}", revisions.len()))
    }

    async fn deploy_application_group(
        &self,
        _region: &str,
        application: &str,
        group: &str,
        deploy_parameters: &str,
        revision_id: Option<&str>,
    ) -> CloudResult<Value> {
        self.record("DeployApplicationGroup");
        self.deploys.lock().unwrap().push((
            application.to_string(),
            group.to_string(),
            deploy_parameters.to_string(),
            revision_id.map(str::to_string),
        ));
        Ok(json!({ "RequestId": "req-deploy" }))
    }

    async fn list_executions(&self, _region: &str, execution_id: &str) -> CloudResult<Value> {
        self.record("ListExecutions");
        if *self.list_executions_error.lock().unwrap() {
            return Err(CloudError::Transport("connection reset".to_string()));
        }
        Ok(json!({ "Executions": [{ "ExecutionId": execution_id, "Status": "Success" }] }))
    }
}

/// Object store keeping buckets with their tags and uploaded object sizes.
#[derive(Default)]
pub struct FakeOss {
    pub buckets: Mutex<Vec<(String, Vec<(String, String)>)>>,
    pub objects: Mutex<Vec<(String, String, usize)>>,
    pub fail_put_bucket: bool,
    pub put_bucket_calls: Mutex<u32>,
}

#[async_trait]
impl OssApi for FakeOss {
    async fn list_buckets(&self, tag: Option<(&str, &str)>) -> CloudResult<Vec<BucketInfo>> {
        let buckets = self.buckets.lock().unwrap();
        Ok(buckets
            .iter()
            .filter(|(_, tags)| match tag {
                Some((k, v)) => tags.iter().any(|(tk, tv)| tk == k && tv == v),
                None => true,
            })
            .map(|(name, _)| BucketInfo {
                name: name.clone(),
                location: "oss-cn-hangzhou".to_string(),
                creation_date: String::new(),
            })
            .collect())
    }

    async fn put_bucket(&self, bucket: &str) -> CloudResult<()> {
        *self.put_bucket_calls.lock().unwrap() += 1;
        if self.fail_put_bucket {
            return Err(CloudError::api(403, "UserDisable", "oss not activated"));
        }
        self.buckets.lock().unwrap().push((bucket.to_string(), Vec::new()));
        Ok(())
    }

    async fn put_bucket_tags(&self, bucket: &str, tags: &[(String, String)]) -> CloudResult<()> {
        let mut buckets = self.buckets.lock().unwrap();
        if let Some((_, t)) = buckets.iter_mut().find(|(n, _)| n == bucket) {
            *t = tags.to_vec();
        }
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> CloudResult<PutObjectResult> {
        self.objects
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string(), body.len()));
        Ok(PutObjectResult {
            status_code: 200,
            etag: Some("etag".to_string()),
            version_id: Some("v1".to_string()),
        })
    }

    async fn list_objects(&self, bucket: &str, _prefix: Option<&str>) -> CloudResult<Vec<ObjectInfo>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(b, _, _)| b == bucket)
            .map(|(_, k, size)| ObjectInfo {
                key: k.clone(),
                size: *size as u64,
                last_modified: String::new(),
            })
            .collect())
    }
}

/// Writes a gzipped tar holding one small file per member path.
pub fn write_targz(path: &std::path::Path, members: &[&str]) {
    use flate2::{write::GzEncoder, Compression};

    let file = std::fs::File::create(path).unwrap();
    let enc = GzEncoder::new(file, Compression::default());
    let mut tar = tar::Builder::new(enc);
    for m in members {
        let data = b"x";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        tar.append_data(&mut header, m, &data[..]).unwrap();
    }
    tar.into_inner().unwrap().finish().unwrap();
}
