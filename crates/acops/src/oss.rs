use crate::config::{Credentials, Settings};
use crate::error::{CloudError, CloudResult};
use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tag marking the bucket that holds an application's release artifacts.
pub const DEPLOY_BUCKET_TAG: &str = "acops-code-deploy";
pub const DEPLOY_BUCKET_PREFIX: &str = "code-deploy-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Location", default)]
    pub location: String,
    #[serde(rename = "CreationDate", default)]
    pub creation_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Size", default)]
    pub size: u64,
    #[serde(rename = "LastModified", default)]
    pub last_modified: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PutObjectResult {
    pub status_code: u16,
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

#[async_trait]
pub trait OssApi: Send + Sync {
    /// All buckets, or only those carrying `tag` when given.
    async fn list_buckets(&self, tag: Option<(&str, &str)>) -> CloudResult<Vec<BucketInfo>>;

    async fn put_bucket(&self, bucket: &str) -> CloudResult<()>;

    async fn put_bucket_tags(&self, bucket: &str, tags: &[(String, String)]) -> CloudResult<()>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> CloudResult<PutObjectResult>;

    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> CloudResult<Vec<ObjectInfo>>;
}

/// Finds the bucket tagged for `app`, creating and tagging a fresh one when
/// none exists. A failed lookup counts as "none found".
pub async fn ensure_deploy_bucket(api: &dyn OssApi, app: &str) -> CloudResult<String> {
    match api.list_buckets(Some((DEPLOY_BUCKET_TAG, app))).await {
        Ok(buckets) => {
            if let Some(b) = buckets.into_iter().next() {
                info!("using deploy bucket {} for {app}", b.name);
                return Ok(b.name);
            }
        }
        Err(e) => warn!("bucket lookup by tag failed, creating a new bucket: {e}"),
    }

    let name = new_bucket_name();
    api.put_bucket(&name).await?;
    api.put_bucket_tags(&name, &[(DEPLOY_BUCKET_TAG.to_string(), app.to_string())])
        .await?;
    info!("created deploy bucket {name} for {app}");
    Ok(name)
}

pub fn new_bucket_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{DEPLOY_BUCKET_PREFIX}{}", &id[..12])
}

#[derive(Debug, Clone)]
pub struct OssClient {
    http: reqwest::Client,
    region: String,
    endpoint_suffix: String,
    credentials: CloudResult<Credentials>,
}

impl OssClient {
    pub fn new(settings: &Settings, region: &str) -> CloudResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            region: region.to_string(),
            endpoint_suffix: settings.endpoint_suffix.clone(),
            credentials: Credentials::from_env(),
        })
    }

    fn host(&self, bucket: Option<&str>) -> String {
        match bucket {
            Some(b) => format!("{b}.oss-{}.{}", self.region, self.endpoint_suffix),
            None => format!("oss-{}.{}", self.region, self.endpoint_suffix),
        }
    }

    async fn send(&self, req: OssRequest<'_>) -> CloudResult<reqwest::Response> {
        let creds = self.credentials.as_ref().map_err(Clone::clone)?;
        let date = http_date();
        let resource = req.canonical_resource();
        let mut oss_headers = Vec::new();
        if let Some(t) = &creds.security_token {
            oss_headers.push(("x-oss-security-token".to_string(), t.clone()));
        }
        let auth = authorization(creds, req.method.as_str(), "", req.content_type, &date, &oss_headers, &resource);

        let path: Vec<String> = req.key.split('/').map(crate::openapi::percent_encode).collect();
        let url = format!("https://{}/{}{}", self.host(req.bucket), path.join("/"), req.query_string());
        debug!("{} {url}", req.method);
        let mut builder = self
            .http
            .request(req.method.clone(), &url)
            .header("Date", &date)
            .header("Authorization", auth);
        if !req.content_type.is_empty() {
            builder = builder.header("Content-Type", req.content_type);
        }
        for (k, v) in &oss_headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        let resp = builder.body(req.body).send().await?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        let err = xml_error(status, &text);
        error!("{} {url} failed: {err}", req.method);
        Err(err)
    }
}

struct OssRequest<'a> {
    method: reqwest::Method,
    bucket: Option<&'a str>,
    key: &'a str,
    /// Signed sub-resource such as `tagging`.
    sub_resource: Option<&'a str>,
    query: Vec<(&'a str, String)>,
    content_type: &'a str,
    body: Vec<u8>,
}

impl<'a> OssRequest<'a> {
    fn new(method: reqwest::Method, bucket: Option<&'a str>) -> Self {
        Self {
            method,
            bucket,
            key: "",
            sub_resource: None,
            query: Vec::new(),
            content_type: "",
            body: Vec::new(),
        }
    }

    fn canonical_resource(&self) -> String {
        let mut r = match self.bucket {
            Some(b) => format!("/{b}/{}", self.key),
            None => "/".to_string(),
        };
        if let Some(s) = self.sub_resource {
            r.push('?');
            r.push_str(s);
        }
        r
    }

    fn query_string(&self) -> String {
        let mut parts: Vec<String> = self.sub_resource.iter().map(|s| s.to_string()).collect();
        parts.extend(self.query.iter().map(|(k, v)| {
            format!("{}={}", crate::openapi::percent_encode(k), crate::openapi::percent_encode(v))
        }));
        if parts.is_empty() {
            String::new()
        } else {
            format!("?{}", parts.join("&"))
        }
    }
}

#[async_trait]
impl OssApi for OssClient {
    async fn list_buckets(&self, tag: Option<(&str, &str)>) -> CloudResult<Vec<BucketInfo>> {
        let mut req = OssRequest::new(reqwest::Method::GET, None);
        if let Some((k, v)) = tag {
            req.query.push(("tag-key", k.to_string()));
            req.query.push(("tag-value", v.to_string()));
        }
        let body = self.send(req).await?.text().await?;
        let doc: ListAllMyBucketsResult = from_xml(&body)?;
        Ok(doc.buckets.map(|b| b.bucket).unwrap_or_default())
    }

    async fn put_bucket(&self, bucket: &str) -> CloudResult<()> {
        self.send(OssRequest::new(reqwest::Method::PUT, Some(bucket))).await?;
        Ok(())
    }

    async fn put_bucket_tags(&self, bucket: &str, tags: &[(String, String)]) -> CloudResult<()> {
        let doc = Tagging {
            tag_set: TagSet {
                tag: tags
                    .iter()
                    .map(|(k, v)| Tag {
                        key: k.clone(),
                        value: v.clone(),
                    })
                    .collect(),
            },
        };
        let xml = quick_xml::se::to_string(&doc).map_err(|e| CloudError::Decode(e.to_string()))?;
        let mut req = OssRequest::new(reqwest::Method::PUT, Some(bucket));
        req.sub_resource = Some("tagging");
        req.content_type = "application/xml";
        req.body = xml.into_bytes();
        self.send(req).await?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> CloudResult<PutObjectResult> {
        let mut req = OssRequest::new(reqwest::Method::PUT, Some(bucket));
        req.key = key;
        req.content_type = content_type;
        req.body = body;
        let resp = self.send(req).await?;
        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim_matches('"').to_string())
        };
        Ok(PutObjectResult {
            status_code: resp.status().as_u16(),
            etag: header("etag"),
            version_id: header("x-oss-version-id"),
        })
    }

    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> CloudResult<Vec<ObjectInfo>> {
        let mut req = OssRequest::new(reqwest::Method::GET, Some(bucket));
        req.query.push(("list-type", "2".to_string()));
        if let Some(p) = prefix {
            req.query.push(("prefix", p.to_string()));
        }
        let body = self.send(req).await?.text().await?;
        let doc: ListBucketResult = from_xml(&body)?;
        Ok(doc.contents)
    }
}

/// Reads a local file for upload.
pub async fn read_upload(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("read upload {}", path.display()))
}

pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref() {
        Some("json") => "application/json",
        Some("html") | Some("htm") => "text/html",
        Some("txt") => "text/plain",
        Some("xml") => "application/xml",
        Some("zip") => "application/zip",
        Some("gz") | Some("tgz") => "application/gzip",
        Some("tar") => "application/x-tar",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Deserialize)]
struct ListAllMyBucketsResult {
    #[serde(rename = "Buckets", default)]
    buckets: Option<Buckets>,
}

#[derive(Debug, Deserialize)]
struct Buckets {
    #[serde(rename = "Bucket", default)]
    bucket: Vec<BucketInfo>,
}

#[derive(Debug, Deserialize)]
struct ListBucketResult {
    #[serde(rename = "Contents", default)]
    contents: Vec<ObjectInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename = "Tagging")]
struct Tagging {
    #[serde(rename = "TagSet")]
    tag_set: TagSet,
}

#[derive(Debug, Serialize)]
struct TagSet {
    #[serde(rename = "Tag")]
    tag: Vec<Tag>,
}

#[derive(Debug, Serialize)]
struct Tag {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct XmlError {
    #[serde(rename = "Code", default)]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
    #[serde(rename = "RequestId", default)]
    request_id: String,
}

fn from_xml<T: for<'de> Deserialize<'de>>(body: &str) -> CloudResult<T> {
    quick_xml::de::from_str(body).map_err(|e| CloudError::Decode(e.to_string()))
}

fn xml_error(status: u16, body: &str) -> CloudError {
    let doc: XmlError = quick_xml::de::from_str(body).unwrap_or_default();
    CloudError::Api {
        status,
        code: if doc.code.is_empty() {
            "UnknownError".to_string()
        } else {
            doc.code
        },
        message: if doc.message.is_empty() {
            body.to_string()
        } else {
            doc.message
        },
        request_id: doc.request_id,
    }
}

fn http_date() -> String {
    let fmt = time::macros::format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    time::OffsetDateTime::now_utc().format(&fmt).unwrap_or_default()
}

fn authorization(
    creds: &Credentials,
    verb: &str,
    content_md5: &str,
    content_type: &str,
    date: &str,
    oss_headers: &[(String, String)],
    resource: &str,
) -> String {
    let mut headers: Vec<(String, String)> = oss_headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .collect();
    headers.sort();
    let canonical_headers: String = headers.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();
    let string_to_sign =
        format!("{verb}\n{content_md5}\n{content_type}\n{date}\n{canonical_headers}{resource}");

    let signature = match Hmac::<Sha1>::new_from_slice(creds.access_key_secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(string_to_sign.as_bytes());
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    };
    format!("OSS {}:{signature}", creds.access_key_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeOss;

    fn creds(token: Option<&str>) -> Credentials {
        Credentials {
            access_key_id: "AKID".to_string(),
            access_key_secret: "secret".to_string(),
            security_token: token.map(str::to_string),
        }
    }

    #[test]
    fn v1_signature_matches_known_vector() {
        let auth = authorization(
            &creds(None),
            "PUT",
            "",
            "application/octet-stream",
            "Fri, 02 Jan 2026 03:04:05 GMT",
            &[],
            "/code-deploy-abc/releases/app.tar.gz",
        );
        assert_eq!(auth, "OSS AKID:1A4583kmztxBC9Rhpml8N7Igb8M=");

        let auth = authorization(
            &creds(Some("sts")),
            "GET",
            "",
            "",
            "Fri, 02 Jan 2026 03:04:05 GMT",
            &[("X-OSS-Security-Token".to_string(), "sts".to_string())],
            "/b/?tagging",
        );
        assert_eq!(auth, "OSS AKID:IDKb/FimN2TGrEhWWINw+X9XMCI=");
    }

    #[test]
    fn canonical_resource_and_query() {
        let mut req = OssRequest::new(reqwest::Method::PUT, Some("b"));
        req.sub_resource = Some("tagging");
        assert_eq!(req.canonical_resource(), "/b/?tagging");
        assert_eq!(req.query_string(), "?tagging");

        let mut req = OssRequest::new(reqwest::Method::GET, None);
        req.query.push(("tag-key", "acops-code-deploy".to_string()));
        req.query.push(("tag-value", "my app".to_string()));
        assert_eq!(req.canonical_resource(), "/");
        assert_eq!(req.query_string(), "?tag-key=acops-code-deploy&tag-value=my%20app");
    }

    #[test]
    fn parses_bucket_listing() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListAllMyBucketsResult>
  <Owner><ID>1</ID><DisplayName>1</DisplayName></Owner>
  <Buckets>
    <Bucket><Name>code-deploy-0123456789ab</Name><Location>oss-cn-hangzhou</Location><CreationDate>2026-01-01T00:00:00.000Z</CreationDate></Bucket>
    <Bucket><Name>other</Name><Location>oss-cn-beijing</Location></Bucket>
  </Buckets>
</ListAllMyBucketsResult>"#;
        let doc: ListAllMyBucketsResult = from_xml(xml).unwrap();
        let names: Vec<String> = doc.buckets.unwrap().bucket.into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["code-deploy-0123456789ab", "other"]);

        let empty: ListAllMyBucketsResult =
            from_xml("<ListAllMyBucketsResult><Owner><ID>1</ID></Owner></ListAllMyBucketsResult>").unwrap();
        assert!(empty.buckets.is_none());
    }

    #[test]
    fn error_document_maps_to_api_error() {
        let err = xml_error(
            403,
            "<Error><Code>AccessDenied</Code><Message>denied</Message><RequestId>R</RequestId></Error>",
        );
        assert_eq!(err.code(), Some("AccessDenied"));
        assert_eq!(xml_error(500, "boom").code(), Some("UnknownError"));
    }

    #[test]
    fn tagging_document_shape() {
        let doc = Tagging {
            tag_set: TagSet {
                tag: vec![Tag {
                    key: "k".to_string(),
                    value: "v".to_string(),
                }],
            },
        };
        let xml = quick_xml::se::to_string(&doc).unwrap();
        assert_eq!(xml, "<Tagging><TagSet><Tag><Key>k</Key><Value>v</Value></Tag></TagSet></Tagging>");
    }

    #[test]
    fn bucket_names_are_prefixed_hex() {
        let name = new_bucket_name();
        assert!(name.starts_with(DEPLOY_BUCKET_PREFIX));
        let suffix = &name[DEPLOY_BUCKET_PREFIX.len()..];
        assert_eq!(suffix.len(), 12);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn deploy_bucket_is_created_once_then_reused() {
        let oss = FakeOss::default();
        let first = ensure_deploy_bucket(&oss, "shop").await.unwrap();
        let second = ensure_deploy_bucket(&oss, "shop").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(*oss.put_bucket_calls.lock().unwrap(), 1);

        let other = ensure_deploy_bucket(&oss, "blog").await.unwrap();
        assert_ne!(other, first);
    }

    #[tokio::test]
    async fn bucket_creation_failure_propagates() {
        let oss = FakeOss {
            fail_put_bucket: true,
            ..Default::default()
        };
        assert!(ensure_deploy_bucket(&oss, "shop").await.is_err());
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for(Path::new("a/b.JSON")), "application/json");
        assert_eq!(content_type_for(Path::new("app.tar.gz")), "application/gzip");
        assert_eq!(content_type_for(Path::new("server")), "application/octet-stream");
    }

    #[tokio::test]
    async fn unreadable_upload_is_a_local_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_upload(&dir.path().join("gone.tar.gz")).await.unwrap_err();
        assert!(format!("{err:#}").contains("read upload"));
        assert!(err.downcast_ref::<std::io::Error>().is_some());
        assert!(err.downcast_ref::<CloudError>().is_none());
    }
}
