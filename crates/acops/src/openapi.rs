use crate::config::{Credentials, Settings};
use crate::error::{CloudError, CloudResult};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error};

const SIGNATURE_ALGORITHM: &str = "ACS3-HMAC-SHA256";

/// An RPC-style product endpoint: `<prefix>.<region>.<suffix>` plus API version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Service {
    pub endpoint_prefix: &'static str,
    pub version: &'static str,
}

pub const ECS: Service = Service {
    endpoint_prefix: "ecs",
    version: "2014-05-26",
};
pub const OOS: Service = Service {
    endpoint_prefix: "oos",
    version: "2019-06-01",
};
pub const CMS: Service = Service {
    endpoint_prefix: "metrics",
    version: "2019-01-01",
};
pub const VPC: Service = Service {
    endpoint_prefix: "vpc",
    version: "2016-04-28",
};
pub const RDS: Service = Service {
    endpoint_prefix: "rds",
    version: "2014-08-15",
};

pub type Params = BTreeMap<String, String>;

/// Signed JSON RPC client shared by every product binding.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    endpoint_suffix: String,
    credentials: CloudResult<Credentials>,
}

impl RpcClient {
    /// Credentials are read from the environment now but only required at
    /// the first call, so local-only commands work without them.
    pub fn from_settings(settings: &Settings) -> CloudResult<Self> {
        Self::with_credentials(settings, Credentials::from_env())
    }

    pub fn with_credentials(
        settings: &Settings,
        credentials: CloudResult<Credentials>,
    ) -> CloudResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint_suffix: settings.endpoint_suffix.clone(),
            credentials,
        })
    }

    pub fn credentials(&self) -> CloudResult<&Credentials> {
        self.credentials.as_ref().map_err(Clone::clone)
    }

    pub fn host(&self, service: Service, region: &str) -> String {
        format!("{}.{}.{}", service.endpoint_prefix, region, self.endpoint_suffix)
    }

    pub async fn call(
        &self,
        service: Service,
        region: &str,
        action: &str,
        params: &Params,
    ) -> CloudResult<Value> {
        let creds = self.credentials()?;
        let host = self.host(service, region);
        let date = acs_date();
        let nonce = uuid::Uuid::new_v4().to_string();
        let signed = sign_rpc(creds, &host, action, service.version, params, &date, &nonce);

        debug!("POST {} action={action}", signed.url);
        let mut req = self.http.post(&signed.url);
        for (k, v) in &signed.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let err = api_error(status.as_u16(), &body);
            error!("{action} failed: {err}");
            return Err(err);
        }
        serde_json::from_str(&body).map_err(|e| CloudError::Decode(format!("{action}: {e}")))
    }
}

fn api_error(status: u16, body: &str) -> CloudError {
    let doc: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let field = |k: &str| doc.get(k).and_then(Value::as_str).map(str::to_string);
    CloudError::Api {
        status,
        code: field("Code").unwrap_or_else(|| "UnknownError".to_string()),
        message: field("Message").unwrap_or_else(|| body.to_string()),
        request_id: field("RequestId").unwrap_or_default(),
    }
}

fn acs_date() -> String {
    let fmt = time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    time::OffsetDateTime::now_utc().format(&fmt).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

pub fn sign_rpc(
    creds: &Credentials,
    host: &str,
    action: &str,
    version: &str,
    params: &Params,
    date: &str,
    nonce: &str,
) -> SignedRequest {
    let payload_hash = hex::encode(Sha256::digest(b""));
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    headers.insert("host".into(), host.into());
    headers.insert("x-acs-action".into(), action.into());
    headers.insert("x-acs-version".into(), version.into());
    headers.insert("x-acs-date".into(), date.into());
    headers.insert("x-acs-signature-nonce".into(), nonce.into());
    headers.insert("x-acs-content-sha256".into(), payload_hash.clone());
    if let Some(token) = &creds.security_token {
        headers.insert("x-acs-security-token".into(), token.clone());
    }

    let query = canonical_query(params);
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{k}:{}\n", v.trim()))
        .collect();
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
    let canonical =
        format!("POST\n/\n{query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}");
    let string_to_sign = format!(
        "{SIGNATURE_ALGORITHM}\n{}",
        hex::encode(Sha256::digest(canonical.as_bytes()))
    );
    let signature = hmac_sha256_hex(&creds.access_key_secret, &string_to_sign);

    let authorization = format!(
        "{SIGNATURE_ALGORITHM} Credential={},SignedHeaders={signed_headers},Signature={signature}",
        creds.access_key_id
    );
    let mut out: Vec<(String, String)> = headers.into_iter().filter(|(k, _)| k != "host").collect();
    out.push(("authorization".into(), authorization));

    let url = if query.is_empty() {
        format!("https://{host}/")
    } else {
        format!("https://{host}/?{query}")
    };
    SignedRequest { url, headers: out }
}

fn hmac_sha256_hex(key: &str, data: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match Hmac::<Sha256>::new_from_slice(key.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// RFC 3986 encoding: only unreserved characters pass through.
pub fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

pub fn canonical_query(params: &Params) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Expands a list into `Prefix.1`, `Prefix.2`, ... parameters.
pub fn push_list(params: &mut Params, prefix: &str, values: &[String]) {
    for (i, v) in values.iter().enumerate() {
        params.insert(format!("{prefix}.{}", i + 1), v.clone());
    }
}

pub fn params<const N: usize>(pairs: [(&str, &str); N]) -> Params {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
