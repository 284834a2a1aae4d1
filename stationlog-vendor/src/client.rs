use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::VendorError;
use crate::quota::QuotaMap;
use crate::sign::{Credentials, SignedHeaders};

pub const DEVICE_LIST_PATH: &str = "/iot-open/sign/device/list";
pub const DEVICE_QUOTA_PATH: &str = "/iot-open/sign/device/quota/all";

/// A device as listed by the vendor for the configured account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorDevice {
    pub sn: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub online: Option<i64>,
}

/// Operations the ingestion path needs from the vendor cloud.
///
/// No implementation retries; retry policy belongs to the caller.
#[async_trait]
pub trait VendorApi: Send + Sync + 'static {
    async fn device_list(&self) -> Result<Vec<VendorDevice>, VendorError>;
    async fn device_quota(&self, serial: &str) -> Result<QuotaMap, VendorError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: serde_json::Value,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn code(&self) -> String {
        match &self.code {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Signed HTTP client for the power-station cloud API.
#[derive(Clone)]
pub struct VendorClient {
    base_url: String,
    credentials: Credentials,
    http: Client,
}

impl VendorClient {
    pub fn new(
        base_url: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self, VendorError> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(VendorError::Config("base_url is empty".into()));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| VendorError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            credentials: Credentials::new(access_key, secret_key),
            http,
        })
    }

    /// Lists every device bound to the account.
    pub async fn get_device_list(&self) -> Result<Vec<VendorDevice>, VendorError> {
        let data: Option<Vec<VendorDevice>> = self.signed_get(DEVICE_LIST_PATH, &[], &[]).await?;
        Ok(data.unwrap_or_default())
    }

    /// Fetches the full quota snapshot of one device.
    ///
    /// The serial travels in the query string but is left out of the
    /// signature; the vendor rejects the request otherwise.
    pub async fn get_device_quota(&self, serial: &str) -> Result<QuotaMap, VendorError> {
        let data: Option<QuotaMap> = self
            .signed_get(DEVICE_QUOTA_PATH, &[("sn", serial)], &[])
            .await?;
        Ok(data.unwrap_or_default())
    }

    async fn signed_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        signed_params: &[(&str, &str)],
    ) -> Result<Option<T>, VendorError> {
        let nonce = rand::rng().random_range(100_000..1_000_000u32).to_string();
        let timestamp = jiff::Timestamp::now().as_millisecond().to_string();
        let headers = self.credentials.sign_request(signed_params, &nonce, &timestamp);

        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "vendor request");

        let response = self
            .http
            .get(&url)
            .query(query)
            .headers(header_map(&headers)?)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        decode_envelope(status, &body)
    }
}

fn header_map(headers: &SignedHeaders) -> Result<reqwest::header::HeaderMap, VendorError> {
    let mut map = reqwest::header::HeaderMap::new();
    for (name, value) in [
        ("accesskey", &headers.access_key),
        ("nonce", &headers.nonce),
        ("timestamp", &headers.timestamp),
        ("sign", &headers.sign),
    ] {
        let value = value
            .parse()
            .map_err(|_| VendorError::Config(format!("invalid header value for {name}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn decode_envelope<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
) -> Result<Option<T>, VendorError> {
    let envelope: Envelope<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(VendorError::Api {
                code: status.as_u16().to_string(),
                message: body.chars().take(200).collect(),
                status: status.as_u16(),
            });
        }
        Err(e) => return Err(VendorError::Decode(e.to_string())),
    };

    let code = envelope.code();
    if code != "0" {
        let message = envelope.message.unwrap_or_default();
        warn!(%code, %message, http_status = status.as_u16(), "vendor rejected request");
        return Err(VendorError::Api {
            code,
            message,
            status: status.as_u16(),
        });
    }

    Ok(envelope.data)
}

#[async_trait]
impl VendorApi for VendorClient {
    async fn device_list(&self) -> Result<Vec<VendorDevice>, VendorError> {
        self.get_device_list().await
    }

    async fn device_quota(&self, serial: &str) -> Result<QuotaMap, VendorError> {
        self.get_device_quota(serial).await
    }
}
