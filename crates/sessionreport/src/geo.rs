//! ip-api style geolocation lookup behind the core provider trait.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

use session_report_core::{GeoMeta, GeoProvider};

pub const DEFAULT_ENDPOINT: &str = "http://ip-api.com/json";

pub struct IpApiClient {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl IpApiClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build ip lookup client")?;
        Ok(Self { endpoint: endpoint.into(), client })
    }
}

impl GeoProvider for IpApiClient {
    fn lookup(&self, ip: &str) -> Result<GeoMeta> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), ip);
        let body: Value = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("lookup failed for {ip}"))?
            .error_for_status()?
            .json()?;
        let field = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
        Ok(GeoMeta {
            country: field("country"),
            country_code: field("countryCode"),
            region: field("region"),
            region_name: field("regionName"),
        })
    }
}
