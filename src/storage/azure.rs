//! Azure blob storage, addressed with a storage account connection string.

use std::collections::HashMap;
use std::sync::Arc;

use eyre::{eyre, Result, WrapErr};
use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use tracing::*;

use crate::util::config::StorageSection;

use super::ObjectStoreStorage;

pub const CONNECTION_STRING_ENV: &str = "PP_AZURE_CONN_STR";

const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// The parts of an Azure storage connection string that matter for blob
/// access, e.g. `DefaultEndpointsProtocol=https;AccountName=...;AccountKey=...`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub sas_token: Option<String>,
    pub blob_endpoint: Option<String>,
    pub protocol: Option<String>,
    pub endpoint_suffix: Option<String>,
    pub use_emulator: bool,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parsed = Self::default();
        for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // Account keys and SAS tokens may themselves contain `=`.
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| eyre!("malformed connection string segment {pair:?}"))?;
            let value = value.to_string();
            match key {
                "AccountName" => parsed.account_name = Some(value),
                "AccountKey" => parsed.account_key = Some(value),
                "SharedAccessSignature" => parsed.sas_token = Some(value),
                "BlobEndpoint" => parsed.blob_endpoint = Some(value),
                "DefaultEndpointsProtocol" => parsed.protocol = Some(value),
                "EndpointSuffix" => parsed.endpoint_suffix = Some(value),
                "UseDevelopmentStorage" => parsed.use_emulator = value.eq_ignore_ascii_case("true"),
                other => debug!("ignoring connection string key {other}"),
            }
        }

        if !parsed.use_emulator && parsed.account_name.is_none() && parsed.blob_endpoint.is_none() {
            return Err(eyre!(
                "connection string has neither AccountName nor BlobEndpoint"
            ));
        }

        Ok(parsed)
    }

    /// The blob service endpoint, when it differs from the public Azure
    /// cloud default that `object_store` derives from the account name.
    pub fn endpoint(&self) -> Option<String> {
        if let Some(endpoint) = &self.blob_endpoint {
            return Some(endpoint.trim_end_matches('/').to_string());
        }

        let suffix = self.endpoint_suffix.as_deref()?;
        if suffix == DEFAULT_ENDPOINT_SUFFIX {
            return None;
        }
        let account = self.account_name.as_deref()?;
        let protocol = self.protocol.as_deref().unwrap_or("https");
        Some(format!("{protocol}://{account}.blob.{suffix}"))
    }
}

/// Build an Azure-backed storage from the `[azure]` section and the
/// `PP_AZURE_CONN_STR` environment variable.
pub fn from_config(
    section: &StorageSection,
    env: &HashMap<String, String>,
) -> Result<ObjectStoreStorage> {
    let container = section.require("container")?;
    let prefix = section.get("prefix");
    let raw = env
        .get(CONNECTION_STRING_ENV)
        .ok_or_else(|| eyre!("{CONNECTION_STRING_ENV} must be set to use azure storage"))?;
    let conn = ConnectionString::parse(raw)?;

    let mut builder = MicrosoftAzureBuilder::new().with_container_name(container);
    if conn.use_emulator {
        builder = builder.with_use_emulator(true);
    }
    if let Some(account) = &conn.account_name {
        builder = builder.with_account(account);
    }
    if let Some(key) = &conn.account_key {
        builder = builder.with_access_key(key);
    }
    if let Some(sas) = &conn.sas_token {
        builder = builder.with_config(AzureConfigKey::SasKey, sas.trim_start_matches('?'));
    }
    if let Some(endpoint) = conn.endpoint() {
        builder = builder
            .with_allow_http(endpoint.starts_with("http://"))
            .with_config(AzureConfigKey::Endpoint, endpoint);
    }

    let store = builder
        .build()
        .wrap_err("failed to configure azure blob storage")?;

    Ok(ObjectStoreStorage::new(
        Arc::new(store),
        prefix,
        format!("azure container {container}"),
    ))
}
