// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device management endpoints (list, rename, revoke).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A device registered to the user's account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub client_version: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_current: bool,
    #[serde(default)]
    pub last_active_at: String,
    #[serde(default)]
    pub last_ip: String,
    #[serde(default)]
    pub last_location: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(default)]
    devices: Vec<DeviceInfo>,
}

/// Bearer-authenticated client for `/devices`.
pub struct DeviceClient {
    client: reqwest::Client,
    api_base: String,
    access_token: String,
}

impl DeviceClient {
    pub fn new(api_base: &str, access_token: &str) -> Self {
        Self {
            client: crate::http_client(Duration::from_secs(15)),
            api_base: api_base.trim_end_matches('/').to_owned(),
            access_token: access_token.to_owned(),
        }
    }

    pub async fn list(&self) -> anyhow::Result<Vec<DeviceInfo>> {
        let resp = self
            .client
            .get(format!("{}/devices", self.api_base))
            .bearer_auth(&self.access_token)
            .send()
            .await?
            .error_for_status()?;
        let list: DeviceList = resp.json().await?;
        Ok(list.devices)
    }

    pub async fn rename(&self, device_id: &str, name: &str) -> anyhow::Result<()> {
        self.client
            .put(format!("{}/devices/{device_id}", self.api_base))
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn revoke(&self, device_id: &str) -> anyhow::Result<()> {
        self.client
            .delete(format!("{}/devices/{device_id}", self.api_base))
            .bearer_auth(&self.access_token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
