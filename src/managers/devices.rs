//! Linked device calls

use serde::Deserialize;
use serde_json::json;

use crate::common::{Error, Result};
use crate::rpc::Client;

/// A linked device as reported by the daemon
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created: Option<u64>,
    #[serde(default)]
    pub last_seen: Option<u64>,
}

/// Typed façade for device calls
pub struct DeviceManager {
    client: Client,
}

impl DeviceManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// List devices linked to this account
    pub async fn list(&self) -> Result<Vec<Device>> {
        let result = self.client.call("listDevices", None).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Link a new device from its provisioning URI
    pub async fn link(&self, uri: &str) -> Result<()> {
        if uri.is_empty() {
            return Err(Error::validation("uri", "must not be empty"));
        }
        self.client
            .call("addDevice", Some(json!({ "uri": uri })))
            .await?;
        Ok(())
    }

    /// Unlink a device
    pub async fn remove(&self, device_id: u32) -> Result<()> {
        self.client
            .call("removeDevice", Some(json!({ "deviceId": device_id })))
            .await?;
        Ok(())
    }
}
