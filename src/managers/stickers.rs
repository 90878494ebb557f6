//! Sticker pack calls

use serde::Deserialize;
use serde_json::json;

use crate::common::Result;
use crate::rpc::Client;

/// An installed sticker pack
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickerPack {
    pub pack_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub installed: bool,
}

/// Typed façade for sticker calls
pub struct StickerManager {
    client: Client,
}

impl StickerManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// List installed sticker packs
    pub async fn list(&self) -> Result<Vec<StickerPack>> {
        let result = self.client.call("listStickerPacks", None).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Upload a sticker pack from a manifest path
    pub async fn upload(&self, manifest_path: &str) -> Result<String> {
        let result = self
            .client
            .call("uploadStickerPack", Some(json!({ "path": manifest_path })))
            .await?;
        Ok(result["url"].as_str().unwrap_or_default().to_string())
    }
}
