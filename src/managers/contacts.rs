//! Contact management calls

use serde::Deserialize;
use serde_json::json;

use crate::common::Result;
use crate::rpc::Client;

/// A contact as reported by the daemon
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub number: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub profile_name: Option<String>,
    #[serde(default)]
    pub is_blocked: bool,
}

/// Typed façade for contact calls
pub struct ContactManager {
    client: Client,
}

impl ContactManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// List known contacts
    pub async fn list(&self) -> Result<Vec<Contact>> {
        let result = self.client.call("listContacts", None).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Set the local name for a contact
    pub async fn update_name(&self, number: &str, name: &str) -> Result<()> {
        let params = json!({ "recipient": number, "name": name });
        self.client.call("updateContact", Some(params)).await?;
        Ok(())
    }

    /// Block messages from a contact
    pub async fn block(&self, number: &str) -> Result<()> {
        self.client
            .call("block", Some(json!({ "recipient": [number] })))
            .await?;
        Ok(())
    }

    /// Unblock a previously blocked contact
    pub async fn unblock(&self, number: &str) -> Result<()> {
        self.client
            .call("unblock", Some(json!({ "recipient": [number] })))
            .await?;
        Ok(())
    }
}
