//! Account and profile calls

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::common::Result;
use crate::rpc::Client;

/// An account known to the daemon
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub number: String,
    #[serde(default)]
    pub uuid: Option<String>,
}

/// Profile fields to update; unset fields are left unchanged
#[derive(Debug, Clone, Default)]
pub struct ProfileOptions {
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub about: Option<String>,
    pub avatar: Option<String>,
}

impl ProfileOptions {
    fn into_params(self) -> Value {
        let mut params = Map::new();
        if let Some(given_name) = self.given_name {
            params.insert("givenName".to_string(), json!(given_name));
        }
        if let Some(family_name) = self.family_name {
            params.insert("familyName".to_string(), json!(family_name));
        }
        if let Some(about) = self.about {
            params.insert("about".to_string(), json!(about));
        }
        if let Some(avatar) = self.avatar {
            params.insert("avatar".to_string(), json!(avatar));
        }
        Value::Object(params)
    }
}

/// Typed façade for account calls
pub struct AccountManager {
    client: Client,
}

impl AccountManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// List accounts the daemon serves
    pub async fn list(&self) -> Result<Vec<Account>> {
        let result = self.client.call("listAccounts", None).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Update the profile shown to other users
    pub async fn update_profile(&self, options: ProfileOptions) -> Result<()> {
        self.client
            .call("updateProfile", Some(options.into_params()))
            .await?;
        Ok(())
    }

    /// Set the registration PIN
    pub async fn set_pin(&self, pin: &str) -> Result<()> {
        self.client
            .call("setPin", Some(json!({ "pin": pin })))
            .await?;
        Ok(())
    }

    /// Remove the registration PIN
    pub async fn remove_pin(&self) -> Result<()> {
        self.client.call("removePin", None).await?;
        Ok(())
    }
}
