//! Group management calls

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::common::{Error, Result};
use crate::rpc::Client;

/// A group as reported by the daemon
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub is_blocked: bool,
}

/// Options for updating an existing group
#[derive(Debug, Clone, Default)]
pub struct UpdateGroupOptions {
    pub name: Option<String>,
    pub description: Option<String>,
    pub add_members: Vec<String>,
    pub remove_members: Vec<String>,
    pub avatar: Option<String>,
}

impl UpdateGroupOptions {
    fn into_params(self, group_id: &str) -> Value {
        let mut params = Map::new();
        params.insert("groupId".to_string(), json!(group_id));
        if let Some(name) = self.name {
            params.insert("name".to_string(), json!(name));
        }
        if let Some(description) = self.description {
            params.insert("description".to_string(), json!(description));
        }
        if !self.add_members.is_empty() {
            params.insert("addMembers".to_string(), json!(self.add_members));
        }
        if !self.remove_members.is_empty() {
            params.insert("removeMembers".to_string(), json!(self.remove_members));
        }
        if let Some(avatar) = self.avatar {
            params.insert("avatar".to_string(), json!(avatar));
        }
        Value::Object(params)
    }
}

/// Typed façade for group calls
pub struct GroupManager {
    client: Client,
}

impl GroupManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// List all groups the account is a member of
    pub async fn list(&self) -> Result<Vec<Group>> {
        let result = self.client.call("listGroups", None).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Create a new group and return its id
    pub async fn create(&self, name: &str, members: &[String]) -> Result<String> {
        if name.is_empty() {
            return Err(Error::validation("name", "must not be empty"));
        }

        let params = json!({ "name": name, "members": members });
        let result = self.client.call("updateGroup", Some(params)).await?;
        result["groupId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Protocol("updateGroup result missing groupId".to_string()))
    }

    /// Update group metadata or membership
    pub async fn update(&self, group_id: &str, options: UpdateGroupOptions) -> Result<()> {
        self.client
            .call("updateGroup", Some(options.into_params(group_id)))
            .await?;
        Ok(())
    }

    /// Leave a group
    pub async fn quit(&self, group_id: &str) -> Result<()> {
        self.client
            .call("quitGroup", Some(json!({ "groupId": group_id })))
            .await?;
        Ok(())
    }

    /// Join a group via invite link
    pub async fn join(&self, invite_link: &str) -> Result<()> {
        self.client
            .call("joinGroup", Some(json!({ "uri": invite_link })))
            .await?;
        Ok(())
    }
}
