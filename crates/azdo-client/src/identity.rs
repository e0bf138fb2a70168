//! Identity: the authenticated user's profile and their organizations.
//!
//! Both routes live on the vssps hosts and only exist on Azure DevOps
//! Services; on Server installs they fail with a validation error.

use azdo_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{AzureClient, ListEnvelope, API_VERSION, API_VERSION_ACCOUNTS};

/// Profile of the authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    pub email: String,
}

/// One organization the authenticated user belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub url: String,
}

impl AzureClient {
    /// Profile of the user the PAT belongs to.
    pub async fn get_me(&self) -> Result<Profile> {
        let url = self.profile_url(&format!(
            "_apis/profile/profiles/me?api-version={}",
            API_VERSION
        ))?;
        let profile: Value = self.get(&url).await?;

        Ok(Profile {
            id: profile
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            display_name: profile
                .get("displayName")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            email: profile
                .get("emailAddress")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Organizations the authenticated user is a member of.
    ///
    /// The accounts route needs the profile's public alias, so this is a
    /// two-step lookup on the cross-organization host.
    pub async fn list_organizations(&self) -> Result<Vec<Organization>> {
        let profile_url = self.vssps_url(&format!(
            "_apis/profile/profiles/me?api-version={}",
            API_VERSION_ACCOUNTS
        ))?;
        let profile: Value = self.get(&profile_url).await?;
        let member_id = profile
            .get("publicAlias")
            .and_then(Value::as_str)
            .or_else(|| profile.get("id").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();

        let accounts_url = self.vssps_url(&format!(
            "_apis/accounts?memberId={}&api-version={}",
            urlencoding::encode(&member_id),
            API_VERSION_ACCOUNTS
        ))?;
        let envelope: ListEnvelope<Value> = self.get(&accounts_url).await?;

        Ok(envelope
            .value
            .iter()
            .map(|account| {
                let name = account
                    .get("accountName")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Organization {
                    id: account
                        .get("accountId")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    url: format!("https://dev.azure.com/{}", name),
                    name,
                }
            })
            .collect())
    }
}
