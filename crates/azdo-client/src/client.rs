//! Azure DevOps REST client core.
//!
//! Request plumbing shared by every feature area: PAT authentication,
//! URL building for the core/search/profile hosts, typed JSON verbs,
//! and error mapping from non-success responses.

use azdo_core::orgurl::{resolve_base_urls, BaseUrls};
use azdo_core::{Config, Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default api-version for core REST routes.
pub(crate) const API_VERSION: &str = "7.1";

/// api-version for the profile and accounts routes.
pub(crate) const API_VERSION_ACCOUNTS: &str = "6.0";

/// api-version for reading wiki pages.
pub(crate) const API_VERSION_WIKI_READ: &str = "7.0";

/// api-version for preview routes (wiki page writes, policy evaluations).
pub(crate) const API_VERSION_PREVIEW: &str = "7.1-preview.1";

/// api-version for the build file container routes.
pub(crate) const API_VERSION_CONTAINERS: &str = "7.1-preview.4";

/// Azure DevOps REST client.
///
/// One instance per organization. Feature methods live in the sibling
/// modules (`projects`, `repos`, `pull_requests`, ...) as `impl` blocks
/// on this type.
pub struct AzureClient {
    urls: BaseUrls,
    pat: String,
    default_project: Option<String>,
    client: reqwest::Client,
}

impl AzureClient {
    /// Create a client from resolved configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let org_url = config
            .azure
            .org_url
            .as_deref()
            .ok_or_else(|| Error::Config("Organization URL is required".to_string()))?;
        let pat = config
            .azure
            .pat
            .clone()
            .ok_or_else(|| Error::Config("A personal access token is required".to_string()))?;

        let urls = resolve_base_urls(org_url, None, config.default_project())?;
        let default_project = config
            .default_project()
            .map(|p| p.to_string())
            .or_else(|| urls.project_from_url.clone());

        Ok(Self {
            urls,
            pat,
            default_project,
            client: reqwest::Client::new(),
        })
    }

    /// Create a client for an organization URL and PAT.
    pub fn new(org_url: &str, pat: impl Into<String>) -> Result<Self> {
        let urls = resolve_base_urls(org_url, None, None)?;
        Ok(Self {
            urls,
            pat: pat.into(),
            default_project: None,
            client: reqwest::Client::new(),
        })
    }

    /// Set the project used when a call omits one.
    pub fn with_default_project(mut self, project: Option<String>) -> Self {
        self.default_project = project;
        self
    }

    /// Resolved base URLs for this organization.
    pub fn base_urls(&self) -> &BaseUrls {
        &self.urls
    }

    /// Project used when a call omits one.
    pub fn default_project(&self) -> Option<&str> {
        self.default_project.as_deref()
    }

    /// Resolve the project for a call, falling back to the default.
    pub(crate) fn project_or_default(&self, project: Option<&str>) -> Result<String> {
        match project {
            Some(p) if !p.is_empty() => Ok(p.to_string()),
            _ => self.default_project.clone().ok_or_else(|| {
                Error::Validation(
                    "No project specified and no default project is configured".to_string(),
                )
            }),
        }
    }

    // =========================================================================
    // URL builders
    // =========================================================================

    /// URL for an organization-level route, e.g. `_apis/projects?...`.
    pub(crate) fn org_url(&self, route: &str) -> String {
        format!("{}/{}", self.urls.core, route)
    }

    /// URL for a project-level route, e.g. `{project}/_apis/git/repositories?...`.
    pub(crate) fn project_url(&self, project: &str, route: &str) -> String {
        format!(
            "{}/{}/{}",
            self.urls.core,
            urlencoding::encode(project),
            route
        )
    }

    /// URL for a search route; search lives on a dedicated host on Services.
    pub(crate) fn search_url(&self, project: Option<&str>, route: &str) -> String {
        match project {
            Some(p) => format!(
                "{}/{}/{}",
                self.urls.search,
                urlencoding::encode(p),
                route
            ),
            None => format!("{}/{}", self.urls.search, route),
        }
    }

    /// URL for an org-scoped profile route; Services only.
    pub(crate) fn profile_url(&self, route: &str) -> Result<String> {
        let base = self.urls.profile.as_deref().ok_or_else(|| {
            Error::Validation(
                "Profile APIs are only available on Azure DevOps Services".to_string(),
            )
        })?;
        Ok(format!("{}/{}", base, route))
    }

    /// URL for a cross-organization account route; Services only.
    pub(crate) fn vssps_url(&self, route: &str) -> Result<String> {
        let base = self.urls.vssps.as_deref().ok_or_else(|| {
            Error::Validation(
                "Account APIs are only available on Azure DevOps Services".to_string(),
            )
        })?;
        Ok(format!("{}/{}", base, route))
    }

    // =========================================================================
    // Request plumbing
    // =========================================================================

    /// Build a request with PAT authentication (Basic, empty username).
    pub(crate) fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth("", Some(&self.pat))
    }

    /// Send a prepared request and fail on non-success statuses.
    pub(crate) async fn send_request(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        self.check_status(response).await
    }

    /// Make an authenticated GET request with typed deserialization.
    pub(crate) async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = url, "Azure DevOps GET request");

        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        self.handle_response(response).await
    }

    /// GET returning the status-checked response for header access.
    pub(crate) async fn get_response(&self, url: &str) -> Result<reqwest::Response> {
        debug!(url = url, "Azure DevOps GET request");

        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        self.check_status(response).await
    }

    /// GET a plain-text body (file and wiki content routes).
    pub(crate) async fn get_text(&self, url: &str) -> Result<String> {
        debug!(url = url, "Azure DevOps GET request (text)");

        let response = self
            .request(reqwest::Method::GET, url)
            .header(reqwest::header::ACCEPT, "text/plain")
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let response = self.check_status(response).await?;
        response.text().await.map_err(|e| Error::Http(e.to_string()))
    }

    /// Make an authenticated POST request.
    pub(crate) async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        debug!(url = url, "Azure DevOps POST request");

        let response = self
            .request(reqwest::Method::POST, url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        self.handle_response(response).await
    }

    /// Make an authenticated PUT request.
    pub(crate) async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        debug!(url = url, "Azure DevOps PUT request");

        let response = self
            .request(reqwest::Method::PUT, url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        self.handle_response(response).await
    }

    /// Make an authenticated PATCH request.
    pub(crate) async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        debug!(url = url, "Azure DevOps PATCH request");

        let response = self
            .request(reqwest::Method::PATCH, url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        self.handle_response(response).await
    }

    /// PATCH with a JSON-Patch document (work item routes).
    pub(crate) async fn patch_document<T: DeserializeOwned>(
        &self,
        url: &str,
        ops: &[PatchOp],
    ) -> Result<T> {
        debug!(url = url, "Azure DevOps PATCH request (json-patch)");

        // json() keeps a content type that is already set
        let response = self
            .request(reqwest::Method::PATCH, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json-patch+json")
            .json(ops)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        self.handle_response(response).await
    }

    /// POST with a JSON-Patch document (work item creation).
    pub(crate) async fn post_document<T: DeserializeOwned>(
        &self,
        url: &str,
        ops: &[PatchOp],
    ) -> Result<T> {
        debug!(url = url, "Azure DevOps POST request (json-patch)");

        let response = self
            .request(reqwest::Method::POST, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json-patch+json")
            .json(ops)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        self.handle_response(response).await
    }

    /// Make an authenticated DELETE request, ignoring the response body.
    pub(crate) async fn delete(&self, url: &str) -> Result<()> {
        debug!(url = url, "Azure DevOps DELETE request");

        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        self.check_status(response).await?;
        Ok(())
    }

    /// Fail on non-success statuses, mapping them onto the error taxonomy.
    pub(crate) async fn check_status(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let message = response.text().await.unwrap_or_default();
            warn!(
                status = status_code,
                message = message,
                "Azure DevOps API error response"
            );
            return Err(Error::from_status(status_code, message));
        }
        Ok(response)
    }

    /// Check the status and deserialize the JSON body.
    pub(crate) async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let response = self.check_status(response).await?;
        let text = response.text().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(serde_json::from_str(&text)?)
    }

    #[cfg(test)]
    pub(crate) fn with_profile_base(mut self, url: &str) -> Self {
        self.urls.profile = Some(url.trim_end_matches('/').to_string());
        self
    }

    #[cfg(test)]
    pub(crate) fn with_vssps_base(mut self, url: &str) -> Self {
        self.urls.vssps = Some(url.trim_end_matches('/').to_string());
        self
    }
}

// =============================================================================
// Shared wire types
// =============================================================================

/// Azure DevOps list payloads arrive as `{ "count": n, "value": [...] }`.
#[derive(Debug, Deserialize)]
pub(crate) struct ListEnvelope<T> {
    #[allow(dead_code)]
    pub count: Option<i64>,
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

/// One operation of a JSON-Patch document.
#[derive(Debug, Clone, Serialize)]
pub struct PatchOp {
    pub op: &'static str,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl PatchOp {
    pub fn add(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            op: "add",
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: "remove",
            path: path.into(),
            value: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use azdo_core::config::AzureConfig;
    use httpmock::prelude::*;

    fn test_client(server: &MockServer) -> AzureClient {
        // A path segment makes the mock host parse as a Server collection
        AzureClient::new(&format!("{}/acme", server.base_url()), "test-pat")
            .unwrap()
            .with_default_project(Some("widgets".to_string()))
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = Config::default();
        assert!(AzureClient::from_config(&config).is_err());
    }

    #[test]
    fn test_from_config_resolves_default_project() {
        let config = Config {
            azure: AzureConfig {
                org_url: Some("https://dev.azure.com/acme".to_string()),
                pat: Some("token".to_string()),
                auth_method: None,
                default_project: Some("widgets".to_string()),
            },
            ..Default::default()
        };

        let client = AzureClient::from_config(&config).unwrap();
        assert_eq!(client.default_project(), Some("widgets"));
        assert_eq!(client.base_urls().core, "https://dev.azure.com/acme");
    }

    #[test]
    fn test_project_or_default() {
        let client = AzureClient::new("https://dev.azure.com/acme", "token")
            .unwrap()
            .with_default_project(Some("widgets".to_string()));

        assert_eq!(client.project_or_default(None).unwrap(), "widgets");
        assert_eq!(client.project_or_default(Some("")).unwrap(), "widgets");
        assert_eq!(client.project_or_default(Some("other")).unwrap(), "other");

        let bare = AzureClient::new("https://dev.azure.com/acme", "token").unwrap();
        assert!(matches!(
            bare.project_or_default(None),
            Err(azdo_core::Error::Validation(_))
        ));
    }

    #[test]
    fn test_url_builders() {
        let client = AzureClient::new("https://dev.azure.com/acme", "token").unwrap();

        assert_eq!(
            client.org_url("_apis/projects?api-version=7.1"),
            "https://dev.azure.com/acme/_apis/projects?api-version=7.1"
        );
        assert_eq!(
            client.project_url("my project", "_apis/git/repositories"),
            "https://dev.azure.com/acme/my%20project/_apis/git/repositories"
        );
        assert_eq!(
            client.search_url(Some("widgets"), "_apis/search/codesearchresults"),
            "https://almsearch.dev.azure.com/acme/widgets/_apis/search/codesearchresults"
        );
        assert_eq!(
            client.profile_url("_apis/profile/profiles/me").unwrap(),
            "https://vssps.dev.azure.com/acme/_apis/profile/profiles/me"
        );
    }

    #[test]
    fn test_profile_url_unavailable_on_server() {
        let client = AzureClient::new("https://tfs.example.com/tfs/Coll", "token").unwrap();
        assert!(matches!(
            client.profile_url("_apis/profile/profiles/me"),
            Err(azdo_core::Error::Validation(_))
        ));
        assert!(client.vssps_url("_apis/accounts").is_err());
    }

    #[tokio::test]
    async fn test_pat_sent_as_basic_auth() {
        let server = MockServer::start();

        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/acme/_apis/projects")
                // ":test-pat" base64-encoded
                .header("authorization", "Basic OnRlc3QtcGF0");
            then.status(200)
                .json_body(serde_json::json!({"count": 0, "value": []}));
        });

        let client = test_client(&server);
        let url = client.org_url("_apis/projects");
        let envelope: ListEnvelope<serde_json::Value> = client.get(&url).await.unwrap();

        mock.assert();
        assert!(envelope.value.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET).path("/acme/_apis/projects/missing");
            then.status(404).body("Project does not exist");
        });

        let client = test_client(&server);
        let url = client.org_url("_apis/projects/missing");
        let err = client.get::<serde_json::Value>(&url).await.unwrap_err();

        assert!(matches!(err, azdo_core::Error::NotFound(_)));
        assert!(err.to_string().contains("Project does not exist"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_serialization_error() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET).path("/acme/_apis/projects");
            then.status(200).body("not json");
        });

        let client = test_client(&server);
        let url = client.org_url("_apis/projects");
        let err = client
            .get::<ListEnvelope<serde_json::Value>>(&url)
            .await
            .unwrap_err();

        assert!(matches!(err, azdo_core::Error::Serialization(_)));
    }

    #[tokio::test]
    async fn test_patch_document_content_type() {
        let server = MockServer::start();

        let mock = server.mock(|when, then| {
            when.method(PATCH)
                .path("/acme/_apis/wit/workitems/42")
                .header("content-type", "application/json-patch+json")
                .body_includes("\"op\":\"add\"")
                .body_includes("\"path\":\"/fields/System.Title\"");
            then.status(200).json_body(serde_json::json!({"id": 42}));
        });

        let client = test_client(&server);
        let url = client.org_url("_apis/wit/workitems/42");
        let ops = vec![PatchOp::add(
            "/fields/System.Title",
            serde_json::json!("New title"),
        )];
        let updated: serde_json::Value = client.patch_document(&url, &ops).await.unwrap();

        mock.assert();
        assert_eq!(updated["id"], 42);
    }

    #[test]
    fn test_patch_op_serialization() {
        let add = PatchOp::add("/fields/System.Title", serde_json::json!("hi"));
        let json = serde_json::to_string(&add).unwrap();
        assert_eq!(
            json,
            "{\"op\":\"add\",\"path\":\"/fields/System.Title\",\"value\":\"hi\"}"
        );

        let remove = PatchOp::remove("/relations/3");
        let json = serde_json::to_string(&remove).unwrap();
        assert_eq!(json, "{\"op\":\"remove\",\"path\":\"/relations/3\"}");
    }
}
