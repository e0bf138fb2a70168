//! Wikis: listing, page content, batched page summaries, and page edits.

use azdo_core::enums::WikiType;
use azdo_core::{Error, Result};
use serde_json::{json, Value};

use crate::client::{
    AzureClient, ListEnvelope, API_VERSION, API_VERSION_PREVIEW, API_VERSION_WIKI_READ,
};

/// Page batches are requested in chunks of this size.
const PAGE_BATCH_SIZE: u32 = 100;

/// Options for creating a wiki.
#[derive(Debug, Clone)]
pub struct CreateWikiOptions {
    /// Wiki name
    pub name: String,
    /// Project wiki (default) or a wiki published from a repository
    pub wiki_type: WikiType,
    /// Backing repository, required for code wikis
    pub repository_id: Option<String>,
    /// Folder of the repository that holds the wiki content
    pub mapped_path: Option<String>,
    /// Branch the code wiki is published from
    pub version: Option<String>,
}

impl Default for CreateWikiOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            wiki_type: WikiType::ProjectWiki,
            repository_id: None,
            mapped_path: None,
            version: None,
        }
    }
}

/// Content for a wiki page create or update.
#[derive(Debug, Clone, Default)]
pub struct WikiPageContent {
    /// Markdown page body
    pub content: String,
    /// Commit comment for the page edit
    pub comment: Option<String>,
}

impl AzureClient {
    /// List wikis in a project, or across the organization when no project
    /// is available.
    pub async fn get_wikis(&self, project: Option<&str>) -> Result<Vec<Value>> {
        let route = format!("_apis/wiki/wikis?api-version={}", API_VERSION);
        let url = match project.or_else(|| self.default_project()) {
            Some(project) => self.project_url(project, &route),
            None => self.org_url(&route),
        };
        let envelope: ListEnvelope<Value> = self.get(&url).await?;
        Ok(envelope.value)
    }

    /// Get the markdown content of a wiki page.
    pub async fn get_wiki_page(
        &self,
        project: Option<&str>,
        wiki: &str,
        page_path: &str,
    ) -> Result<String> {
        let project = self.project_or_default(project)?;
        let url = self.project_url(
            &project,
            &format!(
                "_apis/wiki/wikis/{}/pages?path={}&api-version={}",
                urlencoding::encode(wiki),
                encode_page_path(page_path),
                API_VERSION_WIKI_READ
            ),
        );
        self.get_text(&url).await.map_err(|err| match err {
            Error::NotFound(_) => Error::NotFound(format!(
                "Wiki page not found: {} in wiki {}",
                page_path, wiki
            )),
            other => other,
        })
    }

    /// List page summaries via the pages batch route, following
    /// continuation tokens until `top` pages are collected.
    pub async fn list_wiki_pages(
        &self,
        project: Option<&str>,
        wiki: &str,
        top: Option<u32>,
    ) -> Result<Vec<Value>> {
        let project = self.project_or_default(project)?;
        let url = self.project_url(
            &project,
            &format!(
                "_apis/wiki/wikis/{}/pagesbatch?api-version={}",
                urlencoding::encode(wiki),
                API_VERSION
            ),
        );

        let limit = top.map(|t| t as usize);
        let mut pages: Vec<Value> = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut body = json!({ "top": PAGE_BATCH_SIZE });
            if let Some(token) = &continuation {
                body["continuationToken"] = json!(token);
            }
            let response = self
                .send_request(self.request(reqwest::Method::POST, &url).json(&body))
                .await?;
            continuation = response
                .headers()
                .get("x-ms-continuationtoken")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let envelope: ListEnvelope<Value> = response
                .json()
                .await
                .map_err(|e| Error::Http(e.to_string()))?;

            pages.extend(envelope.value.iter().map(page_summary));

            let done = limit.is_some_and(|l| pages.len() >= l);
            if done || continuation.is_none() || envelope.value.is_empty() {
                break;
            }
        }
        if let Some(limit) = limit {
            pages.truncate(limit);
        }
        Ok(pages)
    }

    /// Create a wiki. Code wikis need a repository to publish from.
    pub async fn create_wiki(
        &self,
        project: Option<&str>,
        options: &CreateWikiOptions,
    ) -> Result<Value> {
        if options.name.is_empty() {
            return Err(Error::Validation("Wiki name is required".to_string()));
        }
        let project = self.project_or_default(project)?;

        let mut body = json!({
            "name": options.name,
            "projectId": project,
            "type": options.wiki_type.as_str(),
        });
        if options.wiki_type == WikiType::CodeWiki {
            let repository = options.repository_id.as_deref().ok_or_else(|| {
                Error::Validation("Repository id is required for a code wiki".to_string())
            })?;
            if let Some(obj) = body.as_object_mut() {
                obj.insert("repositoryId".to_string(), json!(repository));
                obj.insert(
                    "mappedPath".to_string(),
                    json!(options.mapped_path.as_deref().unwrap_or("/")),
                );
                obj.insert(
                    "version".to_string(),
                    json!({ "version": options.version.as_deref().unwrap_or("main") }),
                );
            }
        }

        let url = self.project_url(
            &project,
            &format!("_apis/wiki/wikis?api-version={}", API_VERSION),
        );
        self.post(&url, &body).await
    }

    /// Create a wiki page with a plain PUT. Fails if the page exists.
    pub async fn create_wiki_page(
        &self,
        project: Option<&str>,
        wiki: &str,
        page_path: &str,
        page: &WikiPageContent,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;
        let url = self.page_url(&project, wiki, page_path);
        self.put(&url, &page_body(page)).await
    }

    /// Update a wiki page, creating it when missing.
    ///
    /// Edits of an existing page need its current ETag in `If-Match`; the
    /// page is fetched first to obtain it.
    pub async fn update_wiki_page(
        &self,
        project: Option<&str>,
        wiki: &str,
        page_path: &str,
        page: &WikiPageContent,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;
        let url = self.page_url(&project, wiki, page_path);

        let etag = match self.page_etag(&project, wiki, page_path).await? {
            Some(etag) => etag,
            None => return self.put(&url, &page_body(page)).await,
        };

        let response = self
            .send_request(
                self.request(reqwest::Method::PUT, &url)
                    .header(reqwest::header::IF_MATCH, etag)
                    .json(&page_body(page)),
            )
            .await?;
        response.json().await.map_err(|e| Error::Http(e.to_string()))
    }

    /// Current ETag of a page, or `None` when the page does not exist.
    async fn page_etag(&self, project: &str, wiki: &str, page_path: &str) -> Result<Option<String>> {
        let url = self.project_url(
            project,
            &format!(
                "_apis/wiki/wikis/{}/pages?path={}&api-version={}",
                urlencoding::encode(wiki),
                encode_page_path(page_path),
                API_VERSION
            ),
        );
        match self.get_response(&url).await {
            Ok(response) => Ok(response
                .headers()
                .get(reqwest::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn page_url(&self, project: &str, wiki: &str, page_path: &str) -> String {
        self.project_url(
            project,
            &format!(
                "_apis/wiki/wikis/{}/pages?path={}&api-version={}",
                urlencoding::encode(wiki),
                encode_page_path(page_path),
                API_VERSION_PREVIEW
            ),
        )
    }
}

/// Encode a page path, keeping `/` separators readable.
fn encode_page_path(path: &str) -> String {
    urlencoding::encode(path).replace("%2F", "/")
}

fn page_body(page: &WikiPageContent) -> Value {
    let mut body = json!({ "content": page.content });
    if let Some(comment) = &page.comment {
        body["comment"] = json!(comment);
    }
    body
}

fn page_summary(page: &Value) -> Value {
    json!({
        "id": page.get("id").cloned().unwrap_or(Value::Null),
        "path": page.get("path").cloned().unwrap_or(Value::Null),
        "url": page.get("url").cloned().unwrap_or(Value::Null),
        "order": page.get("order").cloned().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_client(server: &MockServer) -> AzureClient {
        AzureClient::new(&format!("{}/acme", server.base_url()), "test-pat")
            .unwrap()
            .with_default_project(Some("widgets".to_string()))
    }

    #[tokio::test]
    async fn test_get_wikis_project_scope() {
        let server = MockServer::start();

        let mock = server.mock(|when, then| {
            when.method(GET).path("/acme/widgets/_apis/wiki/wikis");
            then.status(200).json_body(serde_json::json!({
                "count": 1,
                "value": [{"id": "w1", "name": "widgets.wiki", "type": "projectWiki"}]
            }));
        });

        let client = test_client(&server);
        let wikis = client.get_wikis(None).await.unwrap();

        mock.assert();
        assert_eq!(wikis[0]["name"], "widgets.wiki");
    }

    #[tokio::test]
    async fn test_get_wiki_page_text() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/_apis/wiki/wikis/w1/pages")
                .query_param("path", "/docs/setup")
                .header("accept", "text/plain");
            then.status(200).body("# Setup\nInstall things.");
        });

        let client = test_client(&server);
        let content = client
            .get_wiki_page(None, "w1", "/docs/setup")
            .await
            .unwrap();
        assert!(content.starts_with("# Setup"));
    }

    #[tokio::test]
    async fn test_get_wiki_page_not_found_names_page() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET).path("/acme/widgets/_apis/wiki/wikis/w1/pages");
            then.status(404)
                .json_body(serde_json::json!({"message": "Page does not exist"}));
        });

        let client = test_client(&server);
        let err = client.get_wiki_page(None, "w1", "/missing").await.unwrap_err();
        match err {
            Error::NotFound(message) => {
                assert!(message.contains("/missing"));
                assert!(message.contains("w1"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_wiki_pages_follows_continuation() {
        let server = MockServer::start();

        // First page carries a continuation token, second does not.
        server.mock(|when, then| {
            when.method(POST)
                .path("/acme/widgets/_apis/wiki/wikis/w1/pagesbatch")
                .body_includes("continuationToken");
            then.status(200).json_body(serde_json::json!({
                "count": 1,
                "value": [{"id": 2, "path": "/B", "order": 1}]
            }));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/acme/widgets/_apis/wiki/wikis/w1/pagesbatch");
            then.status(200)
                .header("x-ms-continuationtoken", "next-1")
                .json_body(serde_json::json!({
                    "count": 1,
                    "value": [{"id": 1, "path": "/A", "order": 0}]
                }));
        });

        let client = test_client(&server);
        let pages = client.list_wiki_pages(None, "w1", None).await.unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0]["path"], "/A");
        assert_eq!(pages[1]["path"], "/B");
    }

    #[tokio::test]
    async fn test_list_wiki_pages_top_stops_early() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(POST)
                .path("/acme/widgets/_apis/wiki/wikis/w1/pagesbatch");
            then.status(200)
                .header("x-ms-continuationtoken", "more")
                .json_body(serde_json::json!({
                    "count": 2,
                    "value": [
                        {"id": 1, "path": "/A", "order": 0},
                        {"id": 2, "path": "/B", "order": 1}
                    ]
                }));
        });

        let client = test_client(&server);
        let pages = client.list_wiki_pages(None, "w1", Some(1)).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0]["path"], "/A");
    }

    #[tokio::test]
    async fn test_create_wiki_code_wiki_body() {
        let server = MockServer::start();

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/acme/widgets/_apis/wiki/wikis")
                .body_includes("\"type\":\"codeWiki\"")
                .body_includes("\"repositoryId\":\"repo-1\"")
                .body_includes("\"mappedPath\":\"/docs\"");
            then.status(201).json_body(serde_json::json!({
                "id": "w2",
                "name": "docs-wiki",
                "type": "codeWiki"
            }));
        });

        let client = test_client(&server);
        let wiki = client
            .create_wiki(
                None,
                &CreateWikiOptions {
                    name: "docs-wiki".to_string(),
                    wiki_type: WikiType::CodeWiki,
                    repository_id: Some("repo-1".to_string()),
                    mapped_path: Some("/docs".to_string()),
                    version: None,
                },
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(wiki["id"], "w2");
    }

    #[tokio::test]
    async fn test_create_wiki_code_wiki_requires_repository() {
        let server = MockServer::start();
        let client = test_client(&server);
        let err = client
            .create_wiki(
                None,
                &CreateWikiOptions {
                    name: "docs-wiki".to_string(),
                    wiki_type: WikiType::CodeWiki,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_wiki_page_put_body() {
        let server = MockServer::start();

        let mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/acme/widgets/_apis/wiki/wikis/w1/pages")
                .query_param("path", "/new-page")
                .body_includes("\"comment\":\"initial\"");
            then.status(201).json_body(serde_json::json!({
                "path": "/new-page",
                "content": "# Hello"
            }));
        });

        let client = test_client(&server);
        let page = client
            .create_wiki_page(
                None,
                "w1",
                "/new-page",
                &WikiPageContent {
                    content: "# Hello".to_string(),
                    comment: Some("initial".to_string()),
                },
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(page["path"], "/new-page");
    }

    #[tokio::test]
    async fn test_update_wiki_page_sends_etag() {
        let server = MockServer::start();

        let put_mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/acme/widgets/_apis/wiki/wikis/w1/pages")
                .header("if-match", "\"v7\"");
            then.status(200).json_body(serde_json::json!({
                "path": "/page",
                "content": "updated"
            }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/_apis/wiki/wikis/w1/pages");
            then.status(200)
                .header("etag", "\"v7\"")
                .json_body(serde_json::json!({"path": "/page"}));
        });

        let client = test_client(&server);
        let page = client
            .update_wiki_page(
                None,
                "w1",
                "/page",
                &WikiPageContent {
                    content: "updated".to_string(),
                    comment: None,
                },
            )
            .await
            .unwrap();

        put_mock.assert();
        assert_eq!(page["content"], "updated");
    }

    #[tokio::test]
    async fn test_update_wiki_page_creates_when_missing() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/_apis/wiki/wikis/w1/pages");
            then.status(404)
                .json_body(serde_json::json!({"message": "Page does not exist"}));
        });
        let put_mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/acme/widgets/_apis/wiki/wikis/w1/pages");
            then.status(201).json_body(serde_json::json!({
                "path": "/page",
                "content": "created"
            }));
        });

        let client = test_client(&server);
        let page = client
            .update_wiki_page(
                None,
                "w1",
                "/page",
                &WikiPageContent {
                    content: "created".to_string(),
                    comment: None,
                },
            )
            .await
            .unwrap();

        put_mock.assert();
        assert_eq!(page["content"], "created");
    }

    #[test]
    fn test_encode_page_path_keeps_slashes() {
        assert_eq!(encode_page_path("/docs/setup guide"), "/docs/setup%20guide");
    }
}
