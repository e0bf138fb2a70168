//! Search: code, wiki, and work item queries against the almsearch routes.

use azdo_core::{Error, Result};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::client::{AzureClient, API_VERSION};
use crate::repos::GetFileOptions;

/// Default page size for search requests.
const DEFAULT_TOP: u32 = 25;

/// File contents are fetched for at most this many code results.
const CONTENT_FETCH_LIMIT: usize = 10;

/// Common search parameters for wiki and work item search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Number of results to skip
    pub skip: Option<u32>,
    /// Maximum number of results (default 25)
    pub top: Option<u32>,
    /// Extra facet filters, facet name to list of values
    pub filters: Map<String, Value>,
    /// Ask the service for facet counts
    pub include_facets: bool,
}

/// Parameters for code search.
#[derive(Debug, Clone, Default)]
pub struct SearchCodeOptions {
    /// Restrict to one repository
    pub repository: Option<String>,
    /// Restrict to a path prefix
    pub path: Option<String>,
    /// Restrict to a branch
    pub branch: Option<String>,
    /// Attach file contents to the first few results
    pub include_content: bool,
    /// Number of results to skip
    pub skip: Option<u32>,
    /// Maximum number of results (default 25)
    pub top: Option<u32>,
}

impl AzureClient {
    /// Search code across the project's repositories.
    pub async fn search_code(
        &self,
        project: Option<&str>,
        search_text: &str,
        options: &SearchCodeOptions,
    ) -> Result<Value> {
        if search_text.is_empty() {
            return Err(Error::Validation("Search text is required".to_string()));
        }
        let project = self.resolve_search_project(project);

        let mut extra = Map::new();
        if let Some(repository) = &options.repository {
            extra.insert("Repository".to_string(), json!([repository]));
        }
        if let Some(path) = &options.path {
            extra.insert("Path".to_string(), json!([path]));
        }
        if let Some(branch) = &options.branch {
            extra.insert("Branch".to_string(), json!([branch]));
        }

        let body = json!({
            "searchText": search_text,
            "$skip": options.skip.unwrap_or(0),
            "$top": options.top.unwrap_or(DEFAULT_TOP),
            "filters": build_filters("Project", project.as_deref(), &extra),
        });
        let url = self.search_url(
            project.as_deref(),
            &format!("_apis/search/codesearchresults?api-version={}", API_VERSION),
        );
        let mut results: Value = self.post(&url, &body).await?;

        if options.include_content {
            self.attach_file_contents(project.as_deref(), &mut results)
                .await;
        }
        Ok(results)
    }

    /// Best-effort content fetch for the leading code results.
    async fn attach_file_contents(&self, project: Option<&str>, results: &mut Value) {
        let Some(items) = results
            .get_mut("results")
            .and_then(Value::as_array_mut)
        else {
            return;
        };

        for item in items.iter_mut().take(CONTENT_FETCH_LIMIT) {
            let Some(path) = item.get("path").and_then(Value::as_str).map(str::to_string)
            else {
                continue;
            };
            let Some(repository) = item
                .get("repository")
                .and_then(|r| r.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                continue;
            };
            let item_project = item
                .get("project")
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| project.map(str::to_string));
            let branch = item
                .get("versions")
                .and_then(Value::as_array)
                .and_then(|v| v.first())
                .and_then(|v| v.get("branchName"))
                .and_then(Value::as_str)
                .map(str::to_string);

            let options = GetFileOptions {
                version: branch,
                ..Default::default()
            };
            match self
                .get_file_content(item_project.as_deref(), &repository, &path, &options)
                .await
            {
                Ok(file) => {
                    if let (Some(obj), Some(content)) =
                        (item.as_object_mut(), file.get("content"))
                    {
                        obj.insert("content".to_string(), content.clone());
                    }
                }
                Err(err) => {
                    warn!(path = path.as_str(), error = %err, "Failed to fetch search result content")
                }
            }
        }
    }

    /// Search wiki pages.
    pub async fn search_wiki(
        &self,
        project: Option<&str>,
        search_text: &str,
        options: &SearchOptions,
    ) -> Result<Value> {
        self.almsearch(
            project,
            search_text,
            options,
            "wikisearchresults",
            "Project",
        )
        .await
    }

    /// Search work items.
    pub async fn search_work_items(
        &self,
        project: Option<&str>,
        search_text: &str,
        options: &SearchOptions,
    ) -> Result<Value> {
        self.almsearch(
            project,
            search_text,
            options,
            "workitemsearchresults",
            "System.TeamProject",
        )
        .await
    }

    async fn almsearch(
        &self,
        project: Option<&str>,
        search_text: &str,
        options: &SearchOptions,
        route: &str,
        project_key: &str,
    ) -> Result<Value> {
        if search_text.is_empty() {
            return Err(Error::Validation("Search text is required".to_string()));
        }
        let project = self.resolve_search_project(project);

        let mut body = json!({
            "searchText": search_text,
            "$skip": options.skip.unwrap_or(0),
            "$top": options.top.unwrap_or(DEFAULT_TOP),
            "filters": build_filters(project_key, project.as_deref(), &options.filters),
        });
        if options.include_facets {
            body["includeFacets"] = json!(true);
        }

        let url = self.search_url(
            project.as_deref(),
            &format!("_apis/search/{}?api-version={}", route, API_VERSION),
        );
        self.post(&url, &body).await
    }

    /// Search runs org-wide when no project is given or configured.
    fn resolve_search_project(&self, project: Option<&str>) -> Option<String> {
        project
            .or_else(|| self.default_project())
            .map(str::to_string)
    }
}

/// Merge the project facet with caller-supplied facet filters.
fn build_filters(project_key: &str, project: Option<&str>, extra: &Map<String, Value>) -> Value {
    let mut filters = Map::new();
    if let Some(project) = project {
        filters.insert(project_key.to_string(), json!([project]));
    }
    for (key, value) in extra {
        match filters.get_mut(key) {
            Some(Value::Array(existing)) => {
                if let Some(values) = value.as_array() {
                    existing.extend(values.iter().cloned());
                }
            }
            _ => {
                filters.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(filters)
}
