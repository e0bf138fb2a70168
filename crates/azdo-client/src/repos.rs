//! Git repositories: listing, file content, trees, branches, and commits.

use azdo_core::enums::GitVersionType;
use azdo_core::text::wildcard_to_regex;
use azdo_core::{Error, Result};
use serde_json::{json, Value};
use tracing::warn;

use crate::client::{AzureClient, ListEnvelope, API_VERSION};

const ZERO_OBJECT_ID: &str = "0000000000000000000000000000000000000000";

/// Version selector for file reads.
#[derive(Debug, Clone, Default)]
pub struct GetFileOptions {
    /// Branch name, tag name, or commit id to read from
    pub version: Option<String>,
    /// What `version` names; defaults to `branch` when a version is given
    pub version_type: Option<GitVersionType>,
}

/// Options for the single-repository tree view.
#[derive(Debug, Clone)]
pub struct RepositoryTreeOptions {
    /// Path within the repository to start from
    pub path: String,
    /// Maximum depth to traverse (0 = unlimited)
    pub depth: usize,
}

impl Default for RepositoryTreeOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            depth: 0,
        }
    }
}

/// Options for assembling detailed repository information.
#[derive(Debug, Clone, Default)]
pub struct RepositoryDetailsOptions {
    /// Attach branch statistics
    pub include_statistics: bool,
    /// Attach repository refs
    pub include_refs: bool,
    /// Ref name filter, e.g. `heads/` or `tags/`
    pub ref_filter: Option<String>,
    /// Restrict statistics to a single branch
    pub branch_name: Option<String>,
}

/// One file change inside [`CreateCommitOptions`].
#[derive(Debug, Clone, Default)]
pub struct FileChange {
    /// Repository path of the file
    pub path: String,
    /// Full content for a new file or a complete rewrite
    pub content: Option<String>,
    /// Exact text to locate in the current file; used with `replace`
    pub search: Option<String>,
    /// Replacement for the first occurrence of `search`
    pub replace: Option<String>,
    /// Delete the file instead of changing it
    pub delete: bool,
}

/// Options for creating a commit on an existing branch.
#[derive(Debug, Clone, Default)]
pub struct CreateCommitOptions {
    /// Repository id or name
    pub repository_id: String,
    /// Branch to commit to, without `refs/heads/`
    pub branch_name: String,
    /// Commit message
    pub commit_message: String,
    /// File changes making up the commit
    pub changes: Vec<FileChange>,
}

impl AzureClient {
    /// List the Git repositories of a project.
    pub async fn list_repositories(
        &self,
        project: Option<&str>,
        include_links: bool,
    ) -> Result<Vec<Value>> {
        let project = self.project_or_default(project)?;
        let mut params = vec![format!("api-version={}", API_VERSION)];
        if include_links {
            params.push("includeLinks=true".to_string());
        }

        let url = self.project_url(
            &project,
            &format!("_apis/git/repositories?{}", params.join("&")),
        );
        let envelope: ListEnvelope<Value> = self.get(&url).await?;
        Ok(envelope.value)
    }

    /// Get a repository by id or name.
    pub async fn get_repository(&self, project: Option<&str>, repository: &str) -> Result<Value> {
        let project = self.project_or_default(project)?;
        let url = self.project_url(
            &project,
            &format!(
                "_apis/git/repositories/{}?api-version={}",
                urlencoding::encode(repository),
                API_VERSION
            ),
        );
        self.get(&url).await
    }

    /// Get a repository with optional branch statistics and refs attached.
    pub async fn get_repository_details(
        &self,
        project: Option<&str>,
        repository: &str,
        options: &RepositoryDetailsOptions,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;
        let repo = self.get_repository(Some(&project), repository).await?;

        let mut details = json!({ "repository": repo });

        if options.include_statistics {
            let branches = match &options.branch_name {
                Some(branch) => {
                    let stats = self
                        .branch_stats(&project, repository, Some(branch))
                        .await?;
                    vec![stats]
                }
                None => {
                    let url = self.project_url(
                        &project,
                        &format!(
                            "_apis/git/repositories/{}/stats/branches?api-version={}",
                            urlencoding::encode(repository),
                            API_VERSION
                        ),
                    );
                    let envelope: ListEnvelope<Value> = self.get(&url).await?;
                    envelope.value
                }
            };
            if let Some(obj) = details.as_object_mut() {
                obj.insert("statistics".to_string(), json!({ "branches": branches }));
            }
        }

        if options.include_refs {
            let mut params = vec![format!("api-version={}", API_VERSION)];
            if let Some(filter) = &options.ref_filter {
                params.push(format!("filter={}", urlencoding::encode(filter)));
            }
            let url = self.project_url(
                &project,
                &format!(
                    "_apis/git/repositories/{}/refs?{}",
                    urlencoding::encode(repository),
                    params.join("&")
                ),
            );
            let envelope: ListEnvelope<Value> = self.get(&url).await?;
            let count = envelope.value.len();
            if let Some(obj) = details.as_object_mut() {
                obj.insert(
                    "refs".to_string(),
                    json!({ "value": envelope.value, "count": count }),
                );
            }
        }

        Ok(details)
    }

    /// Get the content of a file, or a one-level listing when the path is a
    /// folder.
    pub async fn get_file_content(
        &self,
        project: Option<&str>,
        repository: &str,
        path: &str,
        options: &GetFileOptions,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;

        let mut version_params = Vec::new();
        if let Some(version) = &options.version {
            let version_type = options.version_type.unwrap_or(GitVersionType::Branch);
            version_params.push(format!(
                "versionDescriptor.version={}",
                urlencoding::encode(version)
            ));
            version_params.push(format!("versionDescriptor.versionType={}", version_type));
        }

        let metadata_url = self.item_url(&project, repository, path, &version_params, &[]);
        let metadata: Value = self.get(&metadata_url).await?;

        if metadata.get("isFolder").and_then(Value::as_bool) == Some(true) {
            let listing_url = self.item_url(
                &project,
                repository,
                path,
                &version_params,
                &["recursionLevel=oneLevel".to_string()],
            );
            let envelope: ListEnvelope<Value> = self.get(&listing_url).await?;
            // The listing includes the folder itself as the first item.
            let items: Vec<Value> = envelope
                .value
                .into_iter()
                .filter(|item| item.get("path").and_then(Value::as_str) != Some(path))
                .collect();
            return Ok(json!({
                "path": path,
                "isDirectory": true,
                "items": items,
            }));
        }

        let text_url = self.item_url(&project, repository, path, &version_params, &[]);
        let content = self.get_text(&text_url).await?;
        Ok(json!({
            "path": path,
            "isDirectory": false,
            "content": content,
        }))
    }

    /// Tree view of one repository from its default branch.
    pub async fn get_repository_tree(
        &self,
        project: Option<&str>,
        repository: &str,
        options: &RepositoryTreeOptions,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;
        let repo = self.get_repository(Some(&project), repository).await?;

        let name = repo
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(repository)
            .to_string();
        let default_branch = repo
            .get("defaultBranch")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::NotFound(format!("Repository '{}' has no default branch", repository))
            })?
            .trim_start_matches("refs/heads/")
            .to_string();

        let items = self
            .repository_items(&project, repository, &options.path, &default_branch)
            .await?;
        let (tree, stats) = shape_tree(&items, &options.path, options.depth, None)?;

        Ok(json!({
            "name": name,
            "tree": tree,
            "stats": stats,
        }))
    }

    /// Tree views across a project's repositories, filtered by wildcard
    /// patterns. Per-repository failures are recorded, not propagated.
    pub async fn get_all_repositories_tree(
        &self,
        project: Option<&str>,
        repository_pattern: Option<&str>,
        depth: usize,
        file_pattern: Option<&str>,
    ) -> Result<Vec<Value>> {
        let project = self.project_or_default(project)?;
        let repo_filter = repository_pattern.map(wildcard_to_regex).transpose()?;
        let file_filter = file_pattern.map(wildcard_to_regex).transpose()?;

        let repos = self.list_repositories(Some(&project), false).await?;
        let mut results = Vec::new();

        for repo in repos {
            let Some(name) = repo.get("name").and_then(Value::as_str) else {
                continue;
            };
            if let Some(filter) = &repo_filter {
                if !filter.is_match(name) {
                    continue;
                }
            }

            let branch = repo
                .get("defaultBranch")
                .and_then(Value::as_str)
                .map(|b| b.trim_start_matches("refs/heads/"));
            let Some(branch) = branch else {
                results.push(json!({
                    "name": name,
                    "tree": [],
                    "stats": { "directories": 0, "files": 0 },
                    "error": "no default branch",
                }));
                continue;
            };

            match self.repository_items(&project, name, "/", branch).await {
                Ok(items) => {
                    let (tree, stats) = shape_tree(&items, "/", depth, file_filter.as_ref())?;
                    results.push(json!({ "name": name, "tree": tree, "stats": stats }));
                }
                Err(err) => {
                    warn!(repository = name, error = %err, "Skipping repository tree");
                    results.push(json!({
                        "name": name,
                        "tree": [],
                        "stats": { "directories": 0, "files": 0 },
                        "error": err.to_string(),
                    }));
                }
            }
        }

        Ok(results)
    }

    /// Create a new branch pointing at the head of a source branch.
    pub async fn create_branch(
        &self,
        project: Option<&str>,
        repository: &str,
        source_branch: &str,
        new_branch: &str,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;
        let head = self
            .branch_head(&project, repository, source_branch)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("Source branch '{}' not found", source_branch))
            })?;

        let url = self.project_url(
            &project,
            &format!(
                "_apis/git/repositories/{}/refs?api-version={}",
                urlencoding::encode(repository),
                API_VERSION
            ),
        );
        let body = json!([{
            "name": format!("refs/heads/{}", new_branch),
            "oldObjectId": ZERO_OBJECT_ID,
            "newObjectId": head,
        }]);
        let envelope: ListEnvelope<Value> = self.post(&url, &body).await?;

        let all_succeeded = envelope
            .value
            .iter()
            .all(|update| update.get("success").and_then(Value::as_bool) == Some(true));
        if !all_succeeded {
            return Err(Error::Other(anyhow::anyhow!(
                "Failed to create branch '{}'",
                new_branch
            )));
        }

        Ok(envelope.value.into_iter().next().unwrap_or(Value::Null))
    }

    /// Push a commit with file changes to an existing branch.
    ///
    /// Changes may add a file (content on a path that does not exist yet),
    /// rewrite one (content on an existing path), apply a search/replace
    /// edit against the current branch content, or delete a file.
    pub async fn create_commit(
        &self,
        project: Option<&str>,
        options: &CreateCommitOptions,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;
        let repository = options.repository_id.as_str();
        let head = self
            .branch_head(&project, repository, &options.branch_name)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("Branch '{}' not found", options.branch_name))
            })?;

        let mut changes = Vec::new();
        for change in &options.changes {
            changes.push(
                self.resolve_change(&project, repository, &options.branch_name, change)
                    .await?,
            );
        }

        let url = self.project_url(
            &project,
            &format!(
                "_apis/git/repositories/{}/pushes?api-version={}",
                urlencoding::encode(repository),
                API_VERSION
            ),
        );
        let body = json!({
            "refUpdates": [{
                "name": format!("refs/heads/{}", options.branch_name),
                "oldObjectId": head,
            }],
            "commits": [{
                "comment": options.commit_message,
                "changes": changes,
            }],
        });
        self.post(&url, &body).await
    }

    /// List commits on a branch, newest first, each with its change entries.
    pub async fn list_commits(
        &self,
        project: Option<&str>,
        repository: &str,
        branch: &str,
        top: Option<u32>,
        skip: Option<u32>,
    ) -> Result<Vec<Value>> {
        let project = self.project_or_default(project)?;
        let mut params = vec![
            format!(
                "searchCriteria.itemVersion.version={}",
                urlencoding::encode(branch)
            ),
            format!("searchCriteria.$top={}", top.unwrap_or(10)),
            format!("api-version={}", API_VERSION),
        ];
        if let Some(skip) = skip {
            params.push(format!("searchCriteria.$skip={}", skip));
        }

        let url = self.project_url(
            &project,
            &format!(
                "_apis/git/repositories/{}/commits?{}",
                urlencoding::encode(repository),
                params.join("&")
            ),
        );
        let envelope: ListEnvelope<Value> = self.get(&url).await?;

        let mut commits = Vec::new();
        for mut commit in envelope.value {
            let Some(commit_id) = commit
                .get("commitId")
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                continue;
            };
            let changes = self
                .commit_changes(&project, repository, &commit_id)
                .await?;
            if let Some(obj) = commit.as_object_mut() {
                obj.insert("changes".to_string(), Value::Array(changes));
            }
            commits.push(commit);
        }

        Ok(commits)
    }

    /// Head commit id of a branch, or `None` when the branch does not exist.
    async fn branch_head(
        &self,
        project: &str,
        repository: &str,
        branch: &str,
    ) -> Result<Option<String>> {
        match self.branch_stats(project, repository, Some(branch)).await {
            Ok(stats) => Ok(stats
                .get("commit")
                .and_then(|c| c.get("commitId"))
                .and_then(Value::as_str)
                .map(str::to_string)),
            Err(Error::NotFound(_)) | Err(Error::Validation(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn branch_stats(
        &self,
        project: &str,
        repository: &str,
        branch: Option<&str>,
    ) -> Result<Value> {
        let mut params = vec![format!("api-version={}", API_VERSION)];
        if let Some(branch) = branch {
            params.push(format!("name={}", urlencoding::encode(branch)));
        }
        let url = self.project_url(
            project,
            &format!(
                "_apis/git/repositories/{}/stats/branches?{}",
                urlencoding::encode(repository),
                params.join("&")
            ),
        );
        self.get(&url).await
    }

    /// Map one requested change onto a push change entry.
    async fn resolve_change(
        &self,
        project: &str,
        repository: &str,
        branch: &str,
        change: &FileChange,
    ) -> Result<Value> {
        if change.delete {
            return Ok(json!({
                "changeType": "delete",
                "item": { "path": change.path },
            }));
        }

        if let (Some(search), Some(replace)) = (&change.search, &change.replace) {
            let current = self
                .get_file_content(
                    Some(project),
                    repository,
                    &change.path,
                    &GetFileOptions {
                        version: Some(branch.to_string()),
                        version_type: Some(GitVersionType::Branch),
                    },
                )
                .await?;
            let current = current
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !current.contains(search.as_str()) {
                return Err(Error::Validation(format!(
                    "Search text not found in {}",
                    change.path
                )));
            }
            let updated = current.replacen(search.as_str(), replace, 1);
            return Ok(json!({
                "changeType": "edit",
                "item": { "path": change.path },
                "newContent": { "content": updated, "contentType": "rawtext" },
            }));
        }

        let Some(content) = &change.content else {
            return Err(Error::Validation(format!(
                "Change for {} needs content, search/replace, or delete",
                change.path
            )));
        };

        let change_type = if self.item_exists(project, repository, branch, &change.path).await? {
            "edit"
        } else {
            "add"
        };
        Ok(json!({
            "changeType": change_type,
            "item": { "path": change.path },
            "newContent": { "content": content, "contentType": "rawtext" },
        }))
    }

    async fn item_exists(
        &self,
        project: &str,
        repository: &str,
        branch: &str,
        path: &str,
    ) -> Result<bool> {
        let version_params = vec![
            format!("versionDescriptor.version={}", urlencoding::encode(branch)),
            "versionDescriptor.versionType=branch".to_string(),
        ];
        let url = self.item_url(project, repository, path, &version_params, &[]);
        match self.get::<Value>(&url).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn commit_changes(
        &self,
        project: &str,
        repository: &str,
        commit_id: &str,
    ) -> Result<Vec<Value>> {
        let url = self.project_url(
            project,
            &format!(
                "_apis/git/repositories/{}/commits/{}/changes?api-version={}",
                urlencoding::encode(repository),
                urlencoding::encode(commit_id),
                API_VERSION
            ),
        );
        let response: Value = self.get(&url).await?;
        let entries = response
            .get("changes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(entries
            .iter()
            .map(|entry| {
                let path = entry
                    .get("item")
                    .and_then(|i| i.get("path"))
                    .and_then(Value::as_str)
                    .or_else(|| entry.get("originalPath").and_then(Value::as_str))
                    .unwrap_or_default();
                json!({
                    "path": path,
                    "changeType": entry.get("changeType").cloned().unwrap_or(Value::Null),
                })
            })
            .collect())
    }

    /// Full recursive item listing for a branch.
    async fn repository_items(
        &self,
        project: &str,
        repository: &str,
        scope_path: &str,
        branch: &str,
    ) -> Result<Vec<Value>> {
        let version_params = vec![
            format!("versionDescriptor.version={}", urlencoding::encode(branch)),
            "versionDescriptor.versionType=branch".to_string(),
        ];
        let url = self.item_url(
            project,
            repository,
            scope_path,
            &version_params,
            &["recursionLevel=full".to_string()],
        );
        let envelope: ListEnvelope<Value> = self.get(&url).await?;
        Ok(envelope.value)
    }

    fn item_url(
        &self,
        project: &str,
        repository: &str,
        path: &str,
        version_params: &[String],
        extra: &[String],
    ) -> String {
        let path_param = if extra.is_empty() {
            "path"
        } else {
            "scopePath"
        };
        let mut params = vec![format!("{}={}", path_param, urlencoding::encode(path))];
        params.extend(version_params.iter().cloned());
        params.extend(extra.iter().cloned());
        params.push(format!("api-version={}", API_VERSION));

        self.project_url(
            project,
            &format!(
                "_apis/git/repositories/{}/items?{}",
                urlencoding::encode(repository),
                params.join("&")
            ),
        )
    }
}

/// Shape a recursive item listing into tree entries plus counts.
///
/// When a file filter is given, only matching files are kept, along with
/// the directories on the path to at least one match.
fn shape_tree(
    items: &[Value],
    root_path: &str,
    depth: usize,
    file_filter: Option<&regex::Regex>,
) -> Result<(Vec<Value>, Value)> {
    struct Entry {
        name: String,
        path: String,
        relative: String,
        is_folder: bool,
        level: usize,
    }

    let mut entries = Vec::new();
    for item in items {
        let path = item.get("path").and_then(Value::as_str).unwrap_or_default();
        if path.is_empty() || path == root_path {
            continue;
        }
        if item.get("gitObjectType").and_then(Value::as_str) == Some("bad") {
            continue;
        }

        let relative = if root_path == "/" {
            path.trim_start_matches('/').to_string()
        } else {
            match path.strip_prefix(root_path) {
                Some(rest) => rest.trim_start_matches('/').to_string(),
                None => continue,
            }
        };
        if relative.is_empty() {
            continue;
        }

        let level = relative.split('/').count();
        if depth > 0 && level > depth {
            continue;
        }

        let name = relative.rsplit('/').next().unwrap_or_default().to_string();
        let is_folder = item.get("isFolder").and_then(Value::as_bool).unwrap_or(false);
        entries.push(Entry {
            name,
            path: path.to_string(),
            relative,
            is_folder,
            level,
        });
    }

    if let Some(filter) = file_filter {
        let kept_dirs: std::collections::HashSet<String> = entries
            .iter()
            .filter(|e| !e.is_folder && filter.is_match(&e.name))
            .flat_map(|e| parent_prefixes(&e.relative))
            .collect();
        entries.retain(|e| {
            if e.is_folder {
                kept_dirs.contains(&e.relative)
            } else {
                filter.is_match(&e.name)
            }
        });
    }

    let mut directories = 0usize;
    let mut files = 0usize;
    let tree: Vec<Value> = entries
        .iter()
        .map(|e| {
            if e.is_folder {
                directories += 1;
            } else {
                files += 1;
            }
            json!({
                "name": e.name,
                "path": e.path,
                "isFolder": e.is_folder,
                "level": e.level,
            })
        })
        .collect();

    Ok((tree, json!({ "directories": directories, "files": files })))
}

/// Ancestor directory paths of a relative file path, shallowest first.
fn parent_prefixes(relative: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    if let Some((parents, _)) = relative.rsplit_once('/') {
        let mut acc = String::new();
        for segment in parents.split('/') {
            if !acc.is_empty() {
                acc.push('/');
            }
            acc.push_str(segment);
            prefixes.push(acc.clone());
        }
    }
    prefixes
}

/// Render one repository tree as indented plain text.
pub fn format_repository_tree(result: &Value) -> String {
    let name = result
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("(unnamed)");

    if let Some(error) = result.get("error").and_then(Value::as_str) {
        return format!("{} (error: {})\n", name, error);
    }

    let directories = result
        .get("stats")
        .and_then(|s| s.get("directories"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let files = result
        .get("stats")
        .and_then(|s| s.get("files"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let mut out = format!("{} ({} directories, {} files)\n", name, directories, files);
    if let Some(tree) = result.get("tree").and_then(Value::as_array) {
        for item in tree {
            let level = item.get("level").and_then(Value::as_u64).unwrap_or(1) as usize;
            let item_name = item.get("name").and_then(Value::as_str).unwrap_or_default();
            let suffix = if item.get("isFolder").and_then(Value::as_bool) == Some(true) {
                "/"
            } else {
                ""
            };
            out.push_str(&"  ".repeat(level));
            out.push_str(item_name);
            out.push_str(suffix);
            out.push('\n');
        }
    }
    out
}
