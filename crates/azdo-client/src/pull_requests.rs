//! Pull requests: creation, listing, comments, updates, changes, and checks.

use azdo_core::enums::{CommentThreadStatus, PullRequestStatus};
use azdo_core::{Error, Result};
use serde_json::{json, Value};
use tracing::warn;

use crate::client::{AzureClient, ListEnvelope, PatchOp, API_VERSION, API_VERSION_PREVIEW};

/// Cap on change entries returned for a single pull request.
const MAX_CHANGE_ENTRIES: usize = 100;

/// Options for creating a pull request.
#[derive(Debug, Clone, Default)]
pub struct CreatePullRequestOptions {
    /// Pull request title
    pub title: String,
    /// Pull request description (markdown)
    pub description: Option<String>,
    /// Source ref, fully qualified (`refs/heads/...`)
    pub source_ref_name: String,
    /// Target ref, fully qualified (`refs/heads/...`)
    pub target_ref_name: String,
    /// Reviewer ids or emails, added as required reviewers
    pub reviewers: Vec<String>,
    /// Create as draft
    pub is_draft: bool,
    /// Work item ids to link
    pub work_item_ids: Vec<i64>,
    /// Labels to attach; trimmed and deduplicated case-insensitively
    pub tags: Vec<String>,
}

/// Filters for listing pull requests.
#[derive(Debug, Clone, Default)]
pub struct ListPullRequestsOptions {
    /// Status filter; `All` leaves the criteria unset
    pub status: Option<PullRequestStatus>,
    /// Filter by creator identity id
    pub creator_id: Option<String>,
    /// Filter by reviewer identity id
    pub reviewer_id: Option<String>,
    /// Filter by source ref
    pub source_ref_name: Option<String>,
    /// Filter by target ref
    pub target_ref_name: Option<String>,
    /// Page size (default 10)
    pub top: Option<u32>,
    /// Offset into the result set
    pub skip: Option<u32>,
}

/// Options for adding a pull request comment.
///
/// With `thread_id` the comment is a reply on that thread; otherwise a new
/// thread is created, optionally anchored to a file and line.
#[derive(Debug, Clone, Default)]
pub struct AddCommentOptions {
    /// Comment text
    pub content: String,
    /// Existing thread to reply on
    pub thread_id: Option<i64>,
    /// Parent comment inside the thread
    pub parent_comment_id: Option<i64>,
    /// File to anchor a new thread to
    pub file_path: Option<String>,
    /// Line to anchor a new thread to (right-hand side)
    pub line_number: Option<u32>,
    /// Initial status of a new thread
    pub status: Option<CommentThreadStatus>,
}

/// Options for updating a pull request.
#[derive(Debug, Clone, Default)]
pub struct UpdatePullRequestOptions {
    /// New title
    pub title: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New status (`active`, `abandoned`, `completed`)
    pub status: Option<PullRequestStatus>,
    /// Change the draft flag
    pub is_draft: Option<bool>,
    /// Work item ids to link
    pub add_work_item_ids: Vec<i64>,
    /// Work item ids to unlink
    pub remove_work_item_ids: Vec<i64>,
    /// Reviewer ids or emails to add
    pub add_reviewers: Vec<String>,
    /// Reviewer ids or emails to remove
    pub remove_reviewers: Vec<String>,
}

impl AzureClient {
    /// Create a pull request.
    pub async fn create_pull_request(
        &self,
        project: Option<&str>,
        repository: &str,
        options: &CreatePullRequestOptions,
    ) -> Result<Value> {
        if options.title.is_empty() {
            return Err(Error::Validation("Title is required".to_string()));
        }
        if options.source_ref_name.is_empty() {
            return Err(Error::Validation("Source branch is required".to_string()));
        }
        if options.target_ref_name.is_empty() {
            return Err(Error::Validation("Target branch is required".to_string()));
        }

        let project = self.project_or_default(project)?;
        let tags = normalize_tags(&options.tags);

        let mut body = json!({
            "title": options.title,
            "sourceRefName": options.source_ref_name,
            "targetRefName": options.target_ref_name,
            "isDraft": options.is_draft,
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(description) = &options.description {
                obj.insert("description".to_string(), json!(description));
            }
            if !options.reviewers.is_empty() {
                let reviewers: Vec<Value> = options
                    .reviewers
                    .iter()
                    .map(|r| json!({ "id": r, "isRequired": true }))
                    .collect();
                obj.insert("reviewers".to_string(), Value::Array(reviewers));
            }
            if !options.work_item_ids.is_empty() {
                let refs: Vec<Value> = options
                    .work_item_ids
                    .iter()
                    .map(|id| json!({ "id": id.to_string() }))
                    .collect();
                obj.insert("workItemRefs".to_string(), Value::Array(refs));
            }
            if !tags.is_empty() {
                let labels: Vec<Value> = tags.iter().map(|t| json!({ "name": t })).collect();
                obj.insert("labels".to_string(), Value::Array(labels));
            }
        }

        let url = self.project_url(
            &project,
            &format!(
                "_apis/git/repositories/{}/pullrequests?api-version={}",
                urlencoding::encode(repository),
                API_VERSION
            ),
        );
        let mut created: Value = self.post(&url, &body).await?;

        if !tags.is_empty() {
            self.attach_missing_labels(&project, repository, &mut created, &tags)
                .await;
        }

        Ok(created)
    }

    /// The create call does not reliably apply labels; post the missing ones.
    async fn attach_missing_labels(
        &self,
        project: &str,
        repository: &str,
        pull_request: &mut Value,
        tags: &[String],
    ) {
        let Some(id) = pull_request.get("pullRequestId").and_then(Value::as_i64) else {
            return;
        };
        let existing: Vec<String> = pull_request
            .get("labels")
            .and_then(Value::as_array)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|l| l.get("name").and_then(Value::as_str))
                    .map(str::to_lowercase)
                    .collect()
            })
            .unwrap_or_default();

        let mut attached = Vec::new();
        for tag in tags {
            if existing.contains(&tag.to_lowercase()) {
                continue;
            }
            let url = self.project_url(
                project,
                &format!(
                    "_apis/git/repositories/{}/pullRequests/{}/labels?api-version={}",
                    urlencoding::encode(repository),
                    id,
                    API_VERSION_PREVIEW
                ),
            );
            match self.post::<Value, _>(&url, &json!({ "name": tag })).await {
                Ok(label) => attached.push(label),
                Err(err) => {
                    warn!(tag = tag.as_str(), error = %err, "Failed to attach pull request label")
                }
            }
        }

        if !attached.is_empty() {
            if let Some(obj) = pull_request.as_object_mut() {
                let labels = obj
                    .entry("labels")
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Some(arr) = labels.as_array_mut() {
                    arr.extend(attached);
                }
            }
        }
    }

    /// List pull requests with pagination metadata.
    pub async fn list_pull_requests(
        &self,
        project: Option<&str>,
        repository: &str,
        options: &ListPullRequestsOptions,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;
        let top = options.top.unwrap_or(10);
        let skip = options.skip.unwrap_or(0);

        let mut params = vec![
            format!("$top={}", top),
            format!("$skip={}", skip),
            format!("api-version={}", API_VERSION),
        ];
        match options.status {
            Some(PullRequestStatus::All) | None => {}
            Some(status) => params.push(format!("searchCriteria.status={}", status)),
        }
        if let Some(creator) = &options.creator_id {
            params.push(format!(
                "searchCriteria.creatorId={}",
                urlencoding::encode(creator)
            ));
        }
        if let Some(reviewer) = &options.reviewer_id {
            params.push(format!(
                "searchCriteria.reviewerId={}",
                urlencoding::encode(reviewer)
            ));
        }
        if let Some(source) = &options.source_ref_name {
            params.push(format!(
                "searchCriteria.sourceRefName={}",
                urlencoding::encode(source)
            ));
        }
        if let Some(target) = &options.target_ref_name {
            params.push(format!(
                "searchCriteria.targetRefName={}",
                urlencoding::encode(target)
            ));
        }

        let url = self.project_url(
            &project,
            &format!(
                "_apis/git/repositories/{}/pullrequests?{}",
                urlencoding::encode(repository),
                params.join("&")
            ),
        );
        let envelope: ListEnvelope<Value> = self.get(&url).await?;

        let count = envelope.value.len();
        let has_more = count as u32 == top;
        let mut result = json!({
            "count": count,
            "value": envelope.value,
            "hasMoreResults": has_more,
        });
        if has_more {
            if let Some(obj) = result.as_object_mut() {
                obj.insert(
                    "warning".to_string(),
                    json!(format!(
                        "Results limited to {} items. Use 'skip: {}' to get the next page.",
                        top,
                        skip + top
                    )),
                );
            }
        }
        Ok(result)
    }

    /// Get a pull request by id.
    pub async fn get_pull_request(
        &self,
        project: Option<&str>,
        repository: &str,
        pull_request_id: i64,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;
        let url = self.project_url(
            &project,
            &format!(
                "_apis/git/repositories/{}/pullrequests/{}?api-version={}",
                urlencoding::encode(repository),
                pull_request_id,
                API_VERSION
            ),
        );
        self.get(&url).await
    }

    /// Get comment threads, or a single thread when `thread_id` is given.
    ///
    /// File path and line anchors from the thread context are copied onto
    /// each comment so consumers see them without walking the thread.
    pub async fn get_pull_request_comments(
        &self,
        project: Option<&str>,
        repository: &str,
        pull_request_id: i64,
        thread_id: Option<i64>,
        include_deleted: bool,
        top: Option<usize>,
    ) -> Result<Vec<Value>> {
        let project = self.project_or_default(project)?;

        if let Some(thread_id) = thread_id {
            let url = self.project_url(
                &project,
                &format!(
                    "_apis/git/repositories/{}/pullRequests/{}/threads/{}?api-version={}",
                    urlencoding::encode(repository),
                    pull_request_id,
                    thread_id,
                    API_VERSION
                ),
            );
            let thread: Value = self.get(&url).await?;
            return Ok(vec![flatten_thread_context(thread)]);
        }

        let url = self.project_url(
            &project,
            &format!(
                "_apis/git/repositories/{}/pullRequests/{}/threads?api-version={}",
                urlencoding::encode(repository),
                pull_request_id,
                API_VERSION
            ),
        );
        let envelope: ListEnvelope<Value> = self.get(&url).await?;

        let mut threads: Vec<Value> = envelope
            .value
            .into_iter()
            .filter(|t| {
                include_deleted || t.get("isDeleted").and_then(Value::as_bool) != Some(true)
            })
            .map(flatten_thread_context)
            .collect();
        if let Some(top) = top {
            threads.truncate(top);
        }
        Ok(threads)
    }

    /// Add a comment: a reply on an existing thread, or a new thread.
    pub async fn add_pull_request_comment(
        &self,
        project: Option<&str>,
        repository: &str,
        pull_request_id: i64,
        options: &AddCommentOptions,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;

        let mut comment = json!({
            "content": options.content,
            "commentType": "text",
        });
        if let Some(parent) = options.parent_comment_id {
            if let Some(obj) = comment.as_object_mut() {
                obj.insert("parentCommentId".to_string(), json!(parent));
            }
        }

        if let Some(thread_id) = options.thread_id {
            let url = self.project_url(
                &project,
                &format!(
                    "_apis/git/repositories/{}/pullRequests/{}/threads/{}/comments?api-version={}",
                    urlencoding::encode(repository),
                    pull_request_id,
                    thread_id,
                    API_VERSION
                ),
            );
            let created: Value = self.post(&url, &comment).await?;
            return Ok(json!({ "comment": created }));
        }

        let mut thread = json!({ "comments": [comment] });
        if let Some(obj) = thread.as_object_mut() {
            if let Some(status) = options.status {
                obj.insert("status".to_string(), json!(status.as_str()));
            }
            if let Some(file_path) = &options.file_path {
                let mut context = json!({ "filePath": file_path });
                if let Some(line) = options.line_number {
                    if let Some(ctx) = context.as_object_mut() {
                        ctx.insert(
                            "rightFileStart".to_string(),
                            json!({ "line": line, "offset": 1 }),
                        );
                        ctx.insert(
                            "rightFileEnd".to_string(),
                            json!({ "line": line, "offset": 1 }),
                        );
                    }
                }
                obj.insert("threadContext".to_string(), context);
            }
        }

        let url = self.project_url(
            &project,
            &format!(
                "_apis/git/repositories/{}/pullRequests/{}/threads?api-version={}",
                urlencoding::encode(repository),
                pull_request_id,
                API_VERSION
            ),
        );
        let created: Value = self.post(&url, &thread).await?;
        let first_comment = created
            .get("comments")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .cloned()
            .ok_or_else(|| {
                Error::Other(anyhow::anyhow!(
                    "Failed to create pull request comment thread"
                ))
            })?;
        Ok(json!({ "comment": first_comment, "thread": created }))
    }

    /// Update a pull request and its reviewer / work-item associations.
    pub async fn update_pull_request(
        &self,
        project: Option<&str>,
        repository: &str,
        pull_request_id: i64,
        options: &UpdatePullRequestOptions,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;
        let current = self
            .get_pull_request(Some(&project), repository, pull_request_id)
            .await?;
        let artifact_id = current
            .get("artifactId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "vstfs:///Git/PullRequestId/{}/{}/{}",
                    project, repository, pull_request_id
                )
            });

        let mut body = serde_json::Map::new();
        if let Some(title) = &options.title {
            body.insert("title".to_string(), json!(title));
        }
        if let Some(description) = &options.description {
            body.insert("description".to_string(), json!(description));
        }
        if let Some(is_draft) = options.is_draft {
            body.insert("isDraft".to_string(), json!(is_draft));
        }
        if let Some(status) = options.status {
            match status {
                PullRequestStatus::Active
                | PullRequestStatus::Abandoned
                | PullRequestStatus::Completed => {
                    body.insert("status".to_string(), json!(status.as_str()));
                }
                other => {
                    return Err(Error::Validation(format!(
                        "Invalid status: {}. Valid values are: active, abandoned, completed",
                        other
                    )));
                }
            }
        }

        let url = self.project_url(
            &project,
            &format!(
                "_apis/git/repositories/{}/pullrequests/{}?api-version={}",
                urlencoding::encode(repository),
                pull_request_id,
                API_VERSION
            ),
        );
        let updated: Value = if body.is_empty() {
            current
        } else {
            self.patch(&url, &Value::Object(body)).await?
        };

        for work_item_id in &options.add_work_item_ids {
            let ops = vec![PatchOp::add(
                "/relations/-",
                json!({
                    "rel": "ArtifactLink",
                    "url": artifact_id,
                    "attributes": { "name": "Pull Request" },
                }),
            )];
            let url = self.project_url(
                &project,
                &format!(
                    "_apis/wit/workitems/{}?api-version={}",
                    work_item_id, API_VERSION
                ),
            );
            if let Err(err) = self.patch_document::<Value>(&url, &ops).await {
                warn!(work_item = work_item_id, error = %err, "Failed to link work item");
            }
        }
        for work_item_id in &options.remove_work_item_ids {
            if let Err(err) = self
                .unlink_work_item(&project, *work_item_id, &artifact_id)
                .await
            {
                warn!(work_item = work_item_id, error = %err, "Failed to unlink work item");
            }
        }

        for reviewer in &options.add_reviewers {
            let url = self.project_url(
                &project,
                &format!(
                    "_apis/git/repositories/{}/pullRequests/{}/reviewers/{}?api-version={}",
                    urlencoding::encode(repository),
                    pull_request_id,
                    urlencoding::encode(reviewer),
                    API_VERSION
                ),
            );
            let body = json!({ "id": reviewer, "isRequired": false });
            if let Err(err) = self.put::<Value, _>(&url, &body).await {
                warn!(reviewer = reviewer.as_str(), error = %err, "Failed to add reviewer");
            }
        }
        for reviewer in &options.remove_reviewers {
            let url = self.project_url(
                &project,
                &format!(
                    "_apis/git/repositories/{}/pullRequests/{}/reviewers/{}?api-version={}",
                    urlencoding::encode(repository),
                    pull_request_id,
                    urlencoding::encode(reviewer),
                    API_VERSION
                ),
            );
            if let Err(err) = self.delete(&url).await {
                warn!(reviewer = reviewer.as_str(), error = %err, "Failed to remove reviewer");
            }
        }

        Ok(updated)
    }

    /// Drop the artifact link pointing at this pull request, if present.
    async fn unlink_work_item(
        &self,
        project: &str,
        work_item_id: i64,
        artifact_id: &str,
    ) -> Result<()> {
        let url = self.project_url(
            project,
            &format!(
                "_apis/wit/workitems/{}?$expand=relations&api-version={}",
                work_item_id, API_VERSION
            ),
        );
        let work_item: Value = self.get(&url).await?;
        let Some(relations) = work_item.get("relations").and_then(Value::as_array) else {
            return Ok(());
        };
        let Some(index) = relations.iter().position(|rel| {
            rel.get("rel").and_then(Value::as_str) == Some("ArtifactLink")
                && rel
                    .get("attributes")
                    .and_then(|a| a.get("name"))
                    .and_then(Value::as_str)
                    == Some("Pull Request")
                && rel.get("url").and_then(Value::as_str) == Some(artifact_id)
        }) else {
            return Ok(());
        };

        let ops = vec![PatchOp::remove(format!("/relations/{}", index))];
        let url = self.project_url(
            project,
            &format!(
                "_apis/wit/workitems/{}?api-version={}",
                work_item_id, API_VERSION
            ),
        );
        self.patch_document::<Value>(&url, &ops).await?;
        Ok(())
    }

    /// Changed file entries of the latest iteration, plus branch names.
    pub async fn get_pull_request_changes(
        &self,
        project: Option<&str>,
        repository: &str,
        pull_request_id: i64,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;
        let pull_request = self
            .get_pull_request(Some(&project), repository, pull_request_id)
            .await?;

        let url = self.project_url(
            &project,
            &format!(
                "_apis/git/repositories/{}/pullRequests/{}/iterations?api-version={}",
                urlencoding::encode(repository),
                pull_request_id,
                API_VERSION
            ),
        );
        let iterations: ListEnvelope<Value> = self.get(&url).await?;
        let latest = iterations
            .value
            .last()
            .and_then(|i| i.get("id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                Error::NotFound("No iterations found for pull request".to_string())
            })?;

        let url = self.project_url(
            &project,
            &format!(
                "_apis/git/repositories/{}/pullRequests/{}/iterations/{}/changes?api-version={}",
                urlencoding::encode(repository),
                pull_request_id,
                latest,
                API_VERSION
            ),
        );
        let changes: Value = self.get(&url).await?;

        let entries = changes
            .get("changeEntries")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let total = entries.len();
        let truncated = total > MAX_CHANGE_ENTRIES;
        let files: Vec<Value> = entries
            .iter()
            .take(MAX_CHANGE_ENTRIES)
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
            .collect();

        Ok(json!({
            "iterationId": latest,
            "totalChanges": total,
            "truncated": truncated,
            "files": files,
            "sourceRefName": pull_request.get("sourceRefName").cloned().unwrap_or(Value::Null),
            "targetRefName": pull_request.get("targetRefName").cloned().unwrap_or(Value::Null),
        }))
    }

    /// Status checks and policy evaluations, with pipeline references
    /// extracted from target URLs and configuration settings.
    pub async fn get_pull_request_checks(
        &self,
        project: Option<&str>,
        repository: &str,
        pull_request_id: i64,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;
        let project_id = self.resolve_project_id(&project).await?;

        let url = self.project_url(
            &project,
            &format!(
                "_apis/git/repositories/{}/pullRequests/{}/statuses?api-version={}",
                urlencoding::encode(repository),
                pull_request_id,
                API_VERSION
            ),
        );
        let statuses: ListEnvelope<Value> = self.get(&url).await?;

        let artifact_id = format!(
            "vstfs:///CodeReview/CodeReviewId/{}/{}",
            project_id, pull_request_id
        );
        let url = self.project_url(
            &project,
            &format!(
                "_apis/policy/evaluations?artifactId={}&api-version={}",
                urlencoding::encode(&artifact_id),
                API_VERSION_PREVIEW
            ),
        );
        let evaluations: ListEnvelope<Value> = self.get(&url).await?;

        let statuses: Vec<Value> = statuses.value.iter().map(map_status_record).collect();
        let policy_evaluations: Vec<Value> = evaluations
            .value
            .iter()
            .map(map_evaluation_record)
            .collect();

        Ok(json!({
            "statuses": statuses,
            "policyEvaluations": policy_evaluations,
        }))
    }

    /// The policy artifact id needs the project GUID, not its name.
    async fn resolve_project_id(&self, project: &str) -> Result<String> {
        if is_guid(project) {
            return Ok(project.to_string());
        }
        let details = self.get_project(Some(project)).await?;
        details
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::NotFound(format!("Project '{}' not found", project)))
    }
}

fn is_guid(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    value.char_indices().all(|(i, c)| match i {
        8 | 13 | 18 | 23 => c == '-',
        _ => c.is_ascii_hexdigit(),
    })
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut normalized = Vec::new();
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() || !seen.insert(trimmed.to_lowercase()) {
            continue;
        }
        normalized.push(trimmed.to_string());
    }
    normalized
}

/// Copy the thread's file path and line anchors onto each comment.
fn flatten_thread_context(mut thread: Value) -> Value {
    let context = thread.get("threadContext").cloned();
    let Some(context) = context else {
        return thread;
    };

    let file_path = context.get("filePath").cloned();
    let anchors = [
        "leftFileStart",
        "leftFileEnd",
        "rightFileStart",
        "rightFileEnd",
    ];

    if let Some(comments) = thread.get_mut("comments").and_then(Value::as_array_mut) {
        for comment in comments {
            let Some(obj) = comment.as_object_mut() else {
                continue;
            };
            if let Some(file_path) = &file_path {
                obj.insert("filePath".to_string(), file_path.clone());
            }
            for anchor in anchors {
                if let Some(position) = context.get(anchor) {
                    obj.insert(anchor.to_string(), position.clone());
                }
            }
        }
    }
    thread
}

/// Extract pipeline/run identifiers from a status record.
fn map_status_record(status: &Value) -> Value {
    let target_url = status.get("targetUrl").and_then(Value::as_str);
    let pipeline = merge_pipeline_refs(&[
        target_url.and_then(pipeline_ref_from_url),
        status.get("context").and_then(pipeline_ref_from_object),
        status.get("properties").and_then(pipeline_ref_from_object),
    ]);

    json!({
        "id": status.get("id").cloned().unwrap_or(Value::Null),
        "state": status.get("state").cloned().unwrap_or(json!("unknown")),
        "description": status.get("description").cloned().unwrap_or(Value::Null),
        "context": {
            "name": status.get("context").and_then(|c| c.get("name")).cloned().unwrap_or(Value::Null),
            "genre": status.get("context").and_then(|c| c.get("genre")).cloned().unwrap_or(Value::Null),
        },
        "createdDate": status.get("creationDate").cloned().unwrap_or(Value::Null),
        "updatedDate": status.get("updatedDate").cloned().unwrap_or(Value::Null),
        "targetUrl": target_url.map(|u| json!(u)).unwrap_or(Value::Null),
        "pipeline": pipeline.unwrap_or(Value::Null),
    })
}

/// Extract pipeline/run identifiers from a policy evaluation record.
fn map_evaluation_record(evaluation: &Value) -> Value {
    let configuration = evaluation.get("configuration");
    let settings = configuration.and_then(|c| c.get("settings"));
    let context = evaluation.get("context");

    let settings_url = settings
        .and_then(|s| s.get("targetUrl"))
        .and_then(Value::as_str);
    let context_url = context
        .and_then(|c| c.get("targetUrl"))
        .and_then(Value::as_str);
    let pipeline = merge_pipeline_refs(&[
        settings.and_then(pipeline_ref_from_object),
        context.and_then(pipeline_ref_from_object),
        settings_url.or(context_url).and_then(pipeline_ref_from_url),
    ]);

    let display_name = settings
        .and_then(|s| s.get("displayName"))
        .and_then(Value::as_str)
        .or_else(|| {
            configuration
                .and_then(|c| c.get("type"))
                .and_then(|t| t.get("displayName"))
                .and_then(Value::as_str)
        });

    json!({
        "evaluationId": evaluation.get("evaluationId").cloned().unwrap_or(Value::Null),
        "status": evaluation.get("status").cloned().unwrap_or(json!("unknown")),
        "isBlocking": configuration.and_then(|c| c.get("isBlocking")).cloned().unwrap_or(Value::Null),
        "isEnabled": configuration.and_then(|c| c.get("isEnabled")).cloned().unwrap_or(Value::Null),
        "configurationId": configuration.and_then(|c| c.get("id")).cloned().unwrap_or(Value::Null),
        "configurationTypeId": configuration
            .and_then(|c| c.get("type"))
            .and_then(|t| t.get("id"))
            .cloned()
            .unwrap_or(Value::Null),
        "displayName": display_name.map(|n| json!(n)).unwrap_or(Value::Null),
        "startedDate": evaluation.get("startedDate").cloned().unwrap_or(Value::Null),
        "completedDate": evaluation.get("completedDate").cloned().unwrap_or(Value::Null),
        "targetUrl": settings_url.or(context_url).map(|u| json!(u)).unwrap_or(Value::Null),
        "pipeline": pipeline.unwrap_or(Value::Null),
    })
}

/// Pull pipeline/definition/run/build ids out of a pipeline web URL.
fn pipeline_ref_from_url(target_url: &str) -> Option<Value> {
    let mut reference = serde_json::Map::new();

    let (path, query) = match target_url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target_url, None),
    };

    if let Some(query) = query {
        for pair in query.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let Ok(numeric) = value.parse::<i64>() else {
                continue;
            };
            match key {
                "pipelineId" => {
                    reference.insert("pipelineId".to_string(), json!(numeric));
                }
                "definitionId" | "buildDefinitionId" => {
                    reference
                        .entry("definitionId".to_string())
                        .or_insert(json!(numeric));
                }
                "runId" => {
                    reference.insert("runId".to_string(), json!(numeric));
                }
                "buildId" => {
                    reference.insert("buildId".to_string(), json!(numeric));
                    reference.entry("runId".to_string()).or_insert(json!(numeric));
                }
                _ => {}
            }
        }
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for (i, segment) in segments.iter().enumerate() {
        let Some(next) = segments.get(i + 1).and_then(|s| s.parse::<i64>().ok()) else {
            continue;
        };
        match *segment {
            "pipelines" => {
                reference
                    .entry("pipelineId".to_string())
                    .or_insert(json!(next));
            }
            "runs" => {
                reference.entry("runId".to_string()).or_insert(json!(next));
                if i > 0 {
                    if let Ok(pipeline) = segments[i - 1].parse::<i64>() {
                        reference
                            .entry("pipelineId".to_string())
                            .or_insert(json!(pipeline));
                    }
                }
            }
            "Build" if segments.get(i + 2).is_none() => {
                reference
                    .entry("buildId".to_string())
                    .or_insert(json!(next));
                reference.entry("runId".to_string()).or_insert(json!(next));
            }
            _ => {}
        }
    }

    if reference.is_empty() {
        None
    } else {
        Some(Value::Object(reference))
    }
}

/// Pull pipeline identifiers out of a context/settings/properties object.
fn pipeline_ref_from_object(value: &Value) -> Option<Value> {
    let object = value.as_object()?;
    let mut reference = serde_json::Map::new();

    let numeric = |v: &Value| -> Option<i64> {
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.parse::<i64>().ok()))
    };

    if let Some(id) = object.get("pipelineId").and_then(numeric) {
        reference.insert("pipelineId".to_string(), json!(id));
    }
    if let Some(id) = object
        .get("definitionId")
        .or_else(|| object.get("buildDefinitionId"))
        .and_then(numeric)
    {
        reference.insert("definitionId".to_string(), json!(id));
    }
    if let Some(id) = object
        .get("runId")
        .or_else(|| object.get("buildId"))
        .and_then(numeric)
    {
        reference.insert("runId".to_string(), json!(id));
    }
    if let Some(id) = object.get("buildId").and_then(numeric) {
        reference.insert("buildId".to_string(), json!(id));
    }
    if let Some(name) = object
        .get("displayName")
        .or_else(|| object.get("name"))
        .and_then(Value::as_str)
    {
        reference.insert("displayName".to_string(), json!(name));
    }

    if reference.is_empty() {
        None
    } else {
        Some(Value::Object(reference))
    }
}

/// First-wins merge of partial pipeline references.
fn merge_pipeline_refs(refs: &[Option<Value>]) -> Option<Value> {
    let mut merged = serde_json::Map::new();
    for reference in refs.iter().flatten() {
        if let Some(obj) = reference.as_object() {
            for (key, value) in obj {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }
    if merged.is_empty() {
        None
    } else {
        Some(Value::Object(merged))
    }
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
    async fn test_create_pull_request_body() {
        let server = MockServer::start();

        let create_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/acme/widgets/_apis/git/repositories/api/pullrequests")
                .body_includes("refs/heads/feature/x")
                .body_includes("refs/heads/main")
                .body_includes("\"isRequired\":true");
            then.status(201).json_body(serde_json::json!({
                "pullRequestId": 42,
                "title": "Add feature",
                "labels": []
            }));
        });

        let client = test_client(&server);
        let pr = client
            .create_pull_request(
                None,
                "api",
                &CreatePullRequestOptions {
                    title: "Add feature".to_string(),
                    source_ref_name: "refs/heads/feature/x".to_string(),
                    target_ref_name: "refs/heads/main".to_string(),
                    reviewers: vec!["user@example.com".to_string()],
                    work_item_ids: vec![7],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        create_mock.assert();
        assert_eq!(pr["pullRequestId"], 42);
    }

    #[tokio::test]
    async fn test_create_pull_request_attaches_tags() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(POST)
                .path("/acme/widgets/_apis/git/repositories/api/pullrequests");
            then.status(201).json_body(serde_json::json!({
                "pullRequestId": 42,
                "labels": []
            }));
        });
        let label_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/acme/widgets/_apis/git/repositories/api/pullRequests/42/labels")
                .body_includes("backend");
            then.status(201)
                .json_body(serde_json::json!({"id": "l1", "name": "backend"}));
        });

        let client = test_client(&server);
        let pr = client
            .create_pull_request(
                None,
                "api",
                &CreatePullRequestOptions {
                    title: "T".to_string(),
                    source_ref_name: "refs/heads/a".to_string(),
                    target_ref_name: "refs/heads/b".to_string(),
                    // duplicate collapses before any request goes out
                    tags: vec!["backend".to_string(), " Backend ".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        label_mock.assert();
        assert_eq!(pr["labels"][0]["name"], "backend");
    }

    #[tokio::test]
    async fn test_create_pull_request_requires_title() {
        let server = MockServer::start();
        let client = test_client(&server);
        let err = client
            .create_pull_request(None, "api", &CreatePullRequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_list_pull_requests_pagination_warning() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/_apis/git/repositories/api/pullrequests")
                .query_param("searchCriteria.status", "active")
                .query_param("$top", "2")
                .query_param("$skip", "0");
            then.status(200).json_body(serde_json::json!({
                "count": 2,
                "value": [
                    {"pullRequestId": 1},
                    {"pullRequestId": 2}
                ]
            }));
        });

        let client = test_client(&server);
        let result = client
            .list_pull_requests(
                None,
                "api",
                &ListPullRequestsOptions {
                    status: Some(PullRequestStatus::Active),
                    top: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result["count"], 2);
        assert_eq!(result["hasMoreResults"], true);
        assert!(result["warning"]
            .as_str()
            .unwrap()
            .contains("'skip: 2'"));
    }

    #[tokio::test]
    async fn test_list_pull_requests_all_status_unset() {
        let server = MockServer::start();

        // A status filter in the query would hit this mock and fail the call.
        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/_apis/git/repositories/api/pullrequests")
                .query_param_exists("searchCriteria.status");
            then.status(500);
        });
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/_apis/git/repositories/api/pullrequests");
            then.status(200)
                .json_body(serde_json::json!({"count": 0, "value": []}));
        });

        let client = test_client(&server);
        let result = client
            .list_pull_requests(
                None,
                "api",
                &ListPullRequestsOptions {
                    status: Some(PullRequestStatus::All),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(result["hasMoreResults"], false);
    }

    #[tokio::test]
    async fn test_get_pull_request_comments_flattens_context() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/_apis/git/repositories/api/pullRequests/42/threads");
            then.status(200).json_body(serde_json::json!({
                "count": 2,
                "value": [
                    {
                        "id": 1,
                        "status": "active",
                        "threadContext": {
                            "filePath": "/src/app.ts",
                            "rightFileStart": {"line": 10, "offset": 1}
                        },
                        "comments": [{"id": 1, "content": "Fix this"}]
                    },
                    {
                        "id": 2,
                        "isDeleted": true,
                        "comments": [{"id": 2, "content": "gone"}]
                    }
                ]
            }));
        });

        let client = test_client(&server);
        let threads = client
            .get_pull_request_comments(None, "api", 42, None, false, None)
            .await
            .unwrap();

        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0]["comments"][0]["filePath"], "/src/app.ts");
        assert_eq!(threads[0]["comments"][0]["rightFileStart"]["line"], 10);
    }

    #[tokio::test]
    async fn test_add_comment_reply_to_thread() {
        let server = MockServer::start();

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/acme/widgets/_apis/git/repositories/api/pullRequests/42/threads/7/comments")
                .body_includes("\"parentCommentId\":3");
            then.status(201)
                .json_body(serde_json::json!({"id": 9, "content": "Reply"}));
        });

        let client = test_client(&server);
        let result = client
            .add_pull_request_comment(
                None,
                "api",
                42,
                &AddCommentOptions {
                    content: "Reply".to_string(),
                    thread_id: Some(7),
                    parent_comment_id: Some(3),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(result["comment"]["id"], 9);
        assert!(result.get("thread").is_none());
    }

    #[tokio::test]
    async fn test_add_comment_new_thread_with_anchor() {
        let server = MockServer::start();

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/acme/widgets/_apis/git/repositories/api/pullRequests/42/threads")
                .body_includes("\"filePath\":\"/src/app.ts\"")
                .body_includes("\"status\":\"active\"");
            then.status(201).json_body(serde_json::json!({
                "id": 11,
                "comments": [{"id": 1, "content": "Look here"}]
            }));
        });

        let client = test_client(&server);
        let result = client
            .add_pull_request_comment(
                None,
                "api",
                42,
                &AddCommentOptions {
                    content: "Look here".to_string(),
                    file_path: Some("/src/app.ts".to_string()),
                    line_number: Some(5),
                    status: Some(CommentThreadStatus::Active),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(result["thread"]["id"], 11);
        assert_eq!(result["comment"]["content"], "Look here");
    }

    #[tokio::test]
    async fn test_update_pull_request_patch_and_reviewers() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/_apis/git/repositories/api/pullrequests/42");
            then.status(200).json_body(serde_json::json!({
                "pullRequestId": 42,
                "artifactId": "vstfs:///Git/PullRequestId/p/r/42"
            }));
        });
        let patch_mock = server.mock(|when, then| {
            when.method(PATCH)
                .path("/acme/widgets/_apis/git/repositories/api/pullrequests/42")
                .body_includes("\"status\":\"completed\"");
            then.status(200).json_body(serde_json::json!({
                "pullRequestId": 42,
                "status": "completed"
            }));
        });
        let reviewer_mock = server.mock(|when, then| {
            when.method(PUT).path(
                "/acme/widgets/_apis/git/repositories/api/pullRequests/42/reviewers/user%40example.com",
            );
            then.status(200).json_body(serde_json::json!({"vote": 0}));
        });

        let client = test_client(&server);
        let updated = client
            .update_pull_request(
                None,
                "api",
                42,
                &UpdatePullRequestOptions {
                    status: Some(PullRequestStatus::Completed),
                    add_reviewers: vec!["user@example.com".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        patch_mock.assert();
        reviewer_mock.assert();
        assert_eq!(updated["status"], "completed");
    }

    #[tokio::test]
    async fn test_update_pull_request_rejects_bad_status() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/_apis/git/repositories/api/pullrequests/42");
            then.status(200)
                .json_body(serde_json::json!({"pullRequestId": 42}));
        });

        let client = test_client(&server);
        let err = client
            .update_pull_request(
                None,
                "api",
                42,
                &UpdatePullRequestOptions {
                    status: Some(PullRequestStatus::NotSet),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_get_pull_request_changes_truncation_fields() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/_apis/git/repositories/api/pullrequests/42");
            then.status(200).json_body(serde_json::json!({
                "pullRequestId": 42,
                "sourceRefName": "refs/heads/feature/x",
                "targetRefName": "refs/heads/main"
            }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/_apis/git/repositories/api/pullRequests/42/iterations");
            then.status(200).json_body(serde_json::json!({
                "count": 2,
                "value": [{"id": 1}, {"id": 2}]
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path(
                "/acme/widgets/_apis/git/repositories/api/pullRequests/42/iterations/2/changes",
            );
            then.status(200).json_body(serde_json::json!({
                "changeEntries": [
                    {"item": {"path": "/a.rs"}, "changeType": "edit"},
                    {"item": {"path": "/b.rs"}, "changeType": "add"}
                ]
            }));
        });

        let client = test_client(&server);
        let changes = client
            .get_pull_request_changes(None, "api", 42)
            .await
            .unwrap();

        assert_eq!(changes["iterationId"], 2);
        assert_eq!(changes["totalChanges"], 2);
        assert_eq!(changes["truncated"], false);
        assert_eq!(changes["files"][0]["path"], "/a.rs");
        assert_eq!(changes["sourceRefName"], "refs/heads/feature/x");
    }

    #[tokio::test]
    async fn test_get_pull_request_checks_maps_pipeline() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/_apis/git/repositories/api/pullRequests/42/statuses");
            then.status(200).json_body(serde_json::json!({
                "count": 1,
                "value": [{
                    "id": 1,
                    "state": "failed",
                    "description": "CI",
                    "context": {"name": "ci", "genre": "continuous-integration"},
                    "targetUrl": "https://dev.azure.com/acme/widgets/_build/results?buildId=123"
                }]
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/acme/_apis/projects/widgets");
            then.status(200).json_body(serde_json::json!({
                "id": "0f00f000-1111-2222-3333-444444444444",
                "name": "widgets"
            }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/_apis/policy/evaluations")
                .query_param_exists("artifactId");
            then.status(200).json_body(serde_json::json!({
                "count": 1,
                "value": [{
                    "evaluationId": "e1",
                    "status": "rejected",
                    "configuration": {
                        "id": 5,
                        "isBlocking": true,
                        "isEnabled": true,
                        "type": {"id": "t", "displayName": "Build"},
                        "settings": {"buildDefinitionId": 77, "displayName": "PR Build"}
                    }
                }]
            }));
        });

        let client = test_client(&server);
        let checks = client
            .get_pull_request_checks(None, "api", 42)
            .await
            .unwrap();

        assert_eq!(checks["statuses"][0]["state"], "failed");
        assert_eq!(checks["statuses"][0]["pipeline"]["buildId"], 123);
        assert_eq!(checks["statuses"][0]["pipeline"]["runId"], 123);
        let evaluation = &checks["policyEvaluations"][0];
        assert_eq!(evaluation["status"], "rejected");
        assert_eq!(evaluation["isBlocking"], true);
        assert_eq!(evaluation["pipeline"]["definitionId"], 77);
        assert_eq!(evaluation["displayName"], "PR Build");
    }

    #[test]
    fn test_pipeline_ref_from_url_path_segments() {
        let reference =
            pipeline_ref_from_url("https://dev.azure.com/acme/widgets/_build/results?buildId=55")
                .unwrap();
        assert_eq!(reference["buildId"], 55);
        assert_eq!(reference["runId"], 55);

        let reference =
            pipeline_ref_from_url("https://dev.azure.com/acme/p/_pipelines/pipelines/12/runs/99")
                .unwrap();
        assert_eq!(reference["pipelineId"], 12);
        assert_eq!(reference["runId"], 99);
    }

    #[test]
    fn test_normalize_tags_dedupes() {
        let tags = normalize_tags(&[
            " backend ".to_string(),
            "Backend".to_string(),
            "".to_string(),
            "ui".to_string(),
        ]);
        assert_eq!(tags, vec!["backend".to_string(), "ui".to_string()]);
    }

    #[test]
    fn test_is_guid() {
        assert!(is_guid("0f00f000-1111-2222-3333-444444444444"));
        assert!(!is_guid("widgets"));
        assert!(!is_guid("0f00f000-1111-2222-3333-44444444444"));
    }
}
