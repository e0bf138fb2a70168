//! Pipelines: definitions, runs, timelines, logs, and triggering.

use std::collections::HashSet;

use azdo_core::{Error, Result};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::client::{AzureClient, ListEnvelope, API_VERSION};

/// Largest page the runs route accepts.
const MAX_RUNS_PAGE: u32 = 100;

/// Options for listing pipeline definitions.
#[derive(Debug, Clone, Default)]
pub struct ListPipelinesOptions {
    /// Sort expression, e.g. `name asc`
    pub order_by: Option<String>,
    /// Maximum number of pipelines to return
    pub top: Option<u32>,
    /// Continuation token from a previous page
    pub continuation_token: Option<String>,
}

/// Options for listing runs of a pipeline.
#[derive(Debug, Clone, Default)]
pub struct ListRunsOptions {
    /// Maximum number of runs to return (1-100, default 50)
    pub top: Option<u32>,
    /// Continuation token from a previous page
    pub continuation_token: Option<String>,
    /// Branch filter; bare names expand to `refs/heads/...`
    pub branch: Option<String>,
    /// Run state filter (`notStarted`, `inProgress`, `completed`, ...)
    pub state: Option<String>,
    /// Run result filter (`succeeded`, `failed`, `canceled`, ...)
    pub result: Option<String>,
    /// Only runs created at or after this instant (ISO 8601)
    pub created_from: Option<String>,
    /// Only runs created at or before this instant (ISO 8601)
    pub created_to: Option<String>,
    /// Sort order, `createdDate desc` (default) or `createdDate asc`
    pub order_by: Option<String>,
}

/// Options for retrieving a run timeline.
#[derive(Debug, Clone, Default)]
pub struct TimelineOptions {
    /// Specific timeline id; defaults to the run's current timeline
    pub timeline_id: Option<String>,
    /// Keep only records in these states (`pending`, `inProgress`, `completed`)
    pub states: Vec<String>,
    /// Keep only records with these results (`succeeded`, `failed`, `skipped`, ...)
    pub results: Vec<String>,
}

/// Options for fetching one log of a run.
#[derive(Debug, Clone, Default)]
pub struct PipelineLogOptions {
    /// `plain` (default) joins the lines into one string; `json` returns the
    /// raw record form
    pub format: Option<String>,
    /// First line to include
    pub start_line: Option<u32>,
    /// Last line to include
    pub end_line: Option<u32>,
}

/// Options for triggering a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct TriggerRunOptions {
    /// Branch to run from; bare names expand to `refs/heads/...`
    pub branch: Option<String>,
    /// Template parameters passed to the pipeline
    pub template_parameters: Map<String, Value>,
    /// Runtime variables, name to `{ "value": ..., "isSecret": ... }`
    pub variables: Map<String, Value>,
    /// Stage identifiers to skip
    pub stages_to_skip: Vec<String>,
    /// Validate and expand the YAML without queuing a run
    pub preview_run: bool,
}

impl AzureClient {
    /// List the pipeline definitions in a project.
    pub async fn list_pipelines(
        &self,
        project: Option<&str>,
        options: &ListPipelinesOptions,
    ) -> Result<Vec<Value>> {
        let project = self.project_or_default(project)?;

        let mut params = vec![format!("api-version={}", API_VERSION)];
        if let Some(order_by) = &options.order_by {
            params.push(format!("orderBy={}", urlencoding::encode(order_by)));
        }
        if let Some(top) = options.top {
            params.push(format!("$top={}", top));
        }
        if let Some(token) = &options.continuation_token {
            params.push(format!("continuationToken={}", urlencoding::encode(token)));
        }

        let url = self.project_url(&project, &format!("_apis/pipelines?{}", params.join("&")));
        let envelope: ListEnvelope<Value> = self.get(&url).await?;
        Ok(envelope.value)
    }

    /// Get one pipeline definition, optionally at a specific version.
    pub async fn get_pipeline(
        &self,
        project: Option<&str>,
        pipeline_id: i64,
        pipeline_version: Option<i64>,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;

        let mut params = vec![format!("api-version={}", API_VERSION)];
        if let Some(version) = pipeline_version {
            params.push(format!("pipelineVersion={}", version));
        }

        let url = self.project_url(
            &project,
            &format!("_apis/pipelines/{}?{}", pipeline_id, params.join("&")),
        );
        self.get(&url).await
    }

    /// List recent runs of a pipeline.
    ///
    /// Returns `{ "runs": [...] }` plus a `continuationToken` when the
    /// service indicates more pages.
    pub async fn list_pipeline_runs(
        &self,
        project: Option<&str>,
        pipeline_id: i64,
        options: &ListRunsOptions,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;

        let top = options.top.unwrap_or(50).clamp(1, MAX_RUNS_PAGE);
        let mut params = vec![
            format!("api-version={}", API_VERSION),
            format!("$top={}", top),
        ];
        if let Some(token) = &options.continuation_token {
            params.push(format!("continuationToken={}", urlencoding::encode(token)));
        }
        if let Some(branch) = options.branch.as_deref().and_then(normalize_branch) {
            params.push(format!("branch={}", urlencoding::encode(&branch)));
        }
        if let Some(state) = &options.state {
            params.push(format!("state={}", urlencoding::encode(state)));
        }
        if let Some(result) = &options.result {
            params.push(format!("result={}", urlencoding::encode(result)));
        }
        if let Some(from) = &options.created_from {
            params.push(format!("createdDate/min={}", urlencoding::encode(from)));
        }
        if let Some(to) = &options.created_to {
            params.push(format!("createdDate/max={}", urlencoding::encode(to)));
        }
        let order_by = options.order_by.as_deref().unwrap_or("createdDate desc");
        params.push(format!("orderBy={}", urlencoding::encode(order_by)));

        let url = self.project_url(
            &project,
            &format!("_apis/pipelines/{}/runs?{}", pipeline_id, params.join("&")),
        );
        let response = self.get_response(&url).await?;
        let header_token = response
            .headers()
            .get("x-ms-continuationtoken")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let mut body: Value = response
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let runs = body
            .get_mut("value")
            .map(Value::take)
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let token = header_token.or_else(|| {
            body.get("continuationToken")
                .and_then(|t| t.as_str())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        });

        let mut result = Map::new();
        result.insert("runs".to_string(), runs);
        if let Some(token) = token {
            result.insert("continuationToken".to_string(), Value::String(token));
        }
        Ok(Value::Object(result))
    }

    /// Get one run, with artifact summaries attached when the run has any.
    ///
    /// A `pipeline_id` acts as a guard: the call fails when the run belongs
    /// to a different pipeline.
    pub async fn get_pipeline_run(
        &self,
        project: Option<&str>,
        run_id: i64,
        pipeline_id: Option<i64>,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;
        let resolved = self
            .resolve_pipeline_id(&project, run_id, pipeline_id)
            .await;

        // The pipeline-scoped route is authoritative, but runs can be read
        // without a pipeline id through the unscoped route.
        let mut routes = Vec::new();
        if let Some(id) = resolved {
            routes.push(format!("_apis/pipelines/{}/runs/{}", id, run_id));
        }
        routes.push(format!("_apis/pipelines/runs/{}", run_id));

        let mut run: Option<Value> = None;
        for route in routes {
            let url = self.project_url(
                &project,
                &format!("{}?api-version={}", route, API_VERSION),
            );
            match self.get::<Value>(&url).await {
                Ok(value) => {
                    run = Some(value);
                    break;
                }
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        let mut run = run.ok_or_else(|| {
            Error::NotFound(format!(
                "Pipeline run {} not found in project {}",
                run_id, project
            ))
        })?;

        if let Some(expected) = pipeline_id {
            let actual = coerce_id(run.get("pipeline").and_then(|p| p.get("id")));
            if actual != Some(expected) {
                return Err(Error::NotFound(format!(
                    "Run {} does not belong to pipeline {}",
                    run_id, expected
                )));
            }
        }

        let artifacts = self.fetch_run_artifacts(&project, run_id, resolved).await;
        if !artifacts.is_empty() {
            if let Some(obj) = run.as_object_mut() {
                obj.insert("artifacts".to_string(), Value::Array(artifacts));
            }
        }

        Ok(run)
    }

    /// Get the timeline of stages, jobs, and tasks for a run.
    pub async fn pipeline_timeline(
        &self,
        project: Option<&str>,
        run_id: i64,
        options: &TimelineOptions,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;

        let mut params = vec![format!("api-version={}", API_VERSION)];
        if let Some(timeline_id) = &options.timeline_id {
            params.push(format!("timelineId={}", urlencoding::encode(timeline_id)));
        }

        let url = self.project_url(
            &project,
            &format!(
                "_apis/build/builds/{}/timeline?{}",
                run_id,
                params.join("&")
            ),
        );
        let mut timeline: Value = self.get(&url).await?;

        let state_filter = normalize_filter(&options.states);
        let result_filter = normalize_filter(&options.results);
        if state_filter.is_none() && result_filter.is_none() {
            return Ok(timeline);
        }

        if let Some(records) = timeline.get_mut("records").and_then(|r| r.as_array_mut()) {
            records.retain(|record| {
                let state = lowercase_field(record, "state");
                let result = lowercase_field(record, "result");
                let state_match = state_filter
                    .as_ref()
                    .is_none_or(|f| state.as_deref().is_some_and(|s| f.contains(s)));
                let result_match = result_filter
                    .as_ref()
                    .is_none_or(|f| result.as_deref().is_some_and(|r| f.contains(r)));
                state_match && result_match
            });
        }

        Ok(timeline)
    }

    /// Fetch one log of a run by the log id from its timeline records.
    pub async fn get_pipeline_log(
        &self,
        project: Option<&str>,
        run_id: i64,
        log_id: i64,
        options: &PipelineLogOptions,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;

        let mut params = vec![format!("api-version={}", API_VERSION)];
        if let Some(start) = options.start_line {
            params.push(format!("startLine={}", start));
        }
        if let Some(end) = options.end_line {
            params.push(format!("endLine={}", end));
        }

        if options.format.as_deref() == Some("json") {
            params.push("format=json".to_string());
            let url = self.project_url(
                &project,
                &format!(
                    "_apis/build/builds/{}/logs/{}?{}",
                    run_id,
                    log_id,
                    params.join("&")
                ),
            );
            return self.get(&url).await;
        }

        let url = self.project_url(
            &project,
            &format!(
                "_apis/build/builds/{}/logs/{}?{}",
                run_id,
                log_id,
                params.join("&")
            ),
        );
        let text = self.get_text(&url).await.map_err(|e| match e {
            Error::NotFound(_) => Error::NotFound(format!(
                "Log {} not found for run {} in project {}",
                log_id, run_id, project
            )),
            other => other,
        })?;
        Ok(Value::String(text))
    }

    /// Queue a new run of a pipeline.
    pub async fn trigger_pipeline(
        &self,
        project: Option<&str>,
        pipeline_id: i64,
        options: &TriggerRunOptions,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;

        let mut body = Map::new();
        if let Some(branch) = options.branch.as_deref().and_then(normalize_branch) {
            body.insert(
                "resources".to_string(),
                json!({ "repositories": { "self": { "refName": branch } } }),
            );
        }
        if !options.template_parameters.is_empty() {
            body.insert(
                "templateParameters".to_string(),
                Value::Object(options.template_parameters.clone()),
            );
        }
        if !options.variables.is_empty() {
            body.insert(
                "variables".to_string(),
                Value::Object(options.variables.clone()),
            );
        }
        if !options.stages_to_skip.is_empty() {
            body.insert("stagesToSkip".to_string(), json!(options.stages_to_skip));
        }
        if options.preview_run {
            body.insert("previewRun".to_string(), Value::Bool(true));
        }

        let url = self.project_url(
            &project,
            &format!(
                "_apis/pipelines/{}/runs?api-version={}",
                pipeline_id, API_VERSION
            ),
        );
        self.post(&url, &Value::Object(body)).await
    }

    /// Find the pipeline a run belongs to, via the build definition when no
    /// id was provided. Lookup failures degrade to `None`; the caller's main
    /// request surfaces any real error.
    pub(crate) async fn resolve_pipeline_id(
        &self,
        project: &str,
        run_id: i64,
        provided: Option<i64>,
    ) -> Option<i64> {
        if provided.is_some() {
            return provided;
        }

        let url = self.project_url(
            project,
            &format!("_apis/build/builds/{}?api-version={}", run_id, API_VERSION),
        );
        match self.get::<Value>(&url).await {
            Ok(build) => coerce_id(build.get("definition").and_then(|d| d.get("id"))),
            Err(e) => {
                debug!(run_id = run_id, error = %e, "Could not resolve pipeline id from build");
                None
            }
        }
    }
}

/// Expand a bare branch name to a full ref.
fn normalize_branch(branch: &str) -> Option<String> {
    let trimmed = branch.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("refs/") {
        Some(trimmed.to_string())
    } else {
        Some(format!("refs/heads/{}", trimmed))
    }
}

/// Lowercased filter set; empty input means no filtering.
fn normalize_filter(values: &[String]) -> Option<HashSet<String>> {
    let set: HashSet<String> = values
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect();
    if set.is_empty() {
        None
    } else {
        Some(set)
    }
}

fn lowercase_field(record: &Value, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(|v| v.as_str())
        .map(|v| v.to_lowercase())
}

/// Identifiers arrive as numbers or numeric strings depending on the route.
pub(crate) fn coerce_id(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
