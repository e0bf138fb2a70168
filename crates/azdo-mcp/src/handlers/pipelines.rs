//! Pipeline tools: definitions, runs, timelines, logs, artifacts, triggering.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use azdo_client::{
    AzureClient, DownloadArtifactOptions, ListPipelinesOptions, ListRunsOptions,
    PipelineLogOptions, TimelineOptions, TriggerRunOptions,
};
use azdo_core::Error;

use super::{organization_description, parse_args, project_description, tool, ToolOutput, ToolSet};
use crate::protocol::ToolDefinition;

pub struct PipelineTools {
    client: Arc<AzureClient>,
}

impl PipelineTools {
    pub fn new(client: Arc<AzureClient>) -> Self {
        Self { client }
    }
}

/// Filter values that arrive as either one string or an array of strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringOrList::One(value) => vec![value],
            StringOrList::Many(values) => values,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPipelinesArgs {
    project_id: Option<String>,
    order_by: Option<String>,
    top: Option<u32>,
    continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetPipelineArgs {
    project_id: Option<String>,
    pipeline_id: i64,
    pipeline_version: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListRunsArgs {
    project_id: Option<String>,
    pipeline_id: i64,
    top: Option<u32>,
    continuation_token: Option<String>,
    branch: Option<String>,
    state: Option<String>,
    result: Option<String>,
    created_from: Option<String>,
    created_to: Option<String>,
    order_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetRunArgs {
    project_id: Option<String>,
    run_id: i64,
    pipeline_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadArtifactArgs {
    project_id: Option<String>,
    run_id: i64,
    artifact_path: String,
    pipeline_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimelineArgs {
    project_id: Option<String>,
    run_id: i64,
    timeline_id: Option<String>,
    state: Option<StringOrList>,
    result: Option<StringOrList>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetLogArgs {
    project_id: Option<String>,
    run_id: i64,
    log_id: i64,
    format: Option<String>,
    start_line: Option<u32>,
    end_line: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerPipelineArgs {
    project_id: Option<String>,
    pipeline_id: i64,
    branch: Option<String>,
    #[serde(default)]
    template_parameters: Map<String, Value>,
    #[serde(default)]
    variables: Map<String, Value>,
    #[serde(default)]
    stages_to_skip: Vec<String>,
    #[serde(default)]
    preview_run: bool,
}

#[async_trait]
impl ToolSet for PipelineTools {
    fn name(&self) -> &'static str {
        "pipelines"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        let project = project_description(&self.client);
        let organization = organization_description(&self.client);
        vec![
            tool(
                "list_pipelines",
                "List pipelines in a project",
                json!({
                    "type": "object",
                    "properties": {
                        "organizationId": {
                            "type": "string",
                            "description": organization
                        },
                        "projectId": {
                            "type": "string",
                            "description": project
                        },
                        "orderBy": {
                            "type": "string",
                            "description": "Sort expression (e.g., \"name asc\")"
                        },
                        "top": {
                            "type": "integer",
                            "description": "Maximum number of pipelines to return"
                        },
                        "continuationToken": {
                            "type": "string",
                            "description": "Continuation token from a previous page of results"
                        }
                    }
                }),
            ),
            tool(
                "get_pipeline",
                "Get details of a specific pipeline",
                json!({
                    "type": "object",
                    "properties": {
                        "organizationId": {
                            "type": "string",
                            "description": organization
                        },
                        "projectId": {
                            "type": "string",
                            "description": project
                        },
                        "pipelineId": {
                            "type": "integer",
                            "description": "The numeric ID of the pipeline to retrieve"
                        },
                        "pipelineVersion": {
                            "type": "integer",
                            "description": "The version of the pipeline to retrieve (latest if not specified)"
                        }
                    },
                    "required": ["pipelineId"]
                }),
            ),
            tool(
                "list_pipeline_runs",
                "List recent runs for a pipeline",
                json!({
                    "type": "object",
                    "properties": {
                        "projectId": {
                            "type": "string",
                            "description": project
                        },
                        "pipelineId": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Pipeline numeric ID"
                        },
                        "top": {
                            "type": "integer",
                            "minimum": 1,
                            "maximum": 100,
                            "default": 50,
                            "description": "Maximum number of runs to return (1-100)"
                        },
                        "continuationToken": {
                            "type": "string",
                            "description": "Continuation token for pagination"
                        },
                        "branch": {
                            "type": "string",
                            "description": "Branch to filter by (e.g., \"main\" or \"refs/heads/main\")"
                        },
                        "state": {
                            "type": "string",
                            "enum": ["notStarted", "inProgress", "completed", "cancelling", "postponed"],
                            "description": "Filter by current run state"
                        },
                        "result": {
                            "type": "string",
                            "enum": ["succeeded", "partiallySucceeded", "failed", "canceled", "none"],
                            "description": "Filter by final run result"
                        },
                        "createdFrom": {
                            "type": "string",
                            "description": "Filter runs created at or after this time (ISO 8601)"
                        },
                        "createdTo": {
                            "type": "string",
                            "description": "Filter runs created at or before this time (ISO 8601)"
                        },
                        "orderBy": {
                            "type": "string",
                            "enum": ["createdDate desc", "createdDate asc"],
                            "default": "createdDate desc",
                            "description": "Sort order for run creation date"
                        }
                    },
                    "required": ["pipelineId"]
                }),
            ),
            tool(
                "get_pipeline_run",
                "Get details for a specific pipeline run",
                json!({
                    "type": "object",
                    "properties": {
                        "projectId": {
                            "type": "string",
                            "description": project
                        },
                        "runId": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Pipeline run identifier"
                        },
                        "pipelineId": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Optional guard; validates the run belongs to this pipeline"
                        }
                    },
                    "required": ["runId"]
                }),
            ),
            tool(
                "download_pipeline_artifact",
                "Download a file from a pipeline run artifact and return its textual content",
                json!({
                    "type": "object",
                    "properties": {
                        "projectId": {
                            "type": "string",
                            "description": project
                        },
                        "runId": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Pipeline run identifier"
                        },
                        "artifactPath": {
                            "type": "string",
                            "description": "Path to the desired file inside the artifact (format: <artifactName>/<path/to/file>)"
                        },
                        "pipelineId": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Optional guard; validates the run belongs to this pipeline"
                        }
                    },
                    "required": ["runId", "artifactPath"]
                }),
            ),
            tool(
                "pipeline_timeline",
                "Retrieve the timeline of stages and jobs for a pipeline run, to reduce the amount of data returned, you can filter by state and result",
                json!({
                    "type": "object",
                    "properties": {
                        "projectId": {
                            "type": "string",
                            "description": project
                        },
                        "runId": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Run identifier"
                        },
                        "timelineId": {
                            "type": "string",
                            "description": "Optional timeline identifier to select a specific timeline record"
                        },
                        "state": {
                            "anyOf": [
                                { "type": "string" },
                                { "type": "array", "items": { "type": "string" } }
                            ],
                            "description": "Optional state filter (single value or array) applied to returned timeline records (pending, inProgress, completed)"
                        },
                        "result": {
                            "anyOf": [
                                { "type": "string" },
                                { "type": "array", "items": { "type": "string" } }
                            ],
                            "description": "Optional result filter (single value or array) applied to returned timeline records (succeeded, succeededWithIssues, failed, canceled, skipped, abandoned)"
                        }
                    },
                    "required": ["runId"]
                }),
            ),
            tool(
                "get_pipeline_log",
                "Retrieve a specific pipeline log using the timeline log identifier",
                json!({
                    "type": "object",
                    "properties": {
                        "projectId": {
                            "type": "string",
                            "description": project
                        },
                        "runId": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Run identifier"
                        },
                        "logId": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Log identifier from the timeline record"
                        },
                        "format": {
                            "type": "string",
                            "enum": ["plain", "json"],
                            "description": "Optional format for the log contents (plain or json)"
                        },
                        "startLine": {
                            "type": "integer",
                            "minimum": 0,
                            "description": "Optional starting line number for the log segment"
                        },
                        "endLine": {
                            "type": "integer",
                            "minimum": 0,
                            "description": "Optional ending line number for the log segment"
                        }
                    },
                    "required": ["runId", "logId"]
                }),
            ),
            tool(
                "trigger_pipeline",
                "Trigger a pipeline run",
                json!({
                    "type": "object",
                    "properties": {
                        "organizationId": {
                            "type": "string",
                            "description": organization
                        },
                        "projectId": {
                            "type": "string",
                            "description": project
                        },
                        "pipelineId": {
                            "type": "integer",
                            "description": "The numeric ID of the pipeline to trigger"
                        },
                        "branch": {
                            "type": "string",
                            "description": "The branch to run the pipeline on (e.g., \"main\")"
                        },
                        "variables": {
                            "type": "object",
                            "description": "Runtime variables, mapping name to { value, isSecret }"
                        },
                        "templateParameters": {
                            "type": "object",
                            "description": "Parameters to pass to the pipeline template"
                        },
                        "stagesToSkip": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Stages to skip in the pipeline run"
                        },
                        "previewRun": {
                            "type": "boolean",
                            "description": "Validate and expand the final YAML without queuing a run"
                        }
                    },
                    "required": ["pipelineId"]
                }),
            ),
        ]
    }

    fn owns(&self, tool: &str) -> bool {
        matches!(
            tool,
            "list_pipelines"
                | "get_pipeline"
                | "list_pipeline_runs"
                | "get_pipeline_run"
                | "download_pipeline_artifact"
                | "pipeline_timeline"
                | "get_pipeline_log"
                | "trigger_pipeline"
        )
    }

    async fn call(&self, tool: &str, args: Value) -> azdo_core::Result<ToolOutput> {
        match tool {
            "list_pipelines" => {
                let args: ListPipelinesArgs = parse_args(tool, args)?;
                let pipelines = self
                    .client
                    .list_pipelines(
                        args.project_id.as_deref(),
                        &ListPipelinesOptions {
                            order_by: args.order_by,
                            top: args.top,
                            continuation_token: args.continuation_token,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(Value::Array(pipelines)))
            }
            "get_pipeline" => {
                let args: GetPipelineArgs = parse_args(tool, args)?;
                let pipeline = self
                    .client
                    .get_pipeline(
                        args.project_id.as_deref(),
                        args.pipeline_id,
                        args.pipeline_version,
                    )
                    .await?;
                Ok(ToolOutput::Json(pipeline))
            }
            "list_pipeline_runs" => {
                let args: ListRunsArgs = parse_args(tool, args)?;
                let runs = self
                    .client
                    .list_pipeline_runs(
                        args.project_id.as_deref(),
                        args.pipeline_id,
                        &ListRunsOptions {
                            top: args.top,
                            continuation_token: args.continuation_token,
                            branch: args.branch,
                            state: args.state,
                            result: args.result,
                            created_from: args.created_from,
                            created_to: args.created_to,
                            order_by: args.order_by,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(runs))
            }
            "get_pipeline_run" => {
                let args: GetRunArgs = parse_args(tool, args)?;
                let run = self
                    .client
                    .get_pipeline_run(args.project_id.as_deref(), args.run_id, args.pipeline_id)
                    .await?;
                Ok(ToolOutput::Json(run))
            }
            "download_pipeline_artifact" => {
                let args: DownloadArtifactArgs = parse_args(tool, args)?;
                let content = self
                    .client
                    .download_pipeline_artifact(
                        args.project_id.as_deref(),
                        args.run_id,
                        &DownloadArtifactOptions {
                            artifact_path: args.artifact_path,
                            pipeline_id: args.pipeline_id,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(content))
            }
            "pipeline_timeline" => {
                let args: TimelineArgs = parse_args(tool, args)?;
                let timeline = self
                    .client
                    .pipeline_timeline(
                        args.project_id.as_deref(),
                        args.run_id,
                        &TimelineOptions {
                            timeline_id: args.timeline_id,
                            states: args.state.map(StringOrList::into_vec).unwrap_or_default(),
                            results: args.result.map(StringOrList::into_vec).unwrap_or_default(),
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(timeline))
            }
            "get_pipeline_log" => {
                let args: GetLogArgs = parse_args(tool, args)?;
                let log = self
                    .client
                    .get_pipeline_log(
                        args.project_id.as_deref(),
                        args.run_id,
                        args.log_id,
                        &PipelineLogOptions {
                            format: args.format,
                            start_line: args.start_line,
                            end_line: args.end_line,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(log))
            }
            "trigger_pipeline" => {
                let args: TriggerPipelineArgs = parse_args(tool, args)?;
                let run = self
                    .client
                    .trigger_pipeline(
                        args.project_id.as_deref(),
                        args.pipeline_id,
                        &TriggerRunOptions {
                            branch: args.branch,
                            template_parameters: args.template_parameters,
                            variables: args.variables,
                            stages_to_skip: args.stages_to_skip,
                            preview_run: args.preview_run,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(run))
            }
            other => Err(Error::Validation(format!("Unknown tool: {}", other))),
        }
    }
}
