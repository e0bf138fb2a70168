//! Run artifact enrichment and single-file download.
//!
//! Build artifacts point at a file container through `resource.data`
//! (`#/4211/drop/...`): segment 1 is the container id, the rest the root
//! path. Container layouts vary by agent version, so item listing and
//! download try scope and path variants in order and take the first hit.

use azdo_core::{Error, Result};
use serde_json::{Map, Value};
use tracing::debug;

use crate::client::{AzureClient, ListEnvelope, API_VERSION, API_VERSION_CONTAINERS};

/// Item cap per artifact; larger listings are truncated.
const MAX_ITEMS_PER_ARTIFACT: usize = 200;

/// Options for downloading one file from a run artifact.
#[derive(Debug, Clone, Default)]
pub struct DownloadArtifactOptions {
    /// `<artifactName>/<path/to/file>` inside the artifact
    pub artifact_path: String,
    /// Pipeline id; resolved from the run's build definition when omitted
    pub pipeline_id: Option<i64>,
}

/// Container id and root path parsed from an artifact resource.
#[derive(Debug, Default, PartialEq)]
struct ContainerInfo {
    container_id: Option<i64>,
    root_path: Option<String>,
}

impl AzureClient {
    /// Summarize a run's artifacts, with container item listings attached
    /// where a container can be read. Every failure degrades to a smaller
    /// answer; this never fails the surrounding run lookup.
    pub(crate) async fn fetch_run_artifacts(
        &self,
        project: &str,
        run_id: i64,
        pipeline_id: Option<i64>,
    ) -> Vec<Value> {
        let url = self.project_url(
            project,
            &format!(
                "_apis/build/builds/{}/artifacts?api-version={}",
                run_id, API_VERSION
            ),
        );
        let artifacts = match self.get::<ListEnvelope<Value>>(&url).await {
            Ok(envelope) => envelope.value,
            Err(e) => {
                debug!(run_id = run_id, error = %e, "Could not list run artifacts");
                return Vec::new();
            }
        };

        let mut summaries: Vec<Value> = artifacts.iter().map(summarize_artifact).collect();

        if let Some(pipeline_id) = pipeline_id {
            for summary in summaries.iter_mut() {
                self.attach_signed_content(project, pipeline_id, run_id, summary)
                    .await;
            }
        }

        for summary in summaries.iter_mut() {
            let is_container = summary
                .get("type")
                .and_then(|t| t.as_str())
                .is_some_and(|t| t.eq_ignore_ascii_case("container"))
                || summary.get("containerId").is_some();
            if !is_container {
                continue;
            }

            if let Some((items, truncated)) = self.list_container_items(project, summary).await {
                if let Some(obj) = summary.as_object_mut() {
                    obj.insert("items".to_string(), Value::Array(items));
                    if truncated {
                        obj.insert("itemsTruncated".to_string(), Value::Bool(true));
                    }
                }
            }
        }

        summaries
    }

    /// Fetch one file out of a run artifact as text.
    ///
    /// Container artifacts are read through the container items route.
    /// Artifacts that only expose an archive download cannot be read file
    /// by file; those fail with the download URL in the error text.
    pub async fn download_pipeline_artifact(
        &self,
        project: Option<&str>,
        run_id: i64,
        options: &DownloadArtifactOptions,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;
        let (artifact_name, relative_path) = split_artifact_path(&options.artifact_path)?;

        let url = self.project_url(
            &project,
            &format!(
                "_apis/build/builds/{}/artifacts?api-version={}",
                run_id, API_VERSION
            ),
        );
        let envelope: ListEnvelope<Value> = self.get(&url).await?;
        let artifact = envelope
            .value
            .into_iter()
            .find(|a| a.get("name").and_then(|n| n.as_str()) == Some(artifact_name.as_str()))
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Artifact {} not found for run {} in project {}",
                    artifact_name, run_id, project
                ))
            })?;

        let info = container_info(artifact.get("resource"));
        if let Some(container_id) = info.container_id {
            let candidates = container_path_candidates(
                &artifact_name,
                info.root_path.as_deref(),
                &relative_path,
            );
            for candidate in &candidates {
                for scope in [Some(project.as_str()), None] {
                    match self
                        .fetch_container_item(container_id, scope, candidate)
                        .await?
                    {
                        Some(content) => {
                            let mut result = Map::new();
                            result.insert("artifact".to_string(), Value::String(artifact_name));
                            result.insert("path".to_string(), Value::String(candidate.clone()));
                            result.insert("content".to_string(), Value::String(content));
                            return Ok(Value::Object(result));
                        }
                        None => continue,
                    }
                }
            }
            return Err(Error::NotFound(format!(
                "File {} not found in artifact {}",
                relative_path, artifact_name
            )));
        }

        // No container behind this artifact; the best we can offer is its
        // archive download URL.
        let pipeline_id = self
            .resolve_pipeline_id(&project, run_id, options.pipeline_id)
            .await
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Unable to resolve the pipeline for artifact {}",
                    artifact_name
                ))
            })?;

        let details = self
            .pipeline_artifact_details(&project, pipeline_id, run_id, &artifact_name)
            .await?;
        let download_url = details
            .get("signedContent")
            .and_then(|c| c.get("url"))
            .and_then(|u| u.as_str())
            .or_else(|| {
                artifact
                    .get("resource")
                    .and_then(|r| r.get("downloadUrl"))
                    .and_then(|u| u.as_str())
            })
            .or_else(|| details.get("url").and_then(|u| u.as_str()))
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Artifact {} does not expose downloadable content",
                    artifact_name
                ))
            })?;

        Err(Error::Validation(format!(
            "Artifact {} only exposes an archive download; fetch it from {} and extract {} locally",
            artifact_name, download_url, relative_path
        )))
    }

    /// Best-effort signed download URL for a pipeline artifact.
    async fn attach_signed_content(
        &self,
        project: &str,
        pipeline_id: i64,
        run_id: i64,
        summary: &mut Value,
    ) {
        let Some(name) = summary.get("name").and_then(|n| n.as_str()) else {
            return;
        };
        match self
            .pipeline_artifact_details(project, pipeline_id, run_id, name)
            .await
        {
            Ok(details) => {
                let signed_url = details
                    .get("signedContent")
                    .and_then(|c| c.get("url"))
                    .and_then(|u| u.as_str());
                if let (Some(url), Some(obj)) = (signed_url, summary.as_object_mut()) {
                    obj.insert(
                        "signedContentUrl".to_string(),
                        Value::String(url.to_string()),
                    );
                }
            }
            Err(e) => {
                debug!(artifact = name, error = %e, "Could not fetch signed content");
            }
        }
    }

    async fn pipeline_artifact_details(
        &self,
        project: &str,
        pipeline_id: i64,
        run_id: i64,
        artifact_name: &str,
    ) -> Result<Value> {
        let url = self.project_url(
            project,
            &format!(
                "_apis/pipelines/{}/runs/{}/artifacts?artifactName={}&$expand=signedContent&api-version={}",
                pipeline_id,
                run_id,
                urlencoding::encode(artifact_name),
                API_VERSION
            ),
        );
        self.get(&url).await
    }

    /// List a container's items, trying scope and root-path variants until
    /// one returns a non-empty mapping. Individual misses are swallowed.
    async fn list_container_items(
        &self,
        project: &str,
        summary: &Value,
    ) -> Option<(Vec<Value>, bool)> {
        let container_id = summary.get("containerId").and_then(|c| c.as_i64())?;
        let name = summary.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let root_path = summary.get("rootPath").and_then(|r| r.as_str());

        let mut path_candidates: Vec<Option<&str>> = Vec::new();
        for candidate in [root_path, Some(name).filter(|n| !n.is_empty()), None] {
            if !path_candidates.contains(&candidate) {
                path_candidates.push(candidate);
            }
        }

        for scope in [Some(project), None] {
            for item_path in &path_candidates {
                let mut params = vec![format!("api-version={}", API_VERSION_CONTAINERS)];
                if let Some(path) = item_path {
                    params.push(format!("itemPath={}", urlencoding::encode(path)));
                }
                if let Some(scope) = scope {
                    params.push(format!("scope={}", urlencoding::encode(scope)));
                }
                let url = self.org_url(&format!(
                    "_apis/resources/Containers/{}?{}",
                    container_id,
                    params.join("&")
                ));

                let items = match self.get::<ListEnvelope<Value>>(&url).await {
                    Ok(envelope) => envelope.value,
                    Err(e) => {
                        debug!(container = container_id, error = %e, "Container listing miss");
                        continue;
                    }
                };
                if items.is_empty() {
                    continue;
                }

                let (mapped, truncated) = map_container_items(&items, name, root_path);
                if mapped.is_empty() {
                    continue;
                }
                return Some((mapped, truncated));
            }
        }

        None
    }

    /// Fetch one container item as text. `None` means a miss worth retrying
    /// with the next path variant; auth failures surface immediately.
    async fn fetch_container_item(
        &self,
        container_id: i64,
        scope: Option<&str>,
        item_path: &str,
    ) -> Result<Option<String>> {
        let mut params = vec![
            format!("api-version={}", API_VERSION_CONTAINERS),
            format!("itemPath={}", urlencoding::encode(item_path)),
        ];
        if let Some(scope) = scope {
            params.push(format!("scope={}", urlencoding::encode(scope)));
        }
        let url = self.org_url(&format!(
            "_apis/resources/Containers/{}?{}",
            container_id,
            params.join("&")
        ));

        let response = self
            .request(reqwest::Method::GET, &url)
            .header(reqwest::header::ACCEPT, "application/octet-stream")
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        match self.check_status(response).await {
            Ok(response) => {
                let content = response
                    .text()
                    .await
                    .map_err(|e| Error::Http(e.to_string()))?;
                Ok(Some(content))
            }
            Err(e @ (Error::Authentication(_) | Error::Permission(_))) => Err(e),
            Err(e) => {
                // Invalid path variants come back as 400 or 404; treat both
                // as a miss.
                debug!(container = container_id, path = item_path, error = %e, "Container item miss");
                Ok(None)
            }
        }
    }
}

/// Flatten a build artifact into the summary shape.
fn summarize_artifact(artifact: &Value) -> Value {
    let resource = artifact.get("resource");
    let info = container_info(resource);

    let mut summary = Map::new();
    summary.insert(
        "name".to_string(),
        Value::String(
            artifact
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or("unknown")
                .to_string(),
        ),
    );
    let optional = [
        ("type", resource.and_then(|r| r.get("type"))),
        ("source", artifact.get("source")),
        ("downloadUrl", resource.and_then(|r| r.get("downloadUrl"))),
        ("resourceUrl", resource.and_then(|r| r.get("url"))),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            if !value.is_null() {
                summary.insert(key.to_string(), value.clone());
            }
        }
    }
    if let Some(id) = info.container_id {
        summary.insert("containerId".to_string(), Value::from(id));
    }
    if let Some(root) = info.root_path {
        summary.insert("rootPath".to_string(), Value::String(root));
    }

    Value::Object(summary)
}

fn container_info(resource: Option<&Value>) -> ContainerInfo {
    let Some(data) = resource
        .and_then(|r| r.get("data"))
        .and_then(|d| d.as_str())
        .filter(|d| !d.is_empty())
    else {
        return ContainerInfo::default();
    };

    let segments: Vec<&str> = data.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return ContainerInfo::default();
    }
    let Ok(container_id) = segments[1].parse::<i64>() else {
        return ContainerInfo::default();
    };

    let root_path = segments[2..].join("/");
    ContainerInfo {
        container_id: Some(container_id),
        root_path: (!root_path.is_empty()).then_some(root_path),
    }
}

fn trim_separators(segment: &str) -> &str {
    segment.trim_matches(['/', '\\'])
}

fn normalize_full_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

/// Strip the longest matching prefix so item paths read relative to the
/// artifact. An exact prefix match collapses to the empty string.
fn make_relative_path(path: &str, prefixes: &[&str]) -> String {
    let normalized = normalize_full_path(path);
    let mut trimmed: Vec<&str> = prefixes
        .iter()
        .map(|p| trim_separators(p))
        .filter(|p| !p.is_empty())
        .collect();
    trimmed.sort_by_key(|p| std::cmp::Reverse(p.len()));

    for prefix in trimmed {
        if normalized == prefix {
            return String::new();
        }
        if let Some(rest) = normalized.strip_prefix(&format!("{}/", prefix)) {
            return rest.to_string();
        }
    }

    normalized
}

/// Map raw container items onto relative artifact paths: empties skipped,
/// duplicates dropped, sorted, capped.
fn map_container_items(
    items: &[Value],
    name: &str,
    root_path: Option<&str>,
) -> (Vec<Value>, bool) {
    let prefixes: Vec<&str> = [root_path, Some(name)]
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect();

    let mut seen = std::collections::HashSet::new();
    let mut mapped = Vec::new();
    let mut truncated = false;

    for item in items {
        let path = item.get("path").and_then(|p| p.as_str()).unwrap_or("");
        let relative = make_relative_path(path, &prefixes);
        if relative.is_empty() || !seen.insert(relative.clone()) {
            continue;
        }

        let item_type = match item.get("itemType").and_then(|t| t.as_str()) {
            Some("folder") => "folder",
            _ => "file",
        };
        let mut entry = Map::new();
        entry.insert("path".to_string(), Value::String(relative));
        entry.insert("itemType".to_string(), Value::String(item_type.to_string()));
        if let Some(size) = item.get("fileLength").and_then(|s| s.as_i64()) {
            entry.insert("size".to_string(), Value::from(size));
        }
        mapped.push(Value::Object(entry));

        if mapped.len() >= MAX_ITEMS_PER_ARTIFACT {
            truncated = true;
            break;
        }
    }

    mapped.sort_by(|a, b| {
        let a = a.get("path").and_then(|p| p.as_str()).unwrap_or("");
        let b = b.get("path").and_then(|p| p.as_str()).unwrap_or("");
        a.cmp(b)
    });

    (mapped, truncated)
}

/// Split `<artifactName>/<path/to/file>` into name and inner path.
fn split_artifact_path(artifact_path: &str) -> Result<(String, String)> {
    let mut segments = artifact_path
        .trim()
        .split(['/', '\\'])
        .filter(|s| !s.is_empty());

    let name = segments.next().ok_or_else(|| {
        Error::Validation(
            "Artifact path must include the artifact name and file path".to_string(),
        )
    })?;
    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() {
        return Err(Error::Validation(
            "Specify a file path inside the artifact (e.g. <artifact>/<path/to/file>)".to_string(),
        ));
    }

    Ok((name.to_string(), rest.join("/")))
}

fn join_path_parts(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| trim_separators(p))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Path variants a container may store a file under, most specific last.
fn container_path_candidates(
    name: &str,
    root_path: Option<&str>,
    relative_path: &str,
) -> Vec<String> {
    let relative = relative_path.trim_start_matches(['/', '\\']);
    let root = root_path.unwrap_or("");

    let mut candidates = Vec::new();
    for candidate in [
        relative.to_string(),
        join_path_parts(&[root, relative]),
        join_path_parts(&[name, relative]),
        join_path_parts(&[root, name, relative]),
        join_path_parts(&[name, root, relative]),
    ] {
        if !candidate.is_empty() && !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}
