//! Project listing and inspection.

use azdo_core::Result;
use serde_json::Value;

use crate::client::{AzureClient, ListEnvelope, API_VERSION};

/// Options for listing projects.
#[derive(Debug, Clone, Default)]
pub struct ListProjectsOptions {
    /// Filter on project state (`all`, `wellFormed`, `createPending`, ...)
    pub state_filter: Option<String>,
    /// Maximum number of projects to return
    pub top: Option<u32>,
    /// Number of projects to skip
    pub skip: Option<u32>,
    /// Continuation token from a previous page
    pub continuation_token: Option<String>,
}

/// Options for assembling comprehensive project details.
#[derive(Debug, Clone, Default)]
pub struct ProjectDetailsOptions {
    /// Attach the process template the project uses
    pub include_process: bool,
    /// Attach the process's work item types (requires `include_process`)
    pub include_work_item_types: bool,
    /// Attach per-type field definitions (requires `include_work_item_types`)
    pub include_fields: bool,
    /// Attach the project's teams
    pub include_teams: bool,
    /// Expand team identity information
    pub expand_team_identity: bool,
    /// Cap on the number of teams returned (default 100)
    pub max_teams: Option<u32>,
}

impl AzureClient {
    /// List the projects in the organization.
    pub async fn list_projects(&self, options: &ListProjectsOptions) -> Result<Vec<Value>> {
        let mut params = vec![format!("api-version={}", API_VERSION)];
        if let Some(filter) = &options.state_filter {
            params.push(format!("stateFilter={}", urlencoding::encode(filter)));
        }
        if let Some(top) = options.top {
            params.push(format!("$top={}", top));
        }
        if let Some(skip) = options.skip {
            params.push(format!("$skip={}", skip));
        }
        if let Some(token) = &options.continuation_token {
            params.push(format!("continuationToken={}", urlencoding::encode(token)));
        }

        let url = self.org_url(&format!("_apis/projects?{}", params.join("&")));
        let envelope: ListEnvelope<Value> = self.get(&url).await?;
        Ok(envelope.value)
    }

    /// Get a single project by name or id.
    pub async fn get_project(&self, project: Option<&str>) -> Result<Value> {
        let project = self.project_or_default(project)?;
        let url = self.org_url(&format!(
            "_apis/projects/{}?api-version={}",
            urlencoding::encode(&project),
            API_VERSION
        ));
        self.get(&url).await
    }

    /// Get a project with its process, work item types, and teams attached.
    pub async fn get_project_details(
        &self,
        project: Option<&str>,
        options: &ProjectDetailsOptions,
    ) -> Result<Value> {
        let project = self.project_or_default(project)?;

        let url = self.org_url(&format!(
            "_apis/projects/{}?includeCapabilities=true&api-version={}",
            urlencoding::encode(&project),
            API_VERSION
        ));
        let mut details: Value = self.get(&url).await?;

        if options.include_process {
            let process = self.assemble_process(&project, &details, options).await?;
            if let (Some(obj), Some(process)) = (details.as_object_mut(), process) {
                obj.insert("process".to_string(), process);
            }
        }

        if options.include_teams {
            let teams = self.project_teams(&project, options).await?;
            if let Some(obj) = details.as_object_mut() {
                obj.insert("teams".to_string(), Value::Array(teams));
            }
        }

        Ok(details)
    }

    /// Build the `process` section from the project's capabilities.
    async fn assemble_process(
        &self,
        project: &str,
        details: &Value,
        options: &ProjectDetailsOptions,
    ) -> Result<Option<Value>> {
        let Some(template) = details
            .get("capabilities")
            .and_then(|c| c.get("processTemplate"))
        else {
            return Ok(None);
        };

        let mut process = serde_json::json!({
            "id": template.get("templateTypeId").cloned().unwrap_or(Value::Null),
            "name": template.get("templateName").cloned().unwrap_or(Value::Null),
        });

        if options.include_work_item_types {
            let url = self.project_url(
                project,
                &format!("_apis/wit/workitemtypes?api-version={}", API_VERSION),
            );
            let envelope: ListEnvelope<Value> = self.get(&url).await?;
            let mut types = envelope.value;

            if options.include_fields {
                for wit in types.iter_mut() {
                    let Some(name) = wit.get("name").and_then(|n| n.as_str()) else {
                        continue;
                    };
                    let url = self.project_url(
                        project,
                        &format!(
                            "_apis/wit/workitemtypes/{}/fields?api-version={}",
                            urlencoding::encode(name),
                            API_VERSION
                        ),
                    );
                    let fields: ListEnvelope<Value> = self.get(&url).await?;
                    if let Some(obj) = wit.as_object_mut() {
                        obj.insert("fields".to_string(), Value::Array(fields.value));
                    }
                }
            }

            if let Some(obj) = process.as_object_mut() {
                obj.insert("workItemTypes".to_string(), Value::Array(types));
            }
        }

        Ok(Some(process))
    }

    /// Fetch the project's teams.
    async fn project_teams(
        &self,
        project: &str,
        options: &ProjectDetailsOptions,
    ) -> Result<Vec<Value>> {
        let mut params = vec![
            format!("$top={}", options.max_teams.unwrap_or(100)),
            format!("api-version={}", API_VERSION),
        ];
        if options.expand_team_identity {
            params.push("$expandIdentity=true".to_string());
        }

        let url = self.org_url(&format!(
            "_apis/projects/{}/teams?{}",
            urlencoding::encode(project),
            params.join("&")
        ));
        let envelope: ListEnvelope<Value> = self.get(&url).await?;
        Ok(envelope.value)
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
    async fn test_list_projects_unwraps_envelope() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/_apis/projects")
                .query_param("stateFilter", "wellFormed")
                .query_param("$top", "2");
            then.status(200).json_body(serde_json::json!({
                "count": 2,
                "value": [
                    {"id": "p1", "name": "Widgets", "state": "wellFormed"},
                    {"id": "p2", "name": "Gadgets", "state": "wellFormed"}
                ]
            }));
        });

        let client = test_client(&server);
        let projects = client
            .list_projects(&ListProjectsOptions {
                state_filter: Some("wellFormed".to_string()),
                top: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0]["name"], "Widgets");
    }

    #[tokio::test]
    async fn test_get_project_uses_default() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET).path("/acme/_apis/projects/widgets");
            then.status(200)
                .json_body(serde_json::json!({"id": "p1", "name": "widgets"}));
        });

        let client = test_client(&server);
        let project = client.get_project(None).await.unwrap();
        assert_eq!(project["id"], "p1");
    }

    #[tokio::test]
    async fn test_get_project_details_assembles_sections() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/_apis/projects/widgets")
                .query_param("includeCapabilities", "true");
            then.status(200).json_body(serde_json::json!({
                "id": "p1",
                "name": "widgets",
                "capabilities": {
                    "processTemplate": {
                        "templateName": "Agile",
                        "templateTypeId": "adcc42ab-9882-485e-a3ed-7678f01f66bc"
                    }
                }
            }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/_apis/wit/workitemtypes");
            then.status(200).json_body(serde_json::json!({
                "count": 1,
                "value": [{"name": "Bug", "referenceName": "Microsoft.VSTS.WorkItemTypes.Bug"}]
            }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/_apis/wit/workitemtypes/Bug/fields");
            then.status(200).json_body(serde_json::json!({
                "count": 1,
                "value": [{"name": "Title", "referenceName": "System.Title"}]
            }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/acme/_apis/projects/widgets/teams")
                .query_param("$top", "100");
            then.status(200).json_body(serde_json::json!({
                "count": 1,
                "value": [{"id": "t1", "name": "Widgets Team"}]
            }));
        });

        let client = test_client(&server);
        let details = client
            .get_project_details(
                Some("widgets"),
                &ProjectDetailsOptions {
                    include_process: true,
                    include_work_item_types: true,
                    include_fields: true,
                    include_teams: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(details["process"]["name"], "Agile");
        assert_eq!(details["process"]["workItemTypes"][0]["name"], "Bug");
        assert_eq!(
            details["process"]["workItemTypes"][0]["fields"][0]["referenceName"],
            "System.Title"
        );
        assert_eq!(details["teams"][0]["name"], "Widgets Team");
    }

    #[tokio::test]
    async fn test_get_project_details_not_found() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET).path("/acme/_apis/projects/nope");
            then.status(404).body("Project does not exist");
        });

        let client = test_client(&server);
        let err = client
            .get_project_details(Some("nope"), &ProjectDetailsOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, azdo_core::Error::NotFound(_)));
    }
}
