//! Work items: WIQL queries, CRUD via JSON-Patch, and typed links.

use azdo_core::{Error, Result};
use serde_json::{json, Value};

use crate::client::{AzureClient, ListEnvelope, PatchOp, API_VERSION};

/// The ids endpoint rejects batches past this size.
const MAX_WORK_ITEM_BATCH: usize = 200;

const EXPAND_LEVELS: [&str; 5] = ["none", "relations", "fields", "links", "all"];

/// Filters for listing work items.
///
/// `wiql` takes precedence over `query_id`; with neither, recently changed
/// items of the project are returned.
#[derive(Debug, Clone, Default)]
pub struct ListWorkItemsOptions {
    /// Team to scope the query to
    pub team_id: Option<String>,
    /// Id of a saved work item query
    pub query_id: Option<String>,
    /// WIQL query text
    pub wiql: Option<String>,
    /// Maximum number of work items to return
    pub top: Option<u32>,
    /// Number of work items to skip
    pub skip: Option<u32>,
}

/// Fields for a new work item.
#[derive(Debug, Clone, Default)]
pub struct CreateWorkItemOptions {
    /// Work item type, e.g. "Task" or "Bug"
    pub work_item_type: String,
    /// Title (required)
    pub title: String,
    /// Description, HTML for multi-line fields
    pub description: Option<String>,
    /// Assignee email or display name
    pub assigned_to: Option<String>,
    /// Area path
    pub area_path: Option<String>,
    /// Iteration path
    pub iteration_path: Option<String>,
    /// Priority
    pub priority: Option<i64>,
    /// Parent work item to link via hierarchy
    pub parent_id: Option<i64>,
    /// Extra fields by reference name, e.g. "System.Tags"
    pub additional_fields: serde_json::Map<String, Value>,
}

/// Field updates for an existing work item. All fields optional, at least
/// one must be set.
#[derive(Debug, Clone, Default)]
pub struct UpdateWorkItemOptions {
    /// New title
    pub title: Option<String>,
    /// New description, HTML for multi-line fields
    pub description: Option<String>,
    /// New assignee email or display name
    pub assigned_to: Option<String>,
    /// New area path
    pub area_path: Option<String>,
    /// New iteration path
    pub iteration_path: Option<String>,
    /// New priority
    pub priority: Option<i64>,
    /// New state, e.g. "Active" or "Closed"
    pub state: Option<String>,
    /// Extra fields by reference name
    pub additional_fields: serde_json::Map<String, Value>,
}

/// What to do with a link between two work items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOperation {
    /// Add a relation of the given type
    Add,
    /// Remove the relation of the given type
    Remove,
    /// Replace the relation's type with a new one
    Update { new_relation_type: String },
}

impl AzureClient {
    /// List work items via WIQL text, a saved query, or the project default.
    pub async fn list_work_items(
        &self,
        project: Option<&str>,
        options: &ListWorkItemsOptions,
    ) -> Result<Vec<Value>> {
        let project = self.project_or_default(project)?;
        let result = self.run_wiql(&project, options).await?;

        let refs = result
            .get("workItems")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let skip = options.skip.unwrap_or(0) as usize;
        let take = options
            .top
            .map(|t| t as usize)
            .unwrap_or(MAX_WORK_ITEM_BATCH)
            .min(MAX_WORK_ITEM_BATCH);

        let ids: Vec<String> = refs
            .iter()
            .skip(skip)
            .take(take)
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .map(|id| id.to_string())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.org_url(&format!(
            "_apis/wit/workitems?ids={}&$expand=fields&api-version={}",
            ids.join(","),
            API_VERSION
        ));
        let envelope: ListEnvelope<Value> = self.get(&url).await?;
        Ok(envelope.value)
    }

    async fn run_wiql(&self, project: &str, options: &ListWorkItemsOptions) -> Result<Value> {
        let team_prefix = options
            .team_id
            .as_deref()
            .map(|team| format!("{}/", urlencoding::encode(team)))
            .unwrap_or_default();

        if options.wiql.is_none() {
            if let Some(query_id) = &options.query_id {
                let url = self.project_url(
                    project,
                    &format!(
                        "{}_apis/wit/wiql/{}?api-version={}",
                        team_prefix,
                        urlencoding::encode(query_id),
                        API_VERSION
                    ),
                );
                return self.get(&url).await;
            }
        }

        let query = options.wiql.clone().unwrap_or_else(|| {
            "SELECT [System.Id] FROM workitems WHERE [System.TeamProject] = @project \
             ORDER BY [System.ChangedDate] DESC"
                .to_string()
        });
        let url = self.project_url(
            project,
            &format!("{}_apis/wit/wiql?api-version={}", team_prefix, API_VERSION),
        );
        self.post(&url, &json!({ "query": query })).await
    }

    /// Get a work item by id. `expand` defaults to `all`.
    pub async fn get_work_item(&self, work_item_id: i64, expand: Option<&str>) -> Result<Value> {
        let expand = expand.unwrap_or("all").to_lowercase();
        if !EXPAND_LEVELS.contains(&expand.as_str()) {
            return Err(Error::Validation(format!(
                "Invalid expand level: {}. Valid values are: {}",
                expand,
                EXPAND_LEVELS.join(", ")
            )));
        }

        let url = self.org_url(&format!(
            "_apis/wit/workitems/{}?$expand={}&api-version={}",
            work_item_id, expand, API_VERSION
        ));
        self.get(&url).await
    }

    /// Create a work item of the given type.
    pub async fn create_work_item(
        &self,
        project: Option<&str>,
        options: &CreateWorkItemOptions,
    ) -> Result<Value> {
        if options.work_item_type.is_empty() {
            return Err(Error::Validation("Work item type is required".to_string()));
        }
        if options.title.is_empty() {
            return Err(Error::Validation("Title is required".to_string()));
        }

        let project = self.project_or_default(project)?;
        let mut document = vec![field_op("System.Title", json!(options.title))];
        if let Some(description) = &options.description {
            document.push(field_op("System.Description", json!(description)));
        }
        if let Some(assigned_to) = &options.assigned_to {
            document.push(field_op("System.AssignedTo", json!(assigned_to)));
        }
        if let Some(area_path) = &options.area_path {
            document.push(field_op("System.AreaPath", json!(area_path)));
        }
        if let Some(iteration_path) = &options.iteration_path {
            document.push(field_op("System.IterationPath", json!(iteration_path)));
        }
        if let Some(priority) = options.priority {
            document.push(field_op("Microsoft.VSTS.Common.Priority", json!(priority)));
        }
        for (field, value) in &options.additional_fields {
            document.push(field_op(field, value.clone()));
        }
        if let Some(parent_id) = options.parent_id {
            let parent_url = self.org_url(&format!("_apis/wit/workItems/{}", parent_id));
            document.push(PatchOp::add(
                "/relations/-",
                json!({
                    "rel": "System.LinkTypes.Hierarchy-Reverse",
                    "url": parent_url,
                }),
            ));
        }

        let url = self.project_url(
            &project,
            &format!(
                "_apis/wit/workitems/${}?api-version={}",
                urlencoding::encode(&options.work_item_type),
                API_VERSION
            ),
        );
        self.post_document(&url, &document).await
    }

    /// Update fields on an existing work item.
    pub async fn update_work_item(
        &self,
        work_item_id: i64,
        options: &UpdateWorkItemOptions,
    ) -> Result<Value> {
        let mut document = Vec::new();
        if let Some(title) = &options.title {
            document.push(field_op("System.Title", json!(title)));
        }
        if let Some(description) = &options.description {
            document.push(field_op("System.Description", json!(description)));
        }
        if let Some(assigned_to) = &options.assigned_to {
            document.push(field_op("System.AssignedTo", json!(assigned_to)));
        }
        if let Some(area_path) = &options.area_path {
            document.push(field_op("System.AreaPath", json!(area_path)));
        }
        if let Some(iteration_path) = &options.iteration_path {
            document.push(field_op("System.IterationPath", json!(iteration_path)));
        }
        if let Some(priority) = options.priority {
            document.push(field_op("Microsoft.VSTS.Common.Priority", json!(priority)));
        }
        if let Some(state) = &options.state {
            document.push(field_op("System.State", json!(state)));
        }
        for (field, value) in &options.additional_fields {
            document.push(field_op(field, value.clone()));
        }
        if document.is_empty() {
            return Err(Error::Validation(
                "At least one field must be provided to update".to_string(),
            ));
        }

        let url = self.org_url(&format!(
            "_apis/wit/workitems/{}?api-version={}",
            work_item_id, API_VERSION
        ));
        self.patch_document(&url, &document).await
    }

    /// Add, remove, or retype a link between two work items.
    pub async fn manage_work_item_link(
        &self,
        project: Option<&str>,
        source_work_item_id: i64,
        target_work_item_id: i64,
        relation_type: &str,
        operation: &LinkOperation,
        comment: Option<&str>,
    ) -> Result<Value> {
        if relation_type.is_empty() {
            return Err(Error::Validation("Relation type is required".to_string()));
        }
        let project = self.project_or_default(project)?;
        let target_url = self.org_url(&format!("_apis/wit/workItems/{}", target_work_item_id));

        let mut document = Vec::new();
        match operation {
            LinkOperation::Add => {
                document.push(relation_add(relation_type, &target_url, comment));
            }
            LinkOperation::Remove => {
                let index = self
                    .relation_index(source_work_item_id, target_work_item_id, relation_type)
                    .await?;
                document.push(PatchOp::remove(format!("/relations/{}", index)));
            }
            LinkOperation::Update { new_relation_type } => {
                let index = self
                    .relation_index(source_work_item_id, target_work_item_id, relation_type)
                    .await?;
                document.push(PatchOp::remove(format!("/relations/{}", index)));
                document.push(relation_add(new_relation_type, &target_url, comment));
            }
        }

        let url = self.project_url(
            &project,
            &format!(
                "_apis/wit/workitems/{}?api-version={}",
                source_work_item_id, API_VERSION
            ),
        );
        self.patch_document(&url, &document).await
    }

    /// Index of the relation pointing at the target, for remove/update ops.
    async fn relation_index(
        &self,
        source_work_item_id: i64,
        target_work_item_id: i64,
        relation_type: &str,
    ) -> Result<usize> {
        let source = self
            .get_work_item(source_work_item_id, Some("relations"))
            .await?;
        let target_suffix = format!("/{}", target_work_item_id);
        source
            .get("relations")
            .and_then(Value::as_array)
            .and_then(|relations| {
                relations.iter().position(|rel| {
                    rel.get("rel").and_then(Value::as_str) == Some(relation_type)
                        && rel
                            .get("url")
                            .and_then(Value::as_str)
                            .is_some_and(|url| url.ends_with(&target_suffix))
                })
            })
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "No relation of type '{}' found between work items {} and {}",
                    relation_type, source_work_item_id, target_work_item_id
                ))
            })
    }
}

fn field_op(field: &str, value: Value) -> PatchOp {
    PatchOp::add(format!("/fields/{}", field), value)
}

fn relation_add(relation_type: &str, target_url: &str, comment: Option<&str>) -> PatchOp {
    PatchOp::add(
        "/relations/-",
        json!({
            "rel": relation_type,
            "url": target_url,
            "attributes": { "comment": comment.unwrap_or_default() },
        }),
    )
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
    async fn test_list_work_items_default_wiql_and_paging() {
        let server = MockServer::start();

        let wiql_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/acme/widgets/_apis/wit/wiql")
                .body_includes("[System.TeamProject] = @project");
            then.status(200).json_body(serde_json::json!({
                "workItems": [{"id": 1}, {"id": 2}, {"id": 3}]
            }));
        });
        let batch_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/acme/_apis/wit/workitems")
                .query_param("ids", "2,3");
            then.status(200).json_body(serde_json::json!({
                "count": 2,
                "value": [
                    {"id": 2, "fields": {"System.Title": "Two"}},
                    {"id": 3, "fields": {"System.Title": "Three"}}
                ]
            }));
        });

        let client = test_client(&server);
        let items = client
            .list_work_items(
                None,
                &ListWorkItemsOptions {
                    top: Some(2),
                    skip: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        wiql_mock.assert();
        batch_mock.assert();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["fields"]["System.Title"], "Two");
    }

    #[tokio::test]
    async fn test_list_work_items_saved_query_team_scope() {
        let server = MockServer::start();

        let query_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/acme/widgets/platform/_apis/wit/wiql/q-123");
            then.status(200)
                .json_body(serde_json::json!({"workItems": [{"id": 5}]}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/acme/_apis/wit/workitems");
            then.status(200).json_body(serde_json::json!({
                "count": 1,
                "value": [{"id": 5, "fields": {}}]
            }));
        });

        let client = test_client(&server);
        let items = client
            .list_work_items(
                None,
                &ListWorkItemsOptions {
                    team_id: Some("platform".to_string()),
                    query_id: Some("q-123".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        query_mock.assert();
        assert_eq!(items[0]["id"], 5);
    }

    #[tokio::test]
    async fn test_list_work_items_empty_query_skips_batch() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(POST).path("/acme/widgets/_apis/wit/wiql");
            then.status(200)
                .json_body(serde_json::json!({"workItems": []}));
        });

        let client = test_client(&server);
        let items = client
            .list_work_items(None, &ListWorkItemsOptions::default())
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_get_work_item_expand_default() {
        let server = MockServer::start();

        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/acme/_apis/wit/workitems/7")
                .query_param("$expand", "all");
            then.status(200)
                .json_body(serde_json::json!({"id": 7, "fields": {}}));
        });

        let client = test_client(&server);
        let item = client.get_work_item(7, None).await.unwrap();

        mock.assert();
        assert_eq!(item["id"], 7);
    }

    #[tokio::test]
    async fn test_get_work_item_rejects_bad_expand() {
        let server = MockServer::start();
        let client = test_client(&server);
        let err = client.get_work_item(7, Some("everything")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_work_item_patch_document() {
        let server = MockServer::start();

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/acme/widgets/_apis/wit/workitems/$Task")
                .header("content-type", "application/json-patch+json")
                .body_includes("\"/fields/System.Title\"")
                .body_includes("\"/fields/Microsoft.VSTS.Common.Priority\"")
                .body_includes("\"/fields/System.Tags\"")
                .body_includes("Hierarchy-Reverse");
            then.status(200).json_body(serde_json::json!({
                "id": 42,
                "fields": {"System.Title": "New task"}
            }));
        });

        let client = test_client(&server);
        let mut additional_fields = serde_json::Map::new();
        additional_fields.insert("System.Tags".to_string(), serde_json::json!("infra"));
        let item = client
            .create_work_item(
                None,
                &CreateWorkItemOptions {
                    work_item_type: "Task".to_string(),
                    title: "New task".to_string(),
                    priority: Some(2),
                    parent_id: Some(7),
                    additional_fields,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(item["id"], 42);
    }

    #[tokio::test]
    async fn test_create_work_item_requires_title() {
        let server = MockServer::start();
        let client = test_client(&server);
        let err = client
            .create_work_item(
                None,
                &CreateWorkItemOptions {
                    work_item_type: "Task".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_work_item_state_field() {
        let server = MockServer::start();

        let mock = server.mock(|when, then| {
            when.method(PATCH)
                .path("/acme/_apis/wit/workitems/7")
                .header("content-type", "application/json-patch+json")
                .body_includes("\"/fields/System.State\"")
                .body_includes("Closed");
            then.status(200).json_body(serde_json::json!({
                "id": 7,
                "fields": {"System.State": "Closed"}
            }));
        });

        let client = test_client(&server);
        let item = client
            .update_work_item(
                7,
                &UpdateWorkItemOptions {
                    state: Some("Closed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(item["fields"]["System.State"], "Closed");
    }

    #[tokio::test]
    async fn test_update_work_item_requires_a_field() {
        let server = MockServer::start();
        let client = test_client(&server);
        let err = client
            .update_work_item(7, &UpdateWorkItemOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_manage_link_add() {
        let server = MockServer::start();

        let mock = server.mock(|when, then| {
            when.method(PATCH)
                .path("/acme/widgets/_apis/wit/workitems/1")
                .body_includes("System.LinkTypes.Related")
                .body_includes("/_apis/wit/workItems/2")
                .body_includes("linked by test");
            then.status(200).json_body(serde_json::json!({"id": 1}));
        });

        let client = test_client(&server);
        let item = client
            .manage_work_item_link(
                None,
                1,
                2,
                "System.LinkTypes.Related",
                &LinkOperation::Add,
                Some("linked by test"),
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(item["id"], 1);
    }

    #[tokio::test]
    async fn test_manage_link_remove_finds_index() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET).path("/acme/_apis/wit/workitems/1");
            then.status(200).json_body(serde_json::json!({
                "id": 1,
                "relations": [
                    {"rel": "System.LinkTypes.Hierarchy-Forward", "url": "http://x/_apis/wit/workItems/9"},
                    {"rel": "System.LinkTypes.Related", "url": "http://x/_apis/wit/workItems/2"}
                ]
            }));
        });
        let patch_mock = server.mock(|when, then| {
            when.method(PATCH)
                .path("/acme/widgets/_apis/wit/workitems/1")
                .body_includes("\"op\":\"remove\"")
                .body_includes("\"/relations/1\"");
            then.status(200).json_body(serde_json::json!({"id": 1}));
        });

        let client = test_client(&server);
        client
            .manage_work_item_link(
                None,
                1,
                2,
                "System.LinkTypes.Related",
                &LinkOperation::Remove,
                None,
            )
            .await
            .unwrap();

        patch_mock.assert();
    }

    #[tokio::test]
    async fn test_manage_link_remove_missing_relation() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET).path("/acme/_apis/wit/workitems/1");
            then.status(200)
                .json_body(serde_json::json!({"id": 1, "relations": []}));
        });

        let client = test_client(&server);
        let err = client
            .manage_work_item_link(
                None,
                1,
                2,
                "System.LinkTypes.Related",
                &LinkOperation::Remove,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_manage_link_update_swaps_type() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET).path("/acme/_apis/wit/workitems/1");
            then.status(200).json_body(serde_json::json!({
                "id": 1,
                "relations": [
                    {"rel": "System.LinkTypes.Related", "url": "http://x/_apis/wit/workItems/2"}
                ]
            }));
        });
        let patch_mock = server.mock(|when, then| {
            when.method(PATCH)
                .path("/acme/widgets/_apis/wit/workitems/1")
                .body_includes("\"op\":\"remove\"")
                .body_includes("System.LinkTypes.Hierarchy-Forward");
            then.status(200).json_body(serde_json::json!({"id": 1}));
        });

        let client = test_client(&server);
        client
            .manage_work_item_link(
                None,
                1,
                2,
                "System.LinkTypes.Related",
                &LinkOperation::Update {
                    new_relation_type: "System.LinkTypes.Hierarchy-Forward".to_string(),
                },
                None,
            )
            .await
            .unwrap();

        patch_mock.assert();
    }
}
