//! Azure DevOps REST client for azdo-tools.
//!
//! This crate wraps the Azure DevOps REST API behind a single
//! [`AzureClient`], organized by feature area: projects, repositories,
//! pull requests, pipelines, work items, wikis, search, and identity.
//! Authentication is PAT-only (HTTP Basic with an empty username).

mod client;

pub mod artifacts;
pub mod identity;
pub mod pipelines;
pub mod projects;
pub mod pull_requests;
pub mod repos;
pub mod search;
pub mod wikis;
pub mod work_items;

pub use client::AzureClient;

pub use artifacts::DownloadArtifactOptions;
pub use identity::{Organization, Profile};
pub use pipelines::{
    ListPipelinesOptions, ListRunsOptions, PipelineLogOptions, TimelineOptions, TriggerRunOptions,
};
pub use projects::{ListProjectsOptions, ProjectDetailsOptions};
pub use pull_requests::{
    AddCommentOptions, CreatePullRequestOptions, ListPullRequestsOptions, UpdatePullRequestOptions,
};
pub use repos::{
    CreateCommitOptions, FileChange, GetFileOptions, RepositoryDetailsOptions,
    RepositoryTreeOptions,
};
pub use search::{SearchCodeOptions, SearchOptions};
pub use wikis::{CreateWikiOptions, WikiPageContent};
pub use work_items::{
    CreateWorkItemOptions, LinkOperation, ListWorkItemsOptions, UpdateWorkItemOptions,
};
