//! Organization URL handling.
//!
//! Azure DevOps lives behind several URL shapes: `dev.azure.com/{org}`,
//! the legacy `{org}.visualstudio.com`, and on-premises Server/TFS
//! installs with a collection path. Everything downstream (REST routes,
//! the search host, the profile host) is derived from the configured
//! organization URL here.

use crate::{Error, Result};

const DEV_AZURE_HOST: &str = "dev.azure.com";
const SEARCH_HOST: &str = "almsearch.dev.azure.com";
const PROFILE_HOST: &str = "vssps.dev.azure.com";
const VSSPS_BASE: &str = "https://app.vssps.visualstudio.com";
const VSTS_HOST_SUFFIX: &str = ".visualstudio.com";

/// Hosted service vs on-premises Server install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Services,
    Server,
}

/// Base URLs resolved from an organization URL.
#[derive(Debug, Clone)]
pub struct BaseUrls {
    pub kind: HostKind,
    /// Organization name (Services only)
    pub organization: Option<String>,
    /// Collection name (Server only)
    pub collection: Option<String>,
    /// Base for core REST routes, e.g. `https://dev.azure.com/acme`
    pub core: String,
    /// Base for search routes; a dedicated host on Services
    pub search: String,
    /// Base for org-scoped profile routes, e.g. `https://vssps.dev.azure.com/acme`; Services only
    pub profile: Option<String>,
    /// Base for cross-organization account routes; Services only
    pub vssps: Option<String>,
    /// Project detected in a Server URL's trailing segment, if any
    pub project_from_url: Option<String>,
}

/// Minimal URL split: scheme, lowercase host, decoded path segments.
struct ParsedUrl {
    host: String,
    origin: String,
    segments: Vec<String>,
}

fn parse_url(input: &str) -> Result<ParsedUrl> {
    let rest = input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))
        .ok_or_else(|| {
            Error::Validation("Organization URL must start with http:// or https://".to_string())
        })?;
    let scheme = if input.starts_with("https://") {
        "https"
    } else {
        "http"
    };

    let (host_port, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    if host_port.is_empty() {
        return Err(Error::Validation(
            "Organization URL must include a host".to_string(),
        ));
    }

    let host = host_port
        .split(':')
        .next()
        .unwrap_or(host_port)
        .to_lowercase();

    let segments = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::decode(s).map(|c| c.into_owned()).unwrap_or_else(|_| s.to_string()))
        .collect();

    Ok(ParsedUrl {
        host,
        origin: format!("{}://{}", scheme, host_port),
        segments,
    })
}

fn is_services_host(host: &str) -> bool {
    host == DEV_AZURE_HOST || host.ends_with(VSTS_HOST_SUFFIX)
}

/// Extract the organization name from an organization URL.
///
/// Falls back to `unknown-organization` rather than failing; callers use
/// this for display defaults, not for building request routes.
pub fn org_name_from_url(url: Option<&str>) -> String {
    const UNKNOWN: &str = "unknown-organization";
    let Some(url) = url else {
        return UNKNOWN.to_string();
    };
    let Ok(parsed) = parse_url(url) else {
        return UNKNOWN.to_string();
    };

    if parsed.host == DEV_AZURE_HOST {
        return parsed
            .segments
            .first()
            .cloned()
            .unwrap_or_else(|| UNKNOWN.to_string());
    }

    if parsed.host.ends_with(VSTS_HOST_SUFFIX) {
        let prefix = parsed.host.split('.').next().unwrap_or("");
        return if prefix.is_empty() {
            UNKNOWN.to_string()
        } else {
            prefix.to_string()
        };
    }

    match parsed.segments.first() {
        Some(first) if first.eq_ignore_ascii_case("tfs") => parsed
            .segments
            .get(1)
            .cloned()
            .unwrap_or_else(|| UNKNOWN.to_string()),
        Some(first) => first.clone(),
        None => UNKNOWN.to_string(),
    }
}

/// Resolve the REST base URLs for an organization URL.
///
/// `organization` overrides the organization extracted from the URL;
/// `project` helps Server URL parsing recognize a trailing project segment.
pub fn resolve_base_urls(
    server_url: &str,
    organization: Option<&str>,
    project: Option<&str>,
) -> Result<BaseUrls> {
    let parsed = parse_url(server_url)?;

    if is_services_host(&parsed.host) {
        let org = match organization {
            Some(o) if !o.is_empty() => o.to_string(),
            _ => {
                if parsed.host == DEV_AZURE_HOST {
                    parsed.segments.first().cloned().unwrap_or_default()
                } else {
                    parsed.host.split('.').next().unwrap_or("").to_string()
                }
            }
        };
        if org.is_empty() {
            return Err(Error::Validation(
                "Could not extract organization from Azure DevOps Services URL".to_string(),
            ));
        }

        return Ok(BaseUrls {
            kind: HostKind::Services,
            core: format!("https://{}/{}", DEV_AZURE_HOST, org),
            search: format!("https://{}/{}", SEARCH_HOST, org),
            profile: Some(format!("https://{}/{}", PROFILE_HOST, org)),
            vssps: Some(VSSPS_BASE.to_string()),
            organization: Some(org),
            collection: None,
            project_from_url: None,
        });
    }

    // Server/TFS: the last path segment is the collection unless it matches
    // the project; a lone "tfs" segment is part of the instance path.
    let segments = parsed.segments;
    let normalized_project = project.map(|p| p.to_lowercase());

    let (instance_segments, collection, project_from_url): (Vec<String>, Option<String>, Option<String>) =
        match segments.len() {
            0 => (Vec::new(), None, None),
            1 => {
                if segments[0].eq_ignore_ascii_case("tfs") {
                    (segments, None, None)
                } else {
                    (Vec::new(), Some(segments[0].clone()), None)
                }
            }
            n => {
                let last = &segments[n - 1];
                if normalized_project
                    .as_deref()
                    .is_some_and(|p| last.to_lowercase() == p)
                {
                    (
                        segments[..n - 2].to_vec(),
                        Some(segments[n - 2].clone()),
                        Some(last.clone()),
                    )
                } else {
                    (segments[..n - 1].to_vec(), Some(last.clone()), None)
                }
            }
        };

    let collection = collection
        .or_else(|| organization.map(|o| o.to_string()))
        .ok_or_else(|| {
            Error::Validation("Azure DevOps Server URL must include a collection".to_string())
        })?;

    let instance_base = if instance_segments.is_empty() {
        parsed.origin.trim_end_matches('/').to_string()
    } else {
        format!(
            "{}/{}",
            parsed.origin.trim_end_matches('/'),
            instance_segments.join("/")
        )
    };
    let core = format!("{}/{}", instance_base.trim_end_matches('/'), collection);

    Ok(BaseUrls {
        kind: HostKind::Server,
        search: core.clone(),
        core,
        profile: None,
        vssps: None,
        organization: None,
        collection: Some(collection),
        project_from_url,
    })
}
