//! GitLab-style provider client.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::provider::core::{Backend, OwnerInfo, RepositoryInfo};
use crate::provider::http::{HttpGet, ReqwestGet};

pub struct GitLabBackend {
    http: Box<dyn HttpGet>,
    api_base: String,
    token: Option<String>,
    /// `'+'` by default; rewrites inner `/` in `path_with_namespace` so
    /// nested-group projects appear at a single path level.
    separator: char,
}

impl GitLabBackend {
    pub fn new(token: Option<String>) -> Self {
        Self::with_transport("https://gitlab.com/api/v4".into(), token, '+', Box::new(ReqwestGet::new()))
    }

    pub fn with_transport(api_base: String, token: Option<String>, separator: char, http: Box<dyn HttpGet>) -> Self {
        Self { http, api_base, token, separator }
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.api_base, path);
        let mut headers = Vec::new();
        if let Some(token) = &self.token {
            headers.push(("Authorization", format!("Bearer {token}")));
        }
        let bytes = self.http.get(&url, &headers)?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Transport(e.to_string()))
    }
}

#[derive(Deserialize)]
struct GitLabUser {
    username: String,
}

#[derive(Deserialize)]
struct GitLabGroup {
    name: String,
}

#[derive(Deserialize)]
struct GitLabProject {
    path_with_namespace: String,
    http_url_to_repo: String,
}

impl Backend for GitLabBackend {
    fn fetch_owner(&self, name: &str) -> Result<OwnerInfo> {
        // try a user first, then fall back to a group.
        let users: std::result::Result<Vec<GitLabUser>, Error> = self.get_json(&format!("/users?username={name}"));
        if let Ok(matches) = users {
            if let Some(u) = matches.into_iter().find(|u| u.username == name) {
                return Ok(OwnerInfo { name: u.username, is_organization: false });
            }
        }

        let group: GitLabGroup = self.get_json(&format!("/groups/{name}?with_projects=false"))?;
        Ok(OwnerInfo { name: group.name, is_organization: true })
    }

    fn fetch_repositories(&self, owner: &OwnerInfo) -> Result<Vec<RepositoryInfo>> {
        let path = if owner.is_organization {
            format!("/groups/{}/projects?include_subgroups=true&simple=true&order_by=id&per_page=100", owner.name)
        } else {
            format!("/users/{}/projects?simple=true&order_by=id&per_page=100", owner.name)
        };
        let projects: Vec<GitLabProject> = self.get_json(&path)?;

        Ok(projects
            .into_iter()
            .map(|p| {
                let without_owner = p
                    .path_with_namespace
                    .strip_prefix(&format!("{}/", owner.name))
                    .unwrap_or(&p.path_with_namespace)
                    .to_string();
                let name = without_owner.replace('/', &self.separator.to_string());
                RepositoryInfo { name, clone_url: p.http_url_to_repo }
            })
            .collect())
    }
}
