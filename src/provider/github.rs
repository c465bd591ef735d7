//! GitHub-style provider client.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::provider::core::{Backend, OwnerInfo, RepositoryInfo};
use crate::provider::http::{HttpGet, ReqwestGet};

const ACCEPT: &str = "application/vnd.github.v3+json";

pub struct GitHubBackend {
    http: Box<dyn HttpGet>,
    api_base: String,
    token: Option<String>,
}

impl GitHubBackend {
    pub fn new(token: Option<String>) -> Self {
        Self::with_transport("https://api.github.com".into(), token, Box::new(ReqwestGet::new()))
    }

    pub fn with_transport(api_base: String, token: Option<String>, http: Box<dyn HttpGet>) -> Self {
        Self { http, api_base, token }
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.api_base, path);
        let mut headers = vec![("Accept", ACCEPT.to_string())];
        if let Some(token) = &self.token {
            headers.push(("Authorization", format!("token {token}")));
        }
        let bytes = self.http.get(&url, &headers)?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Transport(e.to_string()))
    }
}

#[derive(Deserialize)]
struct UserResponse {
    login: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct RepoResponse {
    name: String,
    clone_url: String,
}

/// cursor-paginated `repositoryOwner.repositories` query, covering both
/// user and organization owners (both implement GitHub's `RepositoryOwner`
/// interface). `url` is the web URL; appending `.git` gives the https
/// clone URL without a second round trip for `sshUrl`/`cloneUrl`.
const REPOSITORIES_QUERY: &str = "query($login: String!, $cursor: String) { \
    repositoryOwner(login: $login) { \
        repositories(first: 100, after: $cursor) { \
            nodes { name url } \
            pageInfo { hasNextPage endCursor } \
        } \
    } \
}";

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RepositoriesData {
    #[serde(rename = "repositoryOwner")]
    repository_owner: Option<RepositoryOwnerNode>,
}

#[derive(Deserialize)]
struct RepositoryOwnerNode {
    repositories: RepositoryConnection,
}

#[derive(Deserialize)]
struct RepositoryConnection {
    nodes: Vec<GraphQlRepoNode>,
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
}

#[derive(Deserialize)]
struct GraphQlRepoNode {
    name: String,
    url: String,
}

#[derive(Deserialize)]
struct PageInfo {
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
}

impl Backend for GitHubBackend {
    fn fetch_owner(&self, name: &str) -> Result<OwnerInfo> {
        let user: UserResponse = self.get_json(&format!("/users/{name}"))?;
        Ok(OwnerInfo { name: user.login, is_organization: user.kind == "Organization" })
    }

    /// tries the GraphQL repository connection first (cursor pagination,
    /// one round trip per 100 entries); any GraphQL-level failure (HTTP
    /// error, transport error, or an `errors` array in an otherwise-200
    /// response) falls back to REST paging.
    fn fetch_repositories(&self, owner: &OwnerInfo) -> Result<Vec<RepositoryInfo>> {
        match self.fetch_repositories_graphql(owner) {
            Ok(repos) => Ok(repos),
            Err(_) => self.fetch_repositories_rest(owner),
        }
    }
}

impl GitHubBackend {
    fn fetch_repositories_graphql(&self, owner: &OwnerInfo) -> Result<Vec<RepositoryInfo>> {
        let url = format!("{}/graphql", self.api_base);
        let mut headers = vec![("Accept", ACCEPT.to_string())];
        if let Some(token) = &self.token {
            headers.push(("Authorization", format!("token {token}")));
        }

        let mut repos = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let body = serde_json::to_vec(&serde_json::json!({
                "query": REPOSITORIES_QUERY,
                "variables": { "login": owner.name, "cursor": cursor },
            }))
            .map_err(|e| Error::Transport(e.to_string()))?;

            let bytes = self.http.post_json(&url, &headers, body)?;
            let response: GraphQlResponse<RepositoriesData> =
                serde_json::from_slice(&bytes).map_err(|e| Error::Transport(e.to_string()))?;
            if !response.errors.is_empty() {
                return Err(Error::Transport(format!("graphql returned {} error(s)", response.errors.len())));
            }
            let owner_node = response
                .data
                .and_then(|d| d.repository_owner)
                .ok_or_else(|| Error::NotFound(owner.name.clone()))?;

            let page = owner_node.repositories;
            repos.extend(
                page.nodes
                    .into_iter()
                    .map(|n| RepositoryInfo { name: n.name, clone_url: format!("{}.git", n.url) }),
            );
            if !page.page_info.has_next_page {
                break;
            }
            cursor = page.page_info.end_cursor;
        }
        Ok(repos)
    }

    /// REST fallback: `/orgs/{o}/repos` or `/users/{u}/repos`, paged until
    /// a page returns fewer than 100 entries.
    fn fetch_repositories_rest(&self, owner: &OwnerInfo) -> Result<Vec<RepositoryInfo>> {
        let endpoint = if owner.is_organization {
            format!("/orgs/{}/repos", owner.name)
        } else {
            format!("/users/{}/repos", owner.name)
        };

        let mut repos = Vec::new();
        let mut page = 1u32;
        loop {
            let batch: Vec<RepoResponse> = self.get_json(&format!("{endpoint}?per_page=100&page={page}"))?;
            let count = batch.len();
            repos.extend(batch.into_iter().map(|r| RepositoryInfo { name: r.name, clone_url: r.clone_url }));
            if count < 100 {
                break;
            }
            page += 1;
        }
        Ok(repos)
    }
}
