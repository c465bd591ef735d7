//! Thin HTTP GET abstraction shared by the GitHub/GitLab backends, so tests
//! can substitute an in-memory transport instead of hitting the network
//! (mirrors `pack::session::Transport`).

use crate::error::{Error, Result};
use crate::retry::execute_with_retry;

pub trait HttpGet: Send + Sync {
    /// returns the response body bytes, or an error classified by status
    /// code (`NotFound` for 404, `Unauthorized` for 401/403, `Transport`
    /// otherwise).
    fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<Vec<u8>>;

    /// posts a JSON body, used for GraphQL queries. Transports with no
    /// POST support (most test doubles) can leave this at its default,
    /// which always errors and so always falls through to a REST caller.
    fn post_json(&self, _url: &str, _headers: &[(&str, String)], _body: Vec<u8>) -> Result<Vec<u8>> {
        Err(Error::Transport("this transport does not support POST".into()))
    }
}

pub struct ReqwestGet {
    client: reqwest::blocking::Client,
}

impl ReqwestGet {
    pub fn new() -> Self {
        Self { client: reqwest::blocking::Client::new() }
    }
}

impl Default for ReqwestGet {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpGet for ReqwestGet {
    fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<Vec<u8>> {
        let mut builder = self.client.get(url);
        for (name, value) in headers {
            builder = builder.header(*name, value.clone());
        }
        let request = builder.build().map_err(|e| Error::Transport(e.to_string()))?;
        let response = execute_with_retry(&self.client, request)?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Err(Error::NotFound(url.to_string()));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::Unauthorized(url.to_string()));
        }
        if !status.is_success() {
            return Err(Error::Transport(format!("{url} returned {status}")));
        }
        Ok(response.bytes().map_err(|e| Error::Transport(e.to_string()))?.to_vec())
    }

    fn post_json(&self, url: &str, headers: &[(&str, String)], body: Vec<u8>) -> Result<Vec<u8>> {
        let mut builder = self.client.post(url).header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, value.clone());
        }
        let request = builder.body(body).build().map_err(|e| Error::Transport(e.to_string()))?;
        let response = execute_with_retry(&self.client, request)?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Err(Error::NotFound(url.to_string()));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::Unauthorized(url.to_string()));
        }
        if !status.is_success() {
            return Err(Error::Transport(format!("{url} returned {status}")));
        }
        Ok(response.bytes().map_err(|e| Error::Transport(e.to_string()))?.to_vec())
    }
}
