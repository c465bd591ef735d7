//! `.gitmodules` parsing.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::view::{Ref, RepositoryView};

/// one `[submodule "name"]` stanza: `path = ...` and `url = ...`.
#[derive(Clone, Debug, Default)]
struct ModuleEntry {
    path: String,
    url: String,
}

/// lazily parses `.gitmodules` per ref and resolves submodule paths to URLs
/// (or to a repository-root-relative path when the URL shares scheme/host
/// with the parent repository).
#[derive(Default)]
pub struct SubmoduleMap {
    parsed: RwLock<HashMap<String, Vec<ModuleEntry>>>,
}

impl SubmoduleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// `rootrel` is the parent repository's clone URL, used to decide
    /// whether the submodule can be presented as a same-host relative path.
    pub fn get_module(&self, view: &RepositoryView, r: &Ref, path: &str, rootrel: &str) -> Result<String> {
        self.ensure_parsed(view, r)?;
        let guard = self.parsed.read().unwrap();
        let entries = guard.get(&r.name).ok_or_else(|| Error::NotFound(".gitmodules".into()))?;
        let entry = entries
            .iter()
            .find(|e| e.path == path)
            .ok_or_else(|| Error::NotFound(format!("submodule at {path}")))?;

        if let Some(relative) = same_host_relative_path(&entry.url, rootrel) {
            Ok(relative)
        } else {
            Ok(entry.url.clone())
        }
    }

    fn ensure_parsed(&self, view: &RepositoryView, r: &Ref) -> Result<()> {
        if self.parsed.read().unwrap().contains_key(&r.name) {
            return Ok(());
        }

        let entries = match view.get_tree_entry(r, ".gitmodules")? {
            Some(entry) => {
                let mut reader = view.get_blob_reader(&entry)?;
                let mut bytes = Vec::new();
                std::io::Read::read_to_end(&mut reader, &mut bytes)
                    .map_err(|e| Error::Transport(e.to_string()))?;
                parse_gitmodules(&String::from_utf8_lossy(&bytes))
            }
            None => Vec::new(),
        };

        self.parsed.write().unwrap().insert(r.name.clone(), entries);
        Ok(())
    }
}

/// minimal INI-style parser for `.gitmodules`: `[submodule "name"]` stanzas
/// with `path = ...` / `url = ...` keys.
fn parse_gitmodules(text: &str) -> Vec<ModuleEntry> {
    let mut entries = Vec::new();
    let mut current = ModuleEntry::default();
    let mut in_stanza = false;

    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            if in_stanza && !current.path.is_empty() {
                entries.push(std::mem::take(&mut current));
            }
            current = ModuleEntry::default();
            in_stanza = line.starts_with("[submodule");
            continue;
        }
        if !in_stanza {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().to_string();
            match key {
                "path" => current.path = value,
                "url" => current.url = value,
                _ => {}
            }
        }
    }
    if in_stanza && !current.path.is_empty() {
        entries.push(current);
    }
    entries
}

/// if `url` and `parent_url` share scheme and host, return the
/// repository-root-relative path of `url`.
fn same_host_relative_path(url: &str, parent_url: &str) -> Option<String> {
    let (url_host, url_path) = split_scheme_host(url)?;
    let (parent_host, _) = split_scheme_host(parent_url)?;
    if url_host != parent_host {
        return None;
    }
    Some(url_path.trim_end_matches(".git").trim_start_matches('/').to_string())
}

fn split_scheme_host(url: &str) -> Option<(String, String)> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let (host, path) = rest.split_once('/')?;
    Some((host.to_lowercase(), format!("/{path}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_stanza() {
        let text = "[submodule \"lib\"]\n\tpath = vendor/lib\n\turl = https://github.com/a/lib.git\n";
        let entries = parse_gitmodules(text);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "vendor/lib");
        assert_eq!(entries[0].url, "https://github.com/a/lib.git");
    }

    #[test]
    fn parses_multiple_stanzas() {
        let text = "[submodule \"a\"]\npath = a\nurl = https://github.com/x/a.git\n\
[submodule \"b\"]\npath = b\nurl = https://gitlab.com/x/b.git\n";
        let entries = parse_gitmodules(text);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn same_host_url_becomes_relative_path() {
        let rel = same_host_relative_path(
            "https://github.com/other-owner/other-repo.git",
            "https://github.com/owner/repo.git",
        );
        assert_eq!(rel, Some("other-owner/other-repo".to_string()));
    }

    #[test]
    fn different_host_url_stays_absolute() {
        let rel = same_host_relative_path(
            "https://gitlab.com/other-owner/other-repo.git",
            "https://github.com/owner/repo.git",
        );
        assert_eq!(rel, None);
    }
}
