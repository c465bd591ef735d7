//! Common provider caching core: a two-level LRU (owner-name -> Owner,
//! repo-name -> Repository), refcount + last-used tracking, and a
//! release/reacquire/double-check pattern for populating entries without
//! holding the lock across a network fetch.

use std::collections::HashMap;
use std::sync::{Mutex, Weak};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::provider::filter::FilterRules;

#[derive(Clone, Debug)]
pub struct OwnerInfo {
    pub name: String,
    pub is_organization: bool,
}

#[derive(Clone, Debug)]
pub struct RepositoryInfo {
    pub name: String,
    pub clone_url: String,
}

struct CacheEntry<T> {
    value: T,
    refcount: u32,
    last_used: Instant,
}

struct Owner {
    info: OwnerInfo,
    repositories: Option<HashMap<String, CacheEntry<RepositoryInfo>>>,
}

/// shared by `GitHubClient`/`GitLabClient`; those provide the network calls
/// (`fetch_owner`, `fetch_repositories`) through the [`Backend`] trait.
pub trait Backend: Send + Sync {
    fn fetch_owner(&self, name: &str) -> Result<OwnerInfo>;
    fn fetch_repositories(&self, owner: &OwnerInfo) -> Result<Vec<RepositoryInfo>>;
}

pub struct ProviderCache {
    backend: Box<dyn Backend>,
    case_insensitive: bool,
    ttl: Duration,
    filter: FilterRules,
    owners: Mutex<HashMap<String, CacheEntry<Owner>>>,
}

impl ProviderCache {
    pub fn new(backend: Box<dyn Backend>, case_insensitive: bool, ttl: Duration, filter: FilterRules) -> Self {
        Self { backend, case_insensitive, ttl, filter, owners: Mutex::new(HashMap::new()) }
    }

    fn key(&self, name: &str) -> String {
        if self.case_insensitive { name.to_uppercase() } else { name.to_string() }
    }

    /// opens (and caches) the named owner, bumping its refcount.
    pub fn open_owner(&self, name: &str) -> Result<OwnerInfo> {
        if !self.filter.owner_visible(name) {
            return Err(Error::NotFound(format!("owner {name}")));
        }
        let key = self.key(name);
        {
            let mut owners = self.owners.lock().unwrap();
            if let Some(entry) = owners.get_mut(&key) {
                entry.refcount += 1;
                entry.last_used = Instant::now();
                return Ok(entry.value.info.clone());
            }
        }

        let info = self.backend.fetch_owner(name)?;
        let mut owners = self.owners.lock().unwrap();
        let entry = owners.entry(key).or_insert_with(|| CacheEntry {
            value: Owner { info: info.clone(), repositories: None },
            refcount: 0,
            last_used: Instant::now(),
        });
        entry.refcount += 1;
        entry.last_used = Instant::now();
        Ok(entry.value.info.clone())
    }

    pub fn close_owner(&self, name: &str) {
        let key = self.key(name);
        let mut owners = self.owners.lock().unwrap();
        if let Some(entry) = owners.get_mut(&key) {
            entry.refcount = entry.refcount.saturating_sub(1);
        }
    }

    /// `ensureRepositories`: release the lock, fetch the full list over the
    /// network, reacquire, publish with a double-check, then look up `repo`.
    pub fn get_repository(&self, owner: &str, repo: &str) -> Result<RepositoryInfo> {
        self.filter.check(owner, repo)?;
        let owner_info = self.open_owner(owner)?;
        let owner_key = self.key(owner);
        let repo_key = self.key(repo);

        {
            let owners = self.owners.lock().unwrap();
            if let Some(found) = owners
                .get(&owner_key)
                .and_then(|o| o.value.repositories.as_ref())
                .and_then(|repos| repos.get(&repo_key))
            {
                let result = found.value.clone();
                drop(owners);
                self.close_owner(owner);
                return Ok(result);
            }
        }

        let fetched = self.backend.fetch_repositories(&owner_info)?;

        let mut owners = self.owners.lock().unwrap();
        let entry = owners
            .get_mut(&owner_key)
            .ok_or_else(|| Error::NotFound(format!("owner {owner} evicted during fetch")))?;
        if entry.value.repositories.is_none() {
            let mut map = HashMap::new();
            for r in fetched {
                let k = if self.case_insensitive { r.name.to_uppercase() } else { r.name.clone() };
                map.insert(k, CacheEntry { value: r, refcount: 0, last_used: Instant::now() });
            }
            entry.value.repositories = Some(map);
        }
        let result = entry
            .value
            .repositories
            .as_ref()
            .unwrap()
            .get(&repo_key)
            .map(|e| e.value.clone())
            .ok_or_else(|| Error::NotFound(format!("{owner}/{repo}")));
        drop(owners);
        self.close_owner(owner);
        result
    }

    /// lists the repositories under `owner`, populating (but not pinning)
    /// the same cache entry `get_repository` reads from.
    pub fn list_repositories(&self, owner: &str) -> Result<Vec<RepositoryInfo>> {
        let owner_info = self.open_owner(owner)?;
        let owner_key = self.key(owner);

        {
            let owners = self.owners.lock().unwrap();
            if let Some(repos) = owners.get(&owner_key).and_then(|o| o.value.repositories.as_ref()) {
                let out = repos.values().map(|e| e.value.clone()).collect();
                drop(owners);
                self.close_owner(owner);
                return Ok(out);
            }
        }

        let fetched = self.backend.fetch_repositories(&owner_info)?;

        let mut owners = self.owners.lock().unwrap();
        let entry = owners
            .get_mut(&owner_key)
            .ok_or_else(|| Error::NotFound(format!("owner {owner} evicted during fetch")))?;
        if entry.value.repositories.is_none() {
            let mut map = HashMap::new();
            for r in fetched {
                let k = if self.case_insensitive { r.name.to_uppercase() } else { r.name.clone() };
                map.insert(k, CacheEntry { value: r, refcount: 0, last_used: Instant::now() });
            }
            entry.value.repositories = Some(map);
        }
        let out = entry.value.repositories.as_ref().unwrap().values().map(|e| e.value.clone()).collect();
        drop(owners);
        self.close_owner(owner);
        Ok(out)
    }

    /// 1 Hz expiration tick: walk the LRU, expire items
    /// whose `last_used + ttl <= now` and whose refcount is zero.
    pub fn expire_tick(&self) {
        let now = Instant::now();
        let mut owners = self.owners.lock().unwrap();
        owners.retain(|_, entry| {
            if entry.last_used + self.ttl > now {
                return true;
            }
            if entry.refcount != 0 {
                return true;
            }
            let has_live_repo = entry
                .value
                .repositories
                .as_ref()
                .map(|repos| repos.values().any(|r| r.refcount != 0))
                .unwrap_or(false);
            !has_live_repo
        });
    }
}

/// background 1 Hz ticker holding only a [`Weak`] reference so a dropped
/// cache stops the ticker instead of leaking a thread.
pub fn spawn_expiration_ticker(cache: Weak<ProviderCache>) {
    std::thread::spawn(move || loop {
        std::thread::sleep(Duration::from_secs(1));
        match cache.upgrade() {
            Some(cache) => cache.expire_tick(),
            None => return,
        }
    });
}
