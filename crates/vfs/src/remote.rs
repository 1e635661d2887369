//! Remote repository adapter
//!
//! Presents mounted repositories under `owner/repo/...`:
//!
//! - depth 0 lists owners and depth 1 lists an owner's repositories, both
//!   straight from the mount table
//! - depth 2 is a repository root
//! - anything deeper goes to the content API
//!
//! Listings and file bodies are cached per `owner/repo/branch/path` for the
//! life of the adapter.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use crate::backend::{Adapter, OpenMode};
use crate::bridge::SuspendReason;
use crate::error::{BridgeError, Result};
use crate::handle::DirEntry;
use crate::http::{ContentApi, ContentEntry, ContentsResponse};
use crate::path::{segments, MountDomain};
use crate::record::{now_epoch_seconds, FileRecord, Payload};

/// A mounted repository pinned to a branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMount {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl RepoMount {
    /// `owner/repo`
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Cache key for a path inside this repository
    pub fn cache_key(&self, path: &str) -> String {
        format!("{}/{}/{}/{}", self.owner, self.repo, self.branch, path)
    }
}

/// Parsed `owner/repo[@branch]` shorthand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSpec {
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
}

pub fn parse_repo_spec(spec: &str) -> Result<RepoSpec> {
    let spec = spec.trim().trim_matches('/');
    let Some((owner, rest)) = spec.split_once('/') else {
        return Err(BridgeError::InvalidPath(format!(
            "{spec}: expected owner/repo[@branch]"
        )));
    };
    let (repo, branch) = match rest.split_once('@') {
        Some((repo, branch)) => (repo, Some(branch.to_string())),
        None => (rest, None),
    };
    if owner.is_empty() || repo.is_empty() || repo.contains('/') || branch.as_deref() == Some("") {
        return Err(BridgeError::InvalidPath(format!(
            "{spec}: expected owner/repo[@branch]"
        )));
    }
    Ok(RepoSpec {
        owner: owner.to_string(),
        repo: repo.to_string(),
        branch,
    })
}

/// Mount table and caches. No eviction.
#[derive(Debug, Default)]
pub struct RemoteRepoRegistry {
    repos: BTreeMap<String, RepoMount>,
    listings: HashMap<String, Vec<ContentEntry>>,
    contents: HashMap<String, Bytes>,
}

impl RemoteRepoRegistry {
    /// Add or re-pin a repository; returns the previous mount
    pub fn insert(&mut self, mount: RepoMount) -> Option<RepoMount> {
        self.repos.insert(mount.key(), mount)
    }

    pub fn get(&self, owner: &str, repo: &str) -> Option<&RepoMount> {
        self.repos.get(&format!("{owner}/{repo}"))
    }

    pub fn mounts(&self) -> impl Iterator<Item = &RepoMount> {
        self.repos.values()
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    /// Unique owners, sorted
    pub fn owners(&self) -> Vec<String> {
        let mut owners: Vec<String> = self.repos.values().map(|m| m.owner.clone()).collect();
        owners.sort();
        owners.dedup();
        owners
    }

    pub fn repos_of(&self, owner: &str) -> Vec<String> {
        self.repos
            .values()
            .filter(|m| m.owner == owner)
            .map(|m| m.repo.clone())
            .collect()
    }

    pub fn listing(&self, key: &str) -> Option<&Vec<ContentEntry>> {
        self.listings.get(key)
    }

    pub fn content(&self, key: &str) -> Option<Bytes> {
        self.contents.get(key).cloned()
    }

    pub fn cached_listings(&self) -> usize {
        self.listings.len()
    }

    pub fn cached_files(&self) -> usize {
        self.contents.len()
    }
}

/// Adapter over mounted repositories
pub struct RemoteAdapter {
    api: Rc<dyn ContentApi>,
    registry: RefCell<RemoteRepoRegistry>,
    fallback_branch: String,
}

/// A path below depth 2, split into its repository and in-repo parts
struct RepoPath {
    mount: RepoMount,
    path: String,
}

impl RemoteAdapter {
    pub fn new(api: Rc<dyn ContentApi>, fallback_branch: impl Into<String>) -> Self {
        Self {
            api,
            registry: RefCell::new(RemoteRepoRegistry::default()),
            fallback_branch: fallback_branch.into(),
        }
    }

    pub fn registry(&self) -> std::cell::Ref<'_, RemoteRepoRegistry> {
        self.registry.borrow()
    }

    /// Validate and mount a repository. Without a branch the repository's
    /// default branch is used.
    pub async fn mount(&self, owner: &str, repo: &str, branch: Option<&str>) -> Result<RepoMount> {
        let info = self.api.repository(owner, repo).await?;
        let branch = branch
            .map(str::to_string)
            .or_else(|| Some(info.default_branch).filter(|b| !b.is_empty()))
            .unwrap_or_else(|| self.fallback_branch.clone());
        let mount = RepoMount {
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch,
        };
        let previous = self.registry.borrow_mut().insert(mount.clone());
        match previous {
            Some(prev) if prev.branch != mount.branch => {
                info!(repo = %mount.key(), from = %prev.branch, to = %mount.branch, "repository re-pinned");
            }
            Some(_) => {}
            None => info!(repo = %mount.key(), branch = %mount.branch, "repository mounted"),
        }
        Ok(mount)
    }

    /// Mount from `owner/repo[@branch]`
    pub async fn mount_spec(&self, spec: &str) -> Result<RepoMount> {
        let spec = parse_repo_spec(spec)?;
        self.mount(&spec.owner, &spec.repo, spec.branch.as_deref())
            .await
    }

    pub fn mounts(&self) -> Vec<RepoMount> {
        self.registry.borrow().mounts().cloned().collect()
    }

    fn repo_path(&self, parts: &[&str]) -> Result<RepoPath> {
        let registry = self.registry.borrow();
        let mount = registry
            .get(parts[0], parts[1])
            .cloned()
            .ok_or_else(|| BridgeError::not_found(format!("{}/{}", parts[0], parts[1])))?;
        Ok(RepoPath {
            mount,
            path: parts[2..].join("/"),
        })
    }

    fn file_record(relative: &str, size: u64) -> FileRecord {
        FileRecord::file(MountDomain::Remote, relative, size, now_epoch_seconds()).read_only(true)
    }

    /// Directory listing, served from cache when possible
    async fn listing(&self, target: &RepoPath) -> Result<Vec<ContentEntry>> {
        let key = target.mount.cache_key(&target.path);
        if let Some(entries) = self.registry.borrow().listing(&key) {
            debug!(key = %key, "listing cache hit");
            return Ok(entries.clone());
        }
        let RepoMount { owner, repo, branch } = &target.mount;
        match self.api.contents(owner, repo, branch, &target.path).await? {
            ContentsResponse::Directory(entries) => {
                self.registry
                    .borrow_mut()
                    .listings
                    .insert(key, entries.clone());
                Ok(entries)
            }
            ContentsResponse::File(_) => Err(BridgeError::NotADirectory(key)),
        }
    }

    /// Answer a stat from the parent's cached listing, if there is one
    fn stat_from_parent(&self, relative: &str, target: &RepoPath) -> Option<Result<FileRecord>> {
        let (parent, name) = match target.path.rsplit_once('/') {
            Some((parent, name)) => (parent, name),
            None => ("", target.path.as_str()),
        };
        let registry = self.registry.borrow();
        let entries = registry.listing(&target.mount.cache_key(parent))?;
        Some(match entries.iter().find(|e| e.name == name) {
            Some(entry) if entry.is_dir() => {
                Ok(FileRecord::directory(MountDomain::Remote, relative))
            }
            Some(entry) => Ok(Self::file_record(relative, entry.size)),
            None => Err(BridgeError::not_found(relative)),
        })
    }
}

#[async_trait(?Send)]
impl Adapter for RemoteAdapter {
    fn domain(&self) -> MountDomain {
        MountDomain::Remote
    }

    fn suspend_reason(&self) -> SuspendReason {
        SuspendReason::NetworkFetch
    }

    async fn stat(&self, relative: &str) -> Result<FileRecord> {
        let parts = segments(relative);
        let known = {
            let registry = self.registry.borrow();
            match parts.len() {
                0 => true,
                1 => registry.mounts().any(|m| m.owner == parts[0]),
                2 => registry.get(parts[0], parts[1]).is_some(),
                _ => false,
            }
        };
        if parts.len() < 3 {
            return if known {
                Ok(FileRecord::directory(MountDomain::Remote, relative))
            } else {
                Err(BridgeError::not_found(relative))
            };
        }

        let target = self.repo_path(&parts)?;
        if let Some(record) = self.stat_from_parent(relative, &target) {
            return record;
        }
        if let Some(content) = self.registry.borrow().content(&target.mount.cache_key(&target.path)) {
            return Ok(Self::file_record(relative, content.len() as u64));
        }

        let RepoMount { owner, repo, branch } = &target.mount;
        match self.api.contents(owner, repo, branch, &target.path).await? {
            ContentsResponse::Directory(entries) => {
                let key = target.mount.cache_key(&target.path);
                self.registry.borrow_mut().listings.insert(key, entries);
                Ok(FileRecord::directory(MountDomain::Remote, relative))
            }
            ContentsResponse::File(entry) if entry.is_dir() => {
                Ok(FileRecord::directory(MountDomain::Remote, relative))
            }
            ContentsResponse::File(entry) => Ok(Self::file_record(relative, entry.size)),
        }
    }

    async fn list(&self, relative: &str) -> Result<Vec<DirEntry>> {
        let parts = segments(relative);
        match parts.len() {
            0 => Ok(self
                .registry
                .borrow()
                .owners()
                .into_iter()
                .map(DirEntry::dir)
                .collect()),
            1 => {
                let repos = self.registry.borrow().repos_of(parts[0]);
                if repos.is_empty() {
                    return Err(BridgeError::not_found(relative));
                }
                Ok(repos.into_iter().map(DirEntry::dir).collect())
            }
            _ => {
                let target = self.repo_path(&parts)?;
                let entries = self.listing(&target).await?;
                Ok(entries
                    .into_iter()
                    .map(|e| {
                        if e.is_dir() {
                            DirEntry::dir(e.name)
                        } else {
                            DirEntry::file(e.name)
                        }
                    })
                    .collect())
            }
        }
    }

    async fn open(&self, relative: &str, mode: OpenMode) -> Result<FileRecord> {
        if mode.is_write() {
            return Err(BridgeError::Unsupported {
                op: "write",
                domain: MountDomain::Remote,
            });
        }
        let parts = segments(relative);
        if parts.len() < 3 {
            return self.stat(relative).await;
        }

        let target = self.repo_path(&parts)?;
        let key = target.mount.cache_key(&target.path);
        let cached = self.registry.borrow().content(&key);
        let data = if let Some(data) = cached {
            debug!(key = %key, "content cache hit");
            data
        } else {
            let RepoMount { owner, repo, branch } = &target.mount;
            match self.api.raw(owner, repo, branch, &target.path).await {
                Ok(data) => {
                    debug!(key = %key, bytes = data.len(), "remote file fetched");
                    self.registry
                        .borrow_mut()
                        .contents
                        .insert(key, data.clone());
                    data
                }
                Err(e) if e.is_not_found() => {
                    // The raw endpoint has no directories
                    let record = self.stat(relative).await?;
                    return if record.is_dir() { Ok(record) } else { Err(e) };
                }
                Err(e) => return Err(e),
            }
        };
        Ok(Self::file_record(relative, data.len() as u64).with_payload(Payload::Materialized(data)))
    }
}
