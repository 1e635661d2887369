//! Bridge context
//!
//! Owns the router and the three adapters. One context is shared (via `Rc`)
//! between the patched driver and whatever UI glue mounts directories, drops
//! files or adds repositories.

use std::rc::Rc;

use regex::Regex;
use serde::Serialize;

use crate::backend::Adapter;
use crate::bridge::SuspendReason;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::http::{ContentApi, HttpContentApi};
use crate::local::LocalAdapter;
use crate::native::NativeAdapter;
use crate::path::{join, MountDomain, PathRouter};
use crate::record::FileKind;
use crate::remote::RemoteAdapter;

/// One item of a catalog listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub name: String,
    /// Full runtime path
    pub path: String,
    pub is_directory: bool,
}

/// Snapshot of what is mounted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub native_mount: Option<String>,
    pub native_generation: u64,
    pub local_files: usize,
    /// `owner/repo@branch`
    pub repositories: Vec<String>,
    pub cached_listings: usize,
    pub cached_files: usize,
}

pub struct FilesystemBridgeContext {
    config: BridgeConfig,
    router: PathRouter,
    native: NativeAdapter,
    local: LocalAdapter,
    remote: RemoteAdapter,
}

impl FilesystemBridgeContext {
    pub fn new(config: BridgeConfig, api: Rc<dyn ContentApi>) -> Self {
        Self {
            router: PathRouter::from_config(&config.mounts),
            native: NativeAdapter::new(config.native.chunk_size),
            local: LocalAdapter::default(),
            remote: RemoteAdapter::new(api, config.remote.fallback_branch.clone()),
            config,
        }
    }

    /// Context talking to the configured remote endpoints over HTTP
    pub fn with_http(config: BridgeConfig) -> Result<Self> {
        let api = HttpContentApi::new(&config.remote)?;
        Ok(Self::new(config, Rc::new(api)))
    }

    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub const fn router(&self) -> &PathRouter {
        &self.router
    }

    pub const fn native(&self) -> &NativeAdapter {
        &self.native
    }

    pub const fn local(&self) -> &LocalAdapter {
        &self.local
    }

    pub const fn remote(&self) -> &RemoteAdapter {
        &self.remote
    }

    /// Adapter serving `domain`; `Default` has none
    pub fn adapter(&self, domain: MountDomain) -> Option<&dyn Adapter> {
        match domain {
            MountDomain::Native => Some(&self.native),
            MountDomain::Local => Some(&self.local),
            MountDomain::Remote => Some(&self.remote),
            MountDomain::Default => None,
        }
    }

    pub fn suspend_reason(&self, domain: MountDomain) -> SuspendReason {
        self.adapter(domain)
            .map_or(SuspendReason::HandleLookup, |a| a.suspend_reason())
    }

    /// Entries under `path` whose names match `pattern` (`*` and `?`
    /// wildcards). Dropped files are listed recursively, other mounts one
    /// level deep.
    pub async fn catalog(&self, path: &str, pattern: Option<&str>) -> Result<Vec<CatalogEntry>> {
        let matcher = pattern.filter(|p| !p.is_empty()).map(glob_to_regex).transpose()?;
        let routed = self.router.route(path);
        let base = match self.router.prefix(routed.domain) {
            Some(prefix) => join(prefix, routed.relative),
            None => path.trim_end_matches('/').to_string(),
        };

        let entries: Vec<(String, FileKind)> = match routed.domain {
            MountDomain::Local => {
                let tree = self.local.tree();
                if !tree.is_directory(routed.relative) {
                    return Err(BridgeError::not_found(path));
                }
                tree.descendants(routed.relative)
                    .map(|(rest, kind)| (rest.to_string(), kind))
                    .collect()
            }
            MountDomain::Native | MountDomain::Remote => {
                let Some(adapter) = self.adapter(routed.domain).filter(|a| a.is_active()) else {
                    return Err(BridgeError::NoMount(routed.domain));
                };
                adapter
                    .list(routed.relative)
                    .await?
                    .into_iter()
                    .map(|e| (e.name, e.kind))
                    .collect()
            }
            MountDomain::Default => {
                return Err(BridgeError::Unsupported {
                    op: "catalog",
                    domain: MountDomain::Default,
                })
            }
        };

        let mut catalog: Vec<CatalogEntry> = entries
            .into_iter()
            .filter_map(|(rest, kind)| {
                let name = rest.rsplit('/').next().unwrap_or(&rest).to_string();
                if matcher.as_ref().is_some_and(|re| !re.is_match(&name)) {
                    return None;
                }
                Some(CatalogEntry {
                    name,
                    path: join(&base, &rest),
                    is_directory: kind == FileKind::Directory,
                })
            })
            .collect();
        catalog.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(catalog)
    }

    pub fn status(&self) -> BridgeStatus {
        let registry = self.remote.registry();
        BridgeStatus {
            native_mount: self.native.mount_slot().name(),
            native_generation: self.native.mount_slot().generation(),
            local_files: self.local.tree().file_count(),
            repositories: registry
                .mounts()
                .map(|m| format!("{}@{}", m.key(), m.branch))
                .collect(),
            cached_listings: registry.cached_listings(),
            cached_files: registry.cached_files(),
        }
    }
}

/// Compile a `*`/`?` glob into an anchored regex; everything else is literal
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    let mut literal = String::new();
    for c in pattern.chars() {
        match c {
            '*' | '?' => {
                source.push_str(&regex::escape(&literal));
                literal.clear();
                source.push_str(if c == '*' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    source.push_str(&regex::escape(&literal));
    source.push('$');
    Regex::new(&source).map_err(|e| BridgeError::InvalidPath(format!("{pattern}: {e}")))
}
