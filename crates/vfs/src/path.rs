//! Path router
//!
//! Classifies a runtime path into the mount domain that should serve it and
//! strips the routing prefix. Routing is a pure function of the path and the
//! configured prefixes; nothing is cached between calls.
//!
//! | Path                         | Domain    | Relative         |
//! |------------------------------|-----------|------------------|
//! | `""`, `/`                    | `Default` | `""` (root)      |
//! | `/files`, `/files/a/b.tif`   | `Native`  | `""`, `a/b.tif`  |
//! | `/local/x.png`               | `Local`   | `x.png`          |
//! | `/github/o/r/README.md`      | `Remote`  | `o/r/README.md`  |
//! | `/.java/prefs`, `/C:\\x`     | `Default` | unchanged        |
//! | `/other/file.txt`            | `Native`  | `other/file.txt` |

use std::fmt;

use crate::config::MountConfig;

/// Storage domain a path belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountDomain {
    /// Directory granted through a capability handle
    Native,
    /// Drag-and-dropped files held in memory
    Local,
    /// Remote source-hosting repositories
    Remote,
    /// The runtime's own storage driver
    Default,
}

impl fmt::Display for MountDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Native => "native",
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Default => "default",
        })
    }
}

/// Result of routing one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutedPath<'a> {
    pub domain: MountDomain,
    /// Path relative to the domain's root, without the routing prefix
    pub relative: &'a str,
    /// The runtime's own root (`""` or `/`)
    pub runtime_root: bool,
}

impl RoutedPath<'_> {
    /// Whether the relative path addresses the backend root
    pub fn is_root(&self) -> bool {
        self.relative.trim_matches('/').is_empty()
    }
}

/// Maps runtime paths onto mount domains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRouter {
    native_prefix: String,
    local_prefix: String,
    remote_prefix: String,
}

impl Default for PathRouter {
    fn default() -> Self {
        Self::from_config(&MountConfig::default())
    }
}

impl PathRouter {
    pub fn from_config(mounts: &MountConfig) -> Self {
        Self {
            native_prefix: mounts.native_prefix.trim_end_matches('/').to_string(),
            local_prefix: mounts.local_prefix.trim_end_matches('/').to_string(),
            remote_prefix: mounts.remote_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Prefix a domain is mounted at (`Default` has none)
    pub fn prefix(&self, domain: MountDomain) -> Option<&str> {
        match domain {
            MountDomain::Native => Some(&self.native_prefix),
            MountDomain::Local => Some(&self.local_prefix),
            MountDomain::Remote => Some(&self.remote_prefix),
            MountDomain::Default => None,
        }
    }

    /// Classify `path`. Never fails: anything unrecognized goes to `Default`.
    pub fn route<'a>(&self, path: &'a str) -> RoutedPath<'a> {
        if path.is_empty() || path == "/" {
            return RoutedPath {
                domain: MountDomain::Default,
                relative: "",
                runtime_root: true,
            };
        }

        let prefixed = [
            (MountDomain::Native, self.native_prefix.as_str()),
            (MountDomain::Local, self.local_prefix.as_str()),
            (MountDomain::Remote, self.remote_prefix.as_str()),
        ];
        for (domain, prefix) in prefixed {
            if let Some(relative) = strip_mount(path, prefix) {
                return RoutedPath {
                    domain,
                    relative,
                    runtime_root: false,
                };
            }
        }

        // The runtime's private storage must reach the original driver untouched
        if path.starts_with("/.") || has_drive_letter(path) || !path.starts_with('/') {
            return RoutedPath {
                domain: MountDomain::Default,
                relative: path,
                runtime_root: false,
            };
        }

        RoutedPath {
            domain: MountDomain::Native,
            relative: &path[1..],
            runtime_root: false,
        }
    }
}

/// `/files` and `/files/...` match `/files`; `/filesystem` does not.
fn strip_mount<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

/// `C:\` or `c:/` anywhere in the path
fn has_drive_letter(path: &str) -> bool {
    path.as_bytes()
        .windows(3)
        .any(|w| w[0].is_ascii_alphabetic() && w[1] == b':' && (w[2] == b'\\' || w[2] == b'/'))
}

/// Split a relative path into its non-empty segments
pub fn segments(relative: &str) -> Vec<&str> {
    relative.split('/').filter(|s| !s.is_empty()).collect()
}

/// Join a virtual directory path and an entry name
pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}
