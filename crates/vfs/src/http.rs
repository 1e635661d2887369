//! Remote content API
//!
//! Two endpoints back the remote adapter: the metadata/listing endpoint
//! (`{api}/repos/{owner}/{repo}[/contents/{path}]?ref={branch}`) and the raw
//! endpoint (`{raw}/{owner}/{repo}/{branch}/{path}`). Responses are JSON for the
//! former and file bytes for the latter.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Url;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::error::{BridgeError, Result};

/// Repository metadata
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RepoInfo {
    pub default_branch: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    File,
    Dir,
    Symlink,
    Submodule,
    #[serde(other)]
    Other,
}

/// One item of a contents response
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ContentEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub download_url: Option<String>,
}

impl ContentEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == ContentKind::Dir
    }
}

/// The contents endpoint answers with an array for directories and a single
/// object for files.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ContentsResponse {
    Directory(Vec<ContentEntry>),
    File(ContentEntry),
}

#[async_trait(?Send)]
pub trait ContentApi {
    /// Validate a repository and fetch its metadata
    async fn repository(&self, owner: &str, repo: &str) -> Result<RepoInfo>;

    /// Contents endpoint for `path` (empty for the repository root)
    async fn contents(&self, owner: &str, repo: &str, branch: &str, path: &str)
        -> Result<ContentsResponse>;

    /// Raw file bytes
    async fn raw(&self, owner: &str, repo: &str, branch: &str, path: &str) -> Result<Bytes>;
}

/// `reqwest`-backed content API
pub struct HttpContentApi {
    client: reqwest::Client,
    api_base: String,
    raw_base: String,
}

impl HttpContentApi {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(BridgeError::transport)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let builder = reqwest::Client::builder().default_headers(headers);
        #[cfg(not(target_arch = "wasm32"))]
        let builder = builder
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str());

        Ok(Self {
            client: builder.build()?,
            api_base: config.api_base.clone(),
            raw_base: config.raw_base.clone(),
        })
    }

    pub(crate) fn repository_url(&self, owner: &str, repo: &str) -> Result<Url> {
        endpoint(&self.api_base, ["repos", owner, repo])
    }

    pub(crate) fn contents_url(&self, owner: &str, repo: &str, branch: &str, path: &str) -> Result<Url> {
        let mut url = endpoint(
            &self.api_base,
            ["repos", owner, repo, "contents"]
                .into_iter()
                .chain(path.split('/').filter(|s| !s.is_empty())),
        )?;
        url.query_pairs_mut().append_pair("ref", branch);
        Ok(url)
    }

    pub(crate) fn raw_url(&self, owner: &str, repo: &str, branch: &str, path: &str) -> Result<Url> {
        endpoint(
            &self.raw_base,
            [owner, repo]
                .into_iter()
                .chain(branch.split('/'))
                .chain(path.split('/').filter(|s| !s.is_empty())),
        )
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response> {
        debug!(url = %url, "remote request");
        Ok(self.client.get(url).send().await?.error_for_status()?)
    }
}

fn endpoint<'a>(base: &str, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
    let mut url = Url::parse(base).map_err(|e| BridgeError::InvalidPath(format!("{base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| BridgeError::InvalidPath(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[async_trait(?Send)]
impl ContentApi for HttpContentApi {
    async fn repository(&self, owner: &str, repo: &str) -> Result<RepoInfo> {
        let response = self.get(self.repository_url(owner, repo)?).await?;
        Ok(response.json().await?)
    }

    async fn contents(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        path: &str,
    ) -> Result<ContentsResponse> {
        let response = self.get(self.contents_url(owner, repo, branch, path)?).await?;
        Ok(response.json().await?)
    }

    async fn raw(&self, owner: &str, repo: &str, branch: &str, path: &str) -> Result<Bytes> {
        let response = self.get(self.raw_url(owner, repo, branch, path)?).await?;
        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> HttpContentApi {
        HttpContentApi::new(&RemoteConfig::default()).unwrap()
    }

    #[test]
    fn builds_contents_url_with_ref() {
        let url = api()
            .contents_url("octocat", "hello-world", "dev", "src/lib.rs")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/octocat/hello-world/contents/src/lib.rs?ref=dev"
        );
    }

    #[test]
    fn repo_root_contents_has_no_trailing_path() {
        let url = api().contents_url("o", "r", "main", "").unwrap();
        assert_eq!(url.as_str(), "https://api.github.com/repos/o/r/contents?ref=main");
    }

    #[test]
    fn builds_raw_url_and_escapes_segments() {
        let url = api().raw_url("o", "r", "main", "docs/read me.md").unwrap();
        assert_eq!(
            url.as_str(),
            "https://raw.githubusercontent.com/o/r/main/docs/read%20me.md"
        );
    }

    #[test]
    fn contents_response_shapes() {
        let dir: ContentsResponse = serde_json::from_str(
            r#"[{"name":"src","path":"src","type":"dir","size":0},
                {"name":"a.txt","path":"a.txt","type":"file","size":12}]"#,
        )
        .unwrap();
        let ContentsResponse::Directory(entries) = dir else {
            panic!("expected a listing");
        };
        assert!(entries[0].is_dir());
        assert_eq!(entries[1].size, 12);

        let file: ContentsResponse =
            serde_json::from_str(r#"{"name":"a.txt","path":"a.txt","type":"file","size":12}"#).unwrap();
        assert!(matches!(file, ContentsResponse::File(e) if e.size == 12));
    }

    #[test]
    fn unknown_entry_types_are_tolerated() {
        let entry: ContentEntry =
            serde_json::from_str(r#"{"name":"x","path":"x","type":"weird"}"#).unwrap();
        assert_eq!(entry.kind, ContentKind::Other);
        assert_eq!(entry.size, 0);
    }
}
