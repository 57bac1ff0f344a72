use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to download {url}: {message}")]
    Http { url: String, message: String },
    #[error("invalid JSON from {url}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unexpected response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache I/O failed")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Blocking HTTP GET.
pub trait Transport {
    /// Download `url`, streaming the response body into `sink`.
    fn get(&self, url: &str, sink: &mut dyn Write) -> Result<()>;
}

/// [`Transport`] on top of a `ureq` agent.
pub struct UreqTransport {
    agent: ureq::Agent,
    token: Option<String>,
}

impl UreqTransport {
    /// `token` is sent as `PRIVATE-TOKEN` header when set.
    pub fn new(token: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(concat!("git-mr/", env!("CARGO_PKG_VERSION")))
            .timeout_connect(Duration::from_secs(30))
            .build();
        Self { agent, token }
    }
}

impl Transport for UreqTransport {
    fn get(&self, url: &str, sink: &mut dyn Write) -> Result<()> {
        let mut request = self.agent.get(url).set("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.set("PRIVATE-TOKEN", token);
        }

        let response = request.call().map_err(|err| ApiError::Http {
            url: url.to_string(),
            message: err.to_string(),
        })?;

        io::copy(&mut response.into_reader(), sink)?;
        Ok(())
    }
}

/// JSON API client with an on-disk cache.
///
/// Every response is stored pretty-printed in `cache_dir`, in a file named
/// after the SHA-256 of the request URL. Cached entries never expire; they
/// are only replaced when a caller asks to bypass the cache.
pub struct ApiClient<'a> {
    base_url: String,
    cache_dir: PathBuf,
    transport: &'a dyn Transport,
}

impl<'a> ApiClient<'a> {
    pub fn new(
        base_url: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
        transport: &'a dyn Transport,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            cache_dir: cache_dir.into(),
            transport,
        }
    }

    pub fn url(&self, pathname: &str) -> String {
        format!("{}{}", self.base_url, pathname)
    }

    /// Location of the cache entry for `url`.
    pub fn cache_file(&self, url: &str) -> PathBuf {
        self.cache_dir.join(cache_key(url))
    }

    /// Fetch `pathname` below the API base URL and parse it as JSON.
    ///
    /// Served from the cache when an entry exists, unless `no_cache` is set.
    pub fn fetch(&self, pathname: &str, no_cache: bool) -> Result<serde_json::Value> {
        let url = self.url(pathname);
        let cache_file = self.cache_file(&url);

        if cache_file.exists() && !no_cache {
            debug!("Download {} (cached)", url);
        } else {
            info!("Download {}", url);
            fs::create_dir_all(&self.cache_dir)?;
            self.download(&url, &cache_file)?;
        }

        debug!(" -> {}", cache_file.display());
        let reader = BufReader::new(File::open(&cache_file)?);
        serde_json::from_reader(reader).map_err(|source| ApiError::Json { url, source })
    }

    /// Like [`ApiClient::fetch`], decoded into `T`.
    pub fn fetch_as<T: DeserializeOwned>(&self, pathname: &str, no_cache: bool) -> Result<T> {
        let value = self.fetch(pathname, no_cache)?;
        serde_json::from_value(value).map_err(|source| ApiError::Decode {
            url: self.url(pathname),
            source,
        })
    }

    /// Download into a temp file next to the cache entry, then swap it in.
    /// Nothing replaces `cache_file` unless the body parsed as JSON.
    fn download(&self, url: &str, cache_file: &Path) -> Result<()> {
        let mut raw = NamedTempFile::new_in(&self.cache_dir)?;
        {
            let mut writer = BufWriter::new(raw.as_file_mut());
            self.transport.get(url, &mut writer)?;
            writer.flush()?;
        }

        raw.as_file_mut().rewind()?;
        let parsed: serde_json::Value = serde_json::from_reader(BufReader::new(raw.as_file()))
            .map_err(|source| ApiError::Json {
                url: url.to_string(),
                source,
            })?;

        let mut pretty = NamedTempFile::new_in(&self.cache_dir)?;
        serde_json::to_writer_pretty(&mut pretty, &parsed).map_err(|source| ApiError::Json {
            url: url.to_string(),
            source,
        })?;
        pretty.write_all(b"\n")?;
        pretty.persist(cache_file).map_err(|err| err.error)?;
        Ok(())
    }
}

/// Cache file name for a URL: hex SHA-256 of the URL string.
pub fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}
