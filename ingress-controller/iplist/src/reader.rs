use anyhow::{Context as _, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};

/// Produces the raw bytes of an IP-list feed. No retries at this layer.
#[async_trait::async_trait]
pub trait Reader: Send + Sync {
    async fn data(&self) -> Result<Bytes>;
}

/// Fetches a feed with a single GET, optionally under basic authentication.
#[derive(Clone, Debug)]
pub struct HttpReader {
    client: reqwest::Client,
    url: String,
    basic_auth: Option<(String, String)>,
}

impl HttpReader {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            basic_auth: None,
        }
    }

    /// Credentials are applied only when at least one of them is non-empty.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let (username, password) = (username.into(), password.into());
        if !username.is_empty() || !password.is_empty() {
            self.basic_auth = Some((username, password));
        }
        self
    }
}

#[async_trait::async_trait]
impl Reader for HttpReader {
    async fn data(&self) -> Result<Bytes> {
        let mut request = self.client.get(&self.url);
        if let Some((username, password)) = &self.basic_auth {
            request = request.basic_auth(username, Some(password));
        }
        let response = request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("fetching {}", self.url))?;
        Ok(response.bytes().await?)
    }
}

/// Reads a feed from a local file.
#[derive(Clone, Debug)]
pub struct FileReader {
    path: PathBuf,
}

impl FileReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait::async_trait]
impl Reader for FileReader {
    async fn data(&self) -> Result<Bytes> {
        let data = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        Ok(Bytes::from(data))
    }
}
