use anyhow::{Context as _, Result};
use std::collections::BTreeMap;

/// Parses a feed body into a list of CIDR strings.
pub trait Decode: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<Vec<String>>;
}

/// The `https://api.github.com/meta` document.
#[derive(Clone, Copy, Debug, Default)]
pub struct GithubMeta;

#[derive(serde::Deserialize)]
struct GithubMetaDocument {
    #[serde(default)]
    hooks: Vec<String>,
}

impl Decode for GithubMeta {
    fn decode(&self, data: &[u8]) -> Result<Vec<String>> {
        let document: GithubMetaDocument =
            serde_json::from_slice(data).context("decoding github meta document")?;
        Ok(document.hooks)
    }
}

/// An office-IPs JSON feed: `{"office_ips": [{"cidr": ...}]}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfficeIps;

#[derive(serde::Deserialize)]
struct OfficeIp {
    cidr: String,
}

#[derive(serde::Deserialize)]
struct OfficeIpsDocument {
    #[serde(default)]
    office_ips: Vec<OfficeIp>,
}

impl Decode for OfficeIps {
    fn decode(&self, data: &[u8]) -> Result<Vec<String>> {
        let document: OfficeIpsDocument =
            serde_json::from_slice(data).context("decoding office ips document")?;
        Ok(document.office_ips.into_iter().map(|ip| ip.cidr).collect())
    }
}

/// A YAML file of named CIDR lists under an `iplists` key. Returns the
/// concatenation of the configured sources, in construction order; names
/// absent from the file are skipped.
#[derive(Clone, Debug)]
pub struct IpListsFile {
    sources: Vec<String>,
}

#[derive(serde::Deserialize)]
struct IpListsDocument {
    #[serde(default)]
    iplists: BTreeMap<String, Vec<String>>,
}

impl IpListsFile {
    pub fn new(sources: Vec<String>) -> Self {
        Self { sources }
    }
}

impl Decode for IpListsFile {
    fn decode(&self, data: &[u8]) -> Result<Vec<String>> {
        let document: IpListsDocument =
            serde_yaml::from_slice(data).context("decoding iplists document")?;
        Ok(self
            .sources
            .iter()
            .filter_map(|source| document.iplists.get(source).cloned())
            .flatten()
            .collect())
    }
}
