#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod any;
mod cached;
pub mod decode;
mod lister;
pub mod reader;
mod registry;

pub use self::{any::AnyGetter, cached::CachedIpLister, lister::IpLister, registry::IpGetters};

/// The GitHub metadata endpoint publishing webhook source ranges.
pub const GITHUB_META_URL: &str = "https://api.github.com/meta";

/// The stock pipeline for GitHub's webhook ranges.
pub fn github_meta() -> IpLister {
    IpLister::new(reader::HttpReader::new(GITHUB_META_URL), decode::GithubMeta)
}
