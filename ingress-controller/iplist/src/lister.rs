use crate::{decode::Decode, reader::Reader};
use anyhow::{Context as _, Result};
use events_ingress_controller_core::{validate_cidrs, IpGetter};
use std::time::Duration;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// A reader/decoder pipeline producing a validated CIDR list.
///
/// Each fetch is bounded by its own timeout, independent of the caller.
pub struct IpLister {
    reader: Box<dyn Reader>,
    decoder: Box<dyn Decode>,
    timeout: Duration,
}

impl IpLister {
    pub fn new(reader: impl Reader + 'static, decoder: impl Decode + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            decoder: Box::new(decoder),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl IpGetter for IpLister {
    async fn get_ips(&self) -> Result<Vec<String>> {
        let data = tokio::time::timeout(self.timeout, self.reader.data())
            .await
            .context("timed out fetching ip list")??;
        let ips = self.decoder.decode(&data)?;
        validate_cidrs(&ips)?;
        Ok(ips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use bytes::Bytes;

    struct StaticReader(&'static [u8]);

    #[async_trait::async_trait]
    impl Reader for StaticReader {
        async fn data(&self) -> Result<Bytes> {
            Ok(Bytes::from_static(self.0))
        }
    }

    struct FailingReader;

    #[async_trait::async_trait]
    impl Reader for FailingReader {
        async fn data(&self) -> Result<Bytes> {
            Err(anyhow!("connection refused"))
        }
    }

    struct HangingReader;

    #[async_trait::async_trait]
    impl Reader for HangingReader {
        async fn data(&self) -> Result<Bytes> {
            futures_never().await
        }
    }

    async fn futures_never() -> Result<Bytes> {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    #[tokio::test]
    async fn pipeline_reads_decodes_and_validates() {
        let lister = IpLister::new(
            StaticReader(br#"{"hooks": ["140.82.112.0/20"]}"#),
            crate::decode::GithubMeta,
        );
        assert_eq!(
            lister.get_ips().await.unwrap(),
            vec!["140.82.112.0/20".to_string()]
        );
    }

    #[tokio::test]
    async fn read_failure_aborts_the_pipeline() {
        let lister = IpLister::new(FailingReader, crate::decode::GithubMeta);
        let error = lister.get_ips().await.unwrap_err();
        assert!(error.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn decode_failure_aborts_the_pipeline() {
        let lister = IpLister::new(StaticReader(b"not json"), crate::decode::GithubMeta);
        assert!(lister.get_ips().await.is_err());
    }

    #[tokio::test]
    async fn invalid_cidrs_fail_validation() {
        let lister = IpLister::new(
            StaticReader(br#"{"hooks": ["not-a-cidr"]}"#),
            crate::decode::GithubMeta,
        );
        let error = lister.get_ips().await.unwrap_err();
        assert!(error.to_string().contains("not-a-cidr"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reads_are_bounded_by_the_timeout() {
        let lister =
            IpLister::new(HangingReader, crate::decode::GithubMeta).with_timeout(Duration::from_secs(1));
        let error = lister.get_ips().await.unwrap_err();
        assert!(error.to_string().contains("timed out"));
    }
}
