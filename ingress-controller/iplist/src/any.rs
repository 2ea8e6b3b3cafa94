use anyhow::Result;
use events_ingress_controller_core::IpGetter;

/// Matches every source address. Intended for debug and testing use only.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnyGetter;

#[async_trait::async_trait]
impl IpGetter for AnyGetter {
    async fn get_ips(&self) -> Result<Vec<String>> {
        Ok(vec!["0.0.0.0/0".to_string(), "::/0".to_string()])
    }
}
