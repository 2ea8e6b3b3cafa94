use anyhow::Result;
use events_ingress_controller_core::IpGetter;
use parking_lot::RwLock;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A TTL cache over an IP-list getter.
///
/// Until the first successful fetch, every call fetches synchronously and
/// surfaces the error. Afterwards callers get an immediate snapshot; once the
/// sync interval has elapsed a detached refresh is dispatched whose failure
/// is logged and discarded, leaving the previous list in place. The sync
/// stamp advances on every attempt so a broken upstream is not hammered.
pub struct CachedIpLister {
    lister: Arc<dyn IpGetter>,
    state: Arc<RwLock<State>>,
    sync_interval: Duration,
}

#[derive(Default)]
struct State {
    ips: Vec<String>,
    last_sync: Option<Instant>,
    synced: bool,
}

impl CachedIpLister {
    pub fn new(lister: impl IpGetter + 'static) -> Self {
        Self {
            lister: Arc::new(lister),
            state: Arc::new(RwLock::new(State::default())),
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }

    pub fn with_sync_interval(mut self, sync_interval: Duration) -> Self {
        self.sync_interval = sync_interval;
        self
    }
}

#[async_trait::async_trait]
impl IpGetter for CachedIpLister {
    async fn get_ips(&self) -> Result<Vec<String>> {
        if !self.state.read().synced {
            self.state.write().last_sync = Some(Instant::now());
            let ips = self.lister.get_ips().await?;
            let mut state = self.state.write();
            state.ips.clone_from(&ips);
            state.synced = true;
            return Ok(ips);
        }

        let refresh = {
            let mut state = self.state.write();
            let elapsed = state
                .last_sync
                .is_none_or(|at| at.elapsed() >= self.sync_interval);
            if elapsed {
                state.last_sync = Some(Instant::now());
            }
            elapsed
        };

        if refresh {
            let lister = self.lister.clone();
            let state = self.state.clone();
            tokio::spawn(async move {
                match lister.get_ips().await {
                    Ok(ips) => state.write().ips = ips,
                    Err(error) => tracing::warn!(%error, "Background ip list refresh failed"),
                }
            });
        }

        Ok(self.state.read().ips.clone())
    }
}
