use events_ingress_controller_core::IpGetter;
use std::{collections::HashMap, fmt, sync::Arc};

/// Maps a known-source annotation value to its CIDR provider.
///
/// Populated before the controller starts serving and read-only afterwards.
#[derive(Clone, Default)]
pub struct IpGetters(HashMap<String, Arc<dyn IpGetter>>);

impl IpGetters {
    pub fn insert(&mut self, source: impl Into<String>, getter: Arc<dyn IpGetter>) {
        self.0.insert(source.into(), getter);
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn IpGetter>> {
        self.0.get(source).cloned()
    }

    pub fn contains(&self, source: &str) -> bool {
        self.0.contains_key(source)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for IpGetters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}
