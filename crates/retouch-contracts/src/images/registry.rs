use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use super::DisplayRef;
use crate::state::ImageItem;

/// Who is allowed to revoke a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Created from uploaded bytes; revoked when the last holder lets go.
    Registry,
    /// Derived from a provider result; tracked but never revoked, only
    /// forgotten.
    External,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub acquired: u64,
    pub adopted: u64,
    pub revoked: u64,
    pub forgotten: u64,
    pub live: usize,
}

#[derive(Debug)]
struct Tracked {
    bytes: Arc<[u8]>,
    ownership: Ownership,
    holders: usize,
}

/// Reference-counted display references.
///
/// Every holder (the current state, each history snapshot, an in-flight
/// request) takes one count with [`ImageRegistry::retain`] and gives it back
/// with [`ImageRegistry::release`]. A registry-owned reference is revoked
/// exactly once, when its count reaches zero or on [`ImageRegistry::teardown`].
/// Releasing a reference that is no longer tracked is a no-op.
#[derive(Debug)]
pub struct ImageRegistry {
    namespace: String,
    next_id: u64,
    entries: BTreeMap<DisplayRef, Tracked>,
    stats: RegistryStats,
}

impl Default for ImageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageRegistry {
    pub fn new() -> Self {
        Self {
            namespace: Uuid::new_v4().simple().to_string(),
            next_id: 0,
            entries: BTreeMap::new(),
            stats: RegistryStats::default(),
        }
    }

    /// Registers uploaded bytes. The caller holds the initial count.
    pub fn acquire(&mut self, bytes: impl Into<Arc<[u8]>>, name: impl Into<String>) -> ImageItem {
        let bytes = bytes.into();
        let display = self.track("blob", bytes.clone(), Ownership::Registry);
        self.stats.acquired += 1;
        ImageItem {
            raw: Some(bytes),
            display,
            name: name.into(),
        }
    }

    /// Registers a generated image so it can become a new source. The caller
    /// holds the initial count; the reference is never revoked.
    pub fn adopt(&mut self, bytes: impl Into<Arc<[u8]>>, name: impl Into<String>) -> ImageItem {
        let display = self.track("result", bytes.into(), Ownership::External);
        self.stats.adopted += 1;
        ImageItem {
            raw: None,
            display,
            name: name.into(),
        }
    }

    /// Installs freshly uploaded bytes into `slot`, giving up the caller's
    /// count on the image that was there. Returns whether the old reference
    /// was still tracked.
    pub fn replace(
        &mut self,
        slot: &mut ImageItem,
        bytes: impl Into<Arc<[u8]>>,
        name: impl Into<String>,
    ) -> bool {
        let previous = slot.display.clone();
        *slot = self.acquire(bytes, name);
        self.release(&previous)
    }

    pub fn retain(&mut self, display: &DisplayRef) -> bool {
        match self.entries.get_mut(display) {
            Some(tracked) => {
                tracked.holders += 1;
                true
            }
            None => false,
        }
    }

    /// Drops one count. Returns false when the reference is not tracked
    /// (never created here, or already revoked).
    pub fn release(&mut self, display: &DisplayRef) -> bool {
        let Some(tracked) = self.entries.get_mut(display) else {
            return false;
        };
        tracked.holders = tracked.holders.saturating_sub(1);
        if tracked.holders == 0 {
            if let Some(tracked) = self.entries.remove(display) {
                self.retire(tracked.ownership);
            }
        }
        true
    }

    pub fn resolve(&self, display: &DisplayRef) -> Option<Arc<[u8]>> {
        self.entries.get(display).map(|tracked| tracked.bytes.clone())
    }

    pub fn holders(&self, display: &DisplayRef) -> usize {
        self.entries
            .get(display)
            .map(|tracked| tracked.holders)
            .unwrap_or(0)
    }

    pub fn ownership(&self, display: &DisplayRef) -> Option<Ownership> {
        self.entries.get(display).map(|tracked| tracked.ownership)
    }

    /// Revokes everything still outstanding. Returns how many registry-owned
    /// references were revoked.
    pub fn teardown(&mut self) -> usize {
        let mut revoked = 0;
        for (_, tracked) in std::mem::take(&mut self.entries) {
            if tracked.ownership == Ownership::Registry {
                revoked += 1;
            }
            self.retire(tracked.ownership);
        }
        revoked
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live: self.entries.len(),
            ..self.stats
        }
    }

    fn track(&mut self, scheme: &str, bytes: Arc<[u8]>, ownership: Ownership) -> DisplayRef {
        self.next_id += 1;
        let display = DisplayRef::new(format!(
            "{scheme}:retouch/{}/{}",
            self.namespace, self.next_id
        ));
        self.entries.insert(
            display.clone(),
            Tracked {
                bytes,
                ownership,
                holders: 1,
            },
        );
        display
    }

    fn retire(&mut self, ownership: Ownership) {
        match ownership {
            Ownership::Registry => self.stats.revoked += 1,
            Ownership::External => self.stats.forgotten += 1,
        }
    }
}
