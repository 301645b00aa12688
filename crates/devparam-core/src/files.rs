//! File-id registry: provider-owned files plus short-lived upload ids.
//! Upload ids lapse lazily — any file-API call expires every lapsed entry
//! except the one being heartbeated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use devparam_domain::{FileId, ParameterInstanceId};
use devparam_provider::{CallMode, FileProvider, ParameterProvider, SerialLane};

#[derive(Clone)]
pub struct FileEntry {
    pub provider: Arc<dyn FileProvider>,
    pub lane: Option<SerialLane>,
    /// Definition id of the parameter whose contents this file carries.
    pub context_parameter_id: Option<u32>,
}

#[derive(Clone)]
pub struct UploadEntry {
    pub target: Arc<dyn FileProvider>,
    pub context: ParameterInstanceId,
    pub creator: Arc<dyn ParameterProvider>,
    pub timeout_seconds: u16,
    pub last_access: Instant,
}

/// A successful file-id lookup.
pub enum FileLookup {
    Registered(FileEntry),
    Upload(UploadEntry),
}

pub struct FileRegistry {
    entries: HashMap<FileId, FileEntry>,
    uploads: HashMap<FileId, UploadEntry>,
}

impl FileRegistry {
    pub fn new() -> Self {
        FileRegistry {
            entries: HashMap::new(),
            uploads: HashMap::new(),
        }
    }

    pub fn generate_file_id() -> FileId {
        FileId::new(Uuid::new_v4().to_string())
    }

    /// Register a provider-owned file. A caller-specified id re-binds that id
    /// (re-registration); otherwise a fresh id is generated.
    pub fn register(
        &mut self,
        file_id: Option<FileId>,
        provider: Arc<dyn FileProvider>,
        mode: CallMode,
        context_parameter_id: Option<u32>,
    ) -> FileId {
        let file_id = file_id.unwrap_or_else(Self::generate_file_id);
        let lane = match mode {
            CallMode::Serialized => Some(Arc::new(tokio::sync::Mutex::new(()))),
            CallMode::Concurrent => None,
        };
        self.entries.insert(
            file_id.clone(),
            FileEntry {
                provider,
                lane,
                context_parameter_id,
            },
        );
        file_id
    }

    /// Drop every registration owned by this provider object.
    pub fn unregister_provider(&mut self, provider: &Arc<dyn FileProvider>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !Arc::ptr_eq(&entry.provider, provider));
        before - self.entries.len()
    }

    pub fn add_upload(
        &mut self,
        target: Arc<dyn FileProvider>,
        context: ParameterInstanceId,
        creator: Arc<dyn ParameterProvider>,
        timeout_seconds: u16,
        now: Instant,
    ) -> FileId {
        let file_id = Self::generate_file_id();
        self.uploads.insert(
            file_id.clone(),
            UploadEntry {
                target,
                context,
                creator,
                timeout_seconds,
                last_access: now,
            },
        );
        file_id
    }

    /// Expire lapsed upload ids, sparing the one being touched right now.
    /// Returns the expired entries so creators can be notified.
    pub fn expire_lapsed_except(
        &mut self,
        heartbeat: Option<&FileId>,
        now: Instant,
    ) -> Vec<(FileId, UploadEntry)> {
        let lapsed: Vec<FileId> = self
            .uploads
            .iter()
            .filter(|(id, entry)| {
                Some(*id) != heartbeat
                    && now.duration_since(entry.last_access).as_secs()
                        > u64::from(entry.timeout_seconds)
            })
            .map(|(id, _)| id.clone())
            .collect();
        lapsed
            .into_iter()
            .filter_map(|id| self.uploads.remove(&id).map(|e| (id, e)))
            .collect()
    }

    /// Resolve a file id, refreshing an upload id's heartbeat. An upload id
    /// whose own timeout already lapsed is dropped, not refreshed.
    pub fn lookup(&mut self, id: &FileId, now: Instant) -> Option<FileLookup> {
        if let Some(entry) = self.entries.get(id) {
            return Some(FileLookup::Registered(entry.clone()));
        }
        let upload = self.uploads.get_mut(id)?;
        if now.duration_since(upload.last_access).as_secs() > u64::from(upload.timeout_seconds) {
            self.uploads.remove(id);
            return None;
        }
        upload.last_access = now;
        Some(FileLookup::Upload(upload.clone()))
    }

    pub fn remove_upload(&mut self, id: &FileId) -> Option<UploadEntry> {
        self.uploads.remove(id)
    }

    /// `(feature-agnostic)` context of a file id: the definition id behind a
    /// registered file, or the context parameter of an upload.
    pub fn context_of(&self, id: &FileId) -> Option<u32> {
        if let Some(entry) = self.entries.get(id) {
            return entry.context_parameter_id;
        }
        self.uploads.get(id).map(|u| u.context.parameter_id)
    }

    pub fn has_file_id(&self, id: &FileId) -> bool {
        self.entries.contains_key(id) || self.uploads.contains_key(id)
    }
}

impl Default for FileRegistry {
    fn default() -> Self {
        FileRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devparam_domain::ParameterSelector;
    use devparam_provider::testing::{InMemoryFileProvider, StaticParameterProvider};

    fn creator() -> Arc<dyn ParameterProvider> {
        Arc::new(StaticParameterProvider::new("creator", vec![
            ParameterSelector::AllWithDefinitionId(1),
        ]))
    }

    #[test]
    fn upload_heartbeat_is_spared_by_expiry() {
        let mut registry = FileRegistry::new();
        let target: Arc<dyn FileProvider> = Arc::new(InMemoryFileProvider::new(vec![]));
        let now = Instant::now();
        let kept = registry.add_upload(
            target.clone(),
            ParameterInstanceId::headstation(1),
            creator(),
            1,
            now,
        );
        let dropped = registry.add_upload(
            target,
            ParameterInstanceId::headstation(1),
            creator(),
            1,
            now,
        );

        let later = now + std::time::Duration::from_millis(2100);
        let expired = registry.expire_lapsed_except(Some(&kept), later);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, dropped);
        assert!(registry.has_file_id(&kept));
        assert!(!registry.has_file_id(&dropped));
    }

    #[test]
    fn lookup_refreshes_upload_access() {
        let mut registry = FileRegistry::new();
        let target: Arc<dyn FileProvider> = Arc::new(InMemoryFileProvider::new(vec![]));
        let now = Instant::now();
        let id = registry.add_upload(
            target,
            ParameterInstanceId::headstation(1),
            creator(),
            1,
            now,
        );

        let at_800ms = now + std::time::Duration::from_millis(800);
        assert!(registry.lookup(&id, at_800ms).is_some());

        // 1.9s after creation but only 1.1s after the refresh
        let at_1900ms = now + std::time::Duration::from_millis(1900);
        assert!(registry.expire_lapsed_except(None, at_1900ms).is_empty());

        let at_3s = at_800ms + std::time::Duration::from_millis(2100);
        assert_eq!(registry.expire_lapsed_except(None, at_3s).len(), 1);
    }

    #[test]
    fn registered_ids_do_not_lapse() {
        let mut registry = FileRegistry::new();
        let provider: Arc<dyn FileProvider> = Arc::new(InMemoryFileProvider::new(vec![1]));
        let id = registry.register(None, provider, CallMode::Concurrent, Some(7));
        let far_future = Instant::now() + std::time::Duration::from_secs(3600);
        assert!(registry.expire_lapsed_except(None, far_future).is_empty());
        assert!(matches!(
            registry.lookup(&id, far_future),
            Some(FileLookup::Registered(_))
        ));
        assert_eq!(registry.context_of(&id), Some(7));
    }

    #[test]
    fn explicit_id_rebinds() {
        let mut registry = FileRegistry::new();
        let first: Arc<dyn FileProvider> = Arc::new(InMemoryFileProvider::new(vec![1]));
        let second: Arc<dyn FileProvider> = Arc::new(InMemoryFileProvider::new(vec![2]));
        let id = registry.register(None, first.clone(), CallMode::Concurrent, None);
        registry.register(Some(id.clone()), second.clone(), CallMode::Concurrent, None);
        match registry.lookup(&id, Instant::now()).unwrap() {
            FileLookup::Registered(entry) => assert!(Arc::ptr_eq(&entry.provider, &second)),
            FileLookup::Upload(_) => panic!("expected registered entry"),
        }
    }
}
