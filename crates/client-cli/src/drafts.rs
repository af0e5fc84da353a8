//! Unsent form contents persisted between runs.

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::path::PathBuf;

pub struct DraftStore {
    dir: PathBuf,
}

impl DraftStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, form: &str) -> PathBuf {
        self.dir.join(format!("{}.json", form))
    }

    /// A saved draft; corrupted content is deleted and treated as absent
    pub fn load<T: DeserializeOwned>(&self, form: &str) -> Option<T> {
        let path = self.path(form);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(draft) => Some(draft),
            Err(e) => {
                tracing::warn!("Discarding corrupted draft {}: {}", path.display(), e);
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!("Failed to remove {}: {}", path.display(), e);
                }
                None
            }
        }
    }

    pub fn load_or_default<T: DeserializeOwned + Default>(&self, form: &str) -> T {
        self.load(form).unwrap_or_default()
    }

    pub fn save<T: Serialize>(&self, form: &str, draft: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path(form), serde_json::to_string_pretty(draft)?)?;
        Ok(())
    }

    pub fn clear(&self, form: &str) {
        let path = self.path(form);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::NewLead;

    fn store() -> DraftStore {
        DraftStore::new(std::env::temp_dir().join(format!("crm-drafts-{}", uuid::Uuid::new_v4())))
    }

    #[test]
    fn test_saved_draft_is_restored() {
        let store = store();
        let draft = NewLead {
            name: "Maria".to_string(),
            phone: Some("+55 11 99999-0000".to_string()),
            ..Default::default()
        };
        store.save("lead", &draft).unwrap();

        let restored: NewLead = store.load("lead").unwrap();
        assert_eq!(restored, draft);

        store.clear("lead");
        assert!(store.load::<NewLead>("lead").is_none());
    }

    #[test]
    fn test_corrupted_draft_is_discarded() {
        let store = store();
        std::fs::create_dir_all(&store.dir).unwrap();
        std::fs::write(store.path("lead"), "{not json").unwrap();

        let draft: NewLead = store.load_or_default("lead");
        assert_eq!(draft, NewLead::default());
        assert!(!store.path("lead").exists());
    }

    #[test]
    fn test_missing_draft_is_none() {
        assert!(store().load::<NewLead>("nothing").is_none());
    }
}
