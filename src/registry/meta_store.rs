//! In-memory catalog of image metadata and repository tag tables, with the
//! staging area the three-phase push protocol writes through.

use std::{collections::HashMap, sync::Mutex};

pub(crate) type ImageId = String;
pub(crate) type TagName = String;

/// Holds `{images, tags}` for a `namespace/repository` pair. Tags may point
/// at image ids that were never pushed to this repository's `images` list;
/// clients are free to set them independently.
#[derive(Debug, Default, Clone)]
pub(crate) struct Repository {
    pub images: Vec<ImageId>,
    pub tags: HashMap<TagName, ImageId>,
}

#[derive(Debug, Default)]
struct Tables {
    // Staged (in-progress) fields.
    tmp_json: HashMap<ImageId, String>,
    tmp_checksum: HashMap<ImageId, String>,
    tmp_size: HashMap<ImageId, i64>,
    tmp_ancestry: HashMap<ImageId, ImageId>,

    // Committed fields.
    json: HashMap<ImageId, String>,
    checksum: HashMap<ImageId, String>,
    size: HashMap<ImageId, i64>,
    ancestry: HashMap<ImageId, ImageId>,

    repositories: HashMap<String, Repository>,
}

/// In-memory catalog of image metadata and repository tag tables.
///
/// All operations are synchronous and infallible: set operations always
/// succeed (this is an in-memory map), and reads report presence via a
/// found-flag rather than an error.
#[derive(Debug, Default)]
pub(crate) struct MetaStore {
    tables: Mutex<Tables>,
}

fn repo_key(namespace: &str, repository: &str) -> String {
    format!("{namespace}/{repository}")
}

impl MetaStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_tmp_image_json(&self, id: &str, json: String) {
        self.tables.lock().unwrap().tmp_json.insert(id.to_owned(), json);
    }

    pub(crate) fn tmp_image_json(&self, id: &str) -> Option<String> {
        self.tables.lock().unwrap().tmp_json.get(id).cloned()
    }

    pub(crate) fn set_tmp_checksum(&self, id: &str, checksum: String) {
        self.tables
            .lock()
            .unwrap()
            .tmp_checksum
            .insert(id.to_owned(), checksum);
    }

    pub(crate) fn tmp_checksum(&self, id: &str) -> Option<String> {
        self.tables.lock().unwrap().tmp_checksum.get(id).cloned()
    }

    pub(crate) fn set_tmp_size(&self, id: &str, size: i64) {
        self.tables.lock().unwrap().tmp_size.insert(id.to_owned(), size);
    }

    pub(crate) fn set_tmp_ancestry(&self, id: &str, parent: &str) {
        self.tables
            .lock()
            .unwrap()
            .tmp_ancestry
            .insert(id.to_owned(), parent.to_owned());
    }

    pub(crate) fn image_json(&self, id: &str) -> Option<String> {
        self.tables.lock().unwrap().json.get(id).cloned()
    }

    pub(crate) fn checksum(&self, id: &str) -> Option<String> {
        self.tables.lock().unwrap().checksum.get(id).cloned()
    }

    pub(crate) fn size(&self, id: &str) -> Option<i64> {
        self.tables.lock().unwrap().size.get(id).copied()
    }

    /// Walks committed ancestry starting at `id`, terminating at the first
    /// image with no recorded parent. Always returns at least `[id]`, even
    /// for an `id` with no committed record at all — callers distinguish
    /// "unknown image" via a prior `image_json` lookup.
    pub(crate) fn ancestry(&self, id: &str) -> Vec<ImageId> {
        let tables = self.tables.lock().unwrap();
        let mut chain = vec![id.to_owned()];
        let mut current = id.to_owned();
        while let Some(parent) = tables.ancestry.get(&current) {
            chain.push(parent.clone());
            current = parent.clone();
        }
        chain
    }

    pub(crate) fn tag(&self, namespace: &str, repository: &str, tag: &str) -> Option<ImageId> {
        self.tables
            .lock()
            .unwrap()
            .repositories
            .get(&repo_key(namespace, repository))
            .and_then(|repo| repo.tags.get(tag).cloned())
    }

    pub(crate) fn tags(&self, namespace: &str, repository: &str) -> Option<HashMap<TagName, ImageId>> {
        self.tables
            .lock()
            .unwrap()
            .repositories
            .get(&repo_key(namespace, repository))
            .filter(|repo| !repo.tags.is_empty())
            .map(|repo| repo.tags.clone())
    }

    pub(crate) fn set_tag(&self, namespace: &str, repository: &str, id: &str, tag: &str) {
        self.tables
            .lock()
            .unwrap()
            .repositories
            .entry(repo_key(namespace, repository))
            .or_default()
            .tags
            .insert(tag.to_owned(), id.to_owned());
    }

    pub(crate) fn images(&self, namespace: &str, repository: &str) -> Option<Vec<ImageId>> {
        self.tables
            .lock()
            .unwrap()
            .repositories
            .get(&repo_key(namespace, repository))
            .map(|repo| repo.images.clone())
    }

    pub(crate) fn set_images(&self, namespace: &str, repository: &str, images: Vec<ImageId>) {
        self.tables
            .lock()
            .unwrap()
            .repositories
            .entry(repo_key(namespace, repository))
            .or_default()
            .images = images;
    }

    /// Requires `tmp_json`, `tmp_checksum`, and `tmp_size` to all be present;
    /// ancestry is optional. On success, copies all staged fields into the
    /// committed maps and removes the staged entries atomically with respect
    /// to any other caller of this store (single mutex). Returns `false`,
    /// leaving all state untouched, if a required field is missing.
    pub(crate) fn commit_tmp_image(&self, id: &str) -> bool {
        let mut tables = self.tables.lock().unwrap();

        let Some(json) = tables.tmp_json.get(id).cloned() else {
            return false;
        };
        let Some(checksum) = tables.tmp_checksum.get(id).cloned() else {
            return false;
        };
        let Some(size) = tables.tmp_size.get(id).copied() else {
            return false;
        };
        let ancestry = tables.tmp_ancestry.get(id).cloned();

        tables.json.insert(id.to_owned(), json);
        tables.checksum.insert(id.to_owned(), checksum);
        tables.size.insert(id.to_owned(), size);
        if let Some(parent) = &ancestry {
            tables.ancestry.insert(id.to_owned(), parent.clone());
        }

        tables.tmp_json.remove(id);
        tables.tmp_checksum.remove(id);
        tables.tmp_size.remove(id);
        tables.tmp_ancestry.remove(id);

        true
    }

    /// Removes every staged field for `id`. Idempotent; always returns `true`.
    pub(crate) fn discard_tmp_image(&self, id: &str) -> bool {
        let mut tables = self.tables.lock().unwrap();
        tables.tmp_json.remove(id);
        tables.tmp_checksum.remove(id);
        tables.tmp_size.remove(id);
        tables.tmp_ancestry.remove(id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::MetaStore;

    #[test]
    fn commit_requires_all_three_tmp_fields() {
        let store = MetaStore::new();
        store.set_tmp_image_json("aaa", "{}".to_owned());
        store.set_tmp_size("aaa", 5);
        // No checksum staged yet.
        assert!(!store.commit_tmp_image("aaa"));
        assert!(store.image_json("aaa").is_none());

        store.set_tmp_checksum("aaa", "deadbeef".to_owned());
        assert!(store.commit_tmp_image("aaa"));
        assert_eq!(store.image_json("aaa").as_deref(), Some("{}"));
        assert_eq!(store.size("aaa"), Some(5));
        // Staged state is gone after commit.
        assert!(store.tmp_image_json("aaa").is_none());
    }

    #[test]
    fn discard_is_idempotent_and_infallible() {
        let store = MetaStore::new();
        assert!(store.discard_tmp_image("nonexistent"));
        store.set_tmp_image_json("aaa", "{}".to_owned());
        assert!(store.discard_tmp_image("aaa"));
        assert!(store.discard_tmp_image("aaa"));
        assert!(store.tmp_image_json("aaa").is_none());
    }

    #[test]
    fn ancestry_walks_parent_chain_and_defaults_to_self() {
        let store = MetaStore::new();
        assert_eq!(store.ancestry("unknown"), vec!["unknown".to_owned()]);

        store.set_tmp_image_json("aaa", "{}".to_owned());
        store.set_tmp_checksum("aaa", "c1".to_owned());
        store.set_tmp_size("aaa", 1);
        assert!(store.commit_tmp_image("aaa"));

        store.set_tmp_image_json("bbb", "{}".to_owned());
        store.set_tmp_checksum("bbb", "c2".to_owned());
        store.set_tmp_size("bbb", 1);
        store.set_tmp_ancestry("bbb", "aaa");
        assert!(store.commit_tmp_image("bbb"));

        assert_eq!(
            store.ancestry("bbb"),
            vec!["bbb".to_owned(), "aaa".to_owned()]
        );
    }

    #[test]
    fn tags_are_independent_of_images_list() {
        let store = MetaStore::new();
        store.set_tag("alice", "app", "aaa", "latest");
        assert_eq!(store.tag("alice", "app", "latest").as_deref(), Some("aaa"));
        // Images list was never set, but the tag still resolves.
        assert!(store.images("alice", "app").unwrap().is_empty());
    }
}
