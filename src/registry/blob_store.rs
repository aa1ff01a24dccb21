//! Filesystem-backed layer storage: a tmp/committed separation per image id,
//! with a streaming SHA-256 hash computed over the upload.

use std::{
    os::unix::fs::{DirBuilderExt, OpenOptionsExt},
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

const CHUNK_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub(crate) enum BlobStoreError {
    #[error("layer not found")]
    NotFound,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Filesystem layout: `{datadir}/{id}_layer` (committed) and
/// `{datadir}/{id}_layer.tmp` (staging), each opened `0600`, under a
/// `0755` data directory. No subdirectory sharding.
#[derive(Debug)]
pub(crate) struct BlobStore {
    datadir: PathBuf,
}

impl BlobStore {
    pub(crate) fn new<P: AsRef<Path>>(datadir: P) -> std::io::Result<Self> {
        let datadir = datadir.as_ref().to_path_buf();
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(&datadir)?;
        Ok(Self { datadir })
    }

    fn layer_path(&self, id: &str) -> PathBuf {
        self.datadir.join(format!("{id}_layer"))
    }

    fn tmp_layer_path(&self, id: &str) -> PathBuf {
        self.datadir.join(format!("{id}_layer.tmp"))
    }

    /// Opens the committed layer read-only. Fails with `NotFound` if absent.
    pub(crate) async fn layer(&self, id: &str) -> Result<tokio::fs::File, BlobStoreError> {
        tokio::fs::OpenOptions::new()
            .read(true)
            .mode(0o600)
            .open(self.layer_path(id))
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => BlobStoreError::NotFound,
                _ => BlobStoreError::Io(err),
            })
    }

    /// Creates/truncates the tmp file for `id`, streams `reader` to disk in
    /// `CHUNK_SIZE`-byte chunks, and simultaneously feeds a SHA-256 hasher
    /// pre-seeded with `image_json + "\n"`. Returns the hex-encoded digest and
    /// the byte count of the streamed payload only — the JSON prefix
    /// contributes to the hash but not to the reported size.
    pub(crate) async fn set_tmp_layer<R>(
        &self,
        id: &str,
        image_json: &str,
        mut reader: R,
    ) -> Result<(String, u64), BlobStoreError>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(self.tmp_layer_path(id))
            .await?;

        let mut hasher = Sha256::new();
        hasher.update(image_json.as_bytes());
        hasher.update(b"\n");

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written: u64 = 0;

        loop {
            let read = reader.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            file.write_all(&buf[..read]).await?;
            hasher.update(&buf[..read]);
            written += read as u64;
        }

        file.flush().await?;

        Ok((hex::encode(hasher.finalize()), written))
    }

    /// Renames the tmp file onto the committed path, after probing that the
    /// tmp file exists. A second call (or a call with no staged tmp file)
    /// returns `false`.
    pub(crate) async fn commit_tmp_layer(&self, id: &str) -> bool {
        let tmp_path = self.tmp_layer_path(id);

        if tokio::fs::OpenOptions::new()
            .read(true)
            .mode(0o600)
            .open(&tmp_path)
            .await
            .is_err()
        {
            return false;
        }

        tokio::fs::rename(&tmp_path, self.layer_path(id))
            .await
            .is_ok()
    }

    /// Removes the tmp file for `id`. Returns `false` if absent.
    pub(crate) async fn discard_tmp_layer(&self, id: &str) -> bool {
        tokio::fs::remove_file(self.tmp_layer_path(id))
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::BlobStore;
    use sha2::{Digest, Sha256};
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn hash_seeds_with_json_prefix_and_reports_payload_size_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();

        let json = r#"{"id":"aaa","parent":""}"#;
        let payload = b"hello";

        let (checksum, size) = store
            .set_tmp_layer("aaa", json, &payload[..])
            .await
            .unwrap();

        assert_eq!(size, payload.len() as u64);

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hasher.update(b"\n");
        hasher.update(payload);
        assert_eq!(checksum, hex::encode(hasher.finalize()));
    }

    #[tokio::test]
    async fn commit_then_read_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();

        store
            .set_tmp_layer("aaa", "{}", &b"payload"[..])
            .await
            .unwrap();
        assert!(store.commit_tmp_layer("aaa").await);

        let mut file = store.layer("aaa").await.unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"payload");
    }

    #[tokio::test]
    async fn commit_without_staged_tmp_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        assert!(!store.commit_tmp_layer("missing").await);
    }

    #[tokio::test]
    async fn discard_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        assert!(!store.discard_tmp_layer("missing").await);

        store.set_tmp_layer("aaa", "{}", &b"x"[..]).await.unwrap();
        assert!(store.discard_tmp_layer("aaa").await);
        assert!(!store.discard_tmp_layer("aaa").await);
    }
}
