//! Upload ingestion.
//!
//! An upload moves through three steps:
//!
//! 1. the binary is staged at `unscanned/<id>.snap`;
//! 2. `begin_upload` records which snap and channels it is for;
//! 3. `process_upload` digests it, deduplicates against existing revisions,
//!    commits it to `snaps/<id>.snap`, extracts metadata and releases it.
//!
//! Processing an upload again after a failure picks up where the failed
//! attempt stopped; the upload record is only removed once it is released.

use bytes::Bytes;
use kebe_core::digest::READ_BUF_SIZE;
use kebe_core::{SnapDigest, StreamingDigest};
use kebe_store::{
    buckets, BlobStore, InsertResult, NewSnapRevision, NewSnapUpload, Repository, SnapEntry,
    SnapRevision,
};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::channels;
use crate::error::{KebeError, Result};
use crate::metadata::{MetadataError, MetadataExtractor, SnapYaml};

/// Status code reported once an upload has become a revision.
pub const READY_TO_RELEASE: &str = "ready_to_release";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadAccepted {
    pub success: bool,
    pub status_details_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// A new revision was created.
    Created,
    /// The bytes matched an existing revision of the snap.
    Deduplicated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataOutcome {
    Extracted(SnapYaml),
    /// Extraction failed; the revision was still created.
    Degraded(String),
    /// Not attempted because the upload was deduplicated or its revision
    /// was created by an earlier attempt.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadStatus {
    pub processed: bool,
    pub code: &'static str,
    pub revision: i64,
    pub outcome: IngestOutcome,
    pub metadata: MetadataOutcome,
}

fn object_key(up_down_id: &str) -> String {
    format!("{}.snap", up_down_id)
}

/// Stage a binary and return its upload correlator.
pub async fn stage_upload<B: BlobStore + ?Sized>(blobs: &B, data: Bytes) -> Result<String> {
    let up_down_id = uuid::Uuid::new_v4().to_string();
    let size = data.len();
    blobs
        .put(buckets::UNSCANNED, &object_key(&up_down_id), data)
        .await?;
    tracing::debug!(up_down_id = %up_down_id, size, "staged upload");
    Ok(up_down_id)
}

/// Record an upload of a staged binary to an existing snap.
pub async fn begin_upload<R, B>(
    repo: &R,
    blobs: &B,
    dashboard_url: &str,
    name: &str,
    up_down_id: &str,
    filesize: u64,
    channels: Vec<String>,
) -> Result<UploadAccepted>
where
    R: Repository + ?Sized,
    B: BlobStore + ?Sized,
{
    let snap = repo
        .snap_by_name(name)
        .await?
        .ok_or_else(|| KebeError::SnapNotFound(name.to_string()))?;

    channels::check_releasable(repo, &snap, &channels).await?;
    if !blobs
        .exists(buckets::UNSCANNED, &object_key(up_down_id))
        .await?
    {
        return Err(KebeError::UploadNotFound(up_down_id.to_string()));
    }

    let upload = repo
        .add_upload(&NewSnapUpload {
            up_down_id: up_down_id.to_string(),
            snap_entry: snap.id,
            filesize,
            channels,
        })
        .await?;
    tracing::info!(snap = %snap.name, up_down_id, channels = ?upload.channels, "upload accepted");

    Ok(UploadAccepted {
        success: true,
        status_details_url: format!("{}/dev/api/snap-status/{}", dashboard_url, up_down_id),
    })
}

/// Turn a staged upload into a revision.
pub async fn process_upload<R, B, M>(
    repo: &R,
    blobs: &B,
    extractor: &M,
    up_down_id: &str,
) -> Result<UploadStatus>
where
    R: Repository + ?Sized,
    B: BlobStore + ?Sized,
    M: MetadataExtractor + ?Sized,
{
    let upload = repo
        .upload_by_up_down_id(up_down_id)
        .await?
        .ok_or_else(|| KebeError::UploadNotFound(up_down_id.to_string()))?;
    let snap = repo
        .snap_by_id(upload.snap_entry)
        .await?
        .ok_or_else(|| KebeError::SnapNotFound(upload.snap_entry.to_string()))?;

    let key = object_key(up_down_id);
    let bucket = staged_bucket(blobs, &key).await?;
    let digest = digest_blob(blobs, bucket, &key).await?;
    if digest.size != upload.filesize {
        tracing::warn!(
            up_down_id,
            declared = upload.filesize,
            actual = digest.size,
            "upload size differs from declared size"
        );
    }

    let (revision, outcome, metadata) =
        match repo.revision_by_digest(snap.id, &digest.raw).await? {
            Some(existing) if existing.filename == key => {
                tracing::info!(
                    snap = %snap.name,
                    revision = existing.id,
                    "resuming upload whose revision already exists"
                );
                (existing, IngestOutcome::Created, MetadataOutcome::Skipped)
            }
            Some(existing) => {
                blobs.delete(bucket, &key).await?;
                tracing::info!(
                    snap = %snap.name,
                    revision = existing.id,
                    "duplicate upload, reusing revision"
                );
                (existing, IngestOutcome::Deduplicated, MetadataOutcome::Skipped)
            }
            None => commit(repo, blobs, extractor, &snap, bucket, &key, &digest).await?,
        };

    if !upload.channels.is_empty() {
        channels::release(repo, &snap, &upload.channels, &revision).await?;
    }
    repo.delete_upload(up_down_id).await?;

    Ok(UploadStatus {
        processed: true,
        code: READY_TO_RELEASE,
        revision: revision.id,
        outcome,
        metadata,
    })
}

async fn commit<R, B, M>(
    repo: &R,
    blobs: &B,
    extractor: &M,
    snap: &SnapEntry,
    bucket: &str,
    key: &str,
    digest: &SnapDigest,
) -> Result<(SnapRevision, IngestOutcome, MetadataOutcome)>
where
    R: Repository + ?Sized,
    B: BlobStore + ?Sized,
    M: MetadataExtractor + ?Sized,
{
    if bucket != buckets::SNAPS {
        blobs
            .move_object(bucket, key, buckets::SNAPS, key)
            .await?;
    }

    let metadata = extract_metadata(blobs, extractor, key).await;
    if let MetadataOutcome::Extracted(yaml) = &metadata {
        match yaml.to_metadata() {
            Ok(meta) if meta != snap.metadata() => {
                repo.update_snap_metadata(snap.id, &meta).await?;
                tracing::debug!(snap = %snap.name, snap_type = %meta.snap_type, "updated snap metadata");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(snap = %snap.name, error = %e, "ignoring snap metadata"),
        }
    }

    let inserted = repo
        .create_revision(&NewSnapRevision {
            snap_entry: snap.id,
            filename: key.to_string(),
            sha3_384: digest.raw.clone(),
            sha3_384_encoded: digest.encoded.clone(),
            size: digest.size,
        })
        .await?;

    match inserted {
        InsertResult::Inserted(revision) => {
            tracing::info!(
                snap = %snap.name,
                revision = revision.id,
                sha3_384 = %digest.encoded,
                size = digest.size,
                "created revision"
            );
            Ok((revision, IngestOutcome::Created, metadata))
        }
        InsertResult::AlreadyExists(revision) => {
            // lost a race with an identical upload
            if revision.filename != key {
                blobs.delete(buckets::SNAPS, key).await?;
            }
            tracing::info!(snap = %snap.name, revision = revision.id, "concurrent duplicate upload");
            Ok((revision, IngestOutcome::Deduplicated, metadata))
        }
    }
}

/// Where the binary of an upload is. An earlier attempt that failed after
/// committing leaves it under `snaps/`.
async fn staged_bucket<B: BlobStore + ?Sized>(blobs: &B, key: &str) -> Result<&'static str> {
    for bucket in [buckets::UNSCANNED, buckets::SNAPS] {
        if blobs.exists(bucket, key).await? {
            return Ok(bucket);
        }
    }
    Err(KebeError::UploadNotFound(key.to_string()))
}

async fn digest_blob<B: BlobStore + ?Sized>(blobs: &B, bucket: &str, key: &str) -> Result<SnapDigest> {
    let mut reader = blobs.open(bucket, key).await?;
    let mut hasher = StreamingDigest::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(kebe_store::StoreError::from)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

async fn extract_metadata<B, M>(blobs: &B, extractor: &M, key: &str) -> MetadataOutcome
where
    B: BlobStore + ?Sized,
    M: MetadataExtractor + ?Sized,
{
    if !extractor.enabled() {
        return MetadataOutcome::Degraded(MetadataError::Disabled.to_string());
    }
    match stage_and_extract(blobs, extractor, key).await {
        Ok(yaml) => MetadataOutcome::Extracted(yaml),
        Err(e) => {
            tracing::warn!(key, error = %e, "metadata extraction failed");
            MetadataOutcome::Degraded(e.to_string())
        }
    }
}

/// Copy the committed snap to a scratch file and run the extractor on it.
async fn stage_and_extract<B, M>(
    blobs: &B,
    extractor: &M,
    key: &str,
) -> std::result::Result<SnapYaml, MetadataError>
where
    B: BlobStore + ?Sized,
    M: MetadataExtractor + ?Sized,
{
    let scratch = tempfile::tempdir()?;
    let path = scratch.path().join(key);

    let mut reader = blobs
        .open(buckets::SNAPS, key)
        .await
        .map_err(|e| MetadataError::Source(e.to_string()))?;
    let mut file = tokio::fs::File::create(&path).await?;
    tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;
    drop(file);

    extractor.extract(&path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{NoopExtractor, StaticExtractor};
    use kebe_core::{digest, AccountId, Confinement, SnapId, SnapType};
    use kebe_store::{MemoryBlobStore, MemoryRepository, NewAccount, NewSnapEntry};

    async fn setup() -> (MemoryRepository, MemoryBlobStore, SnapEntry) {
        let repo = MemoryRepository::new();
        let account = repo
            .create_account(&NewAccount {
                account_id: AccountId::new("pub"),
                username: "pub".into(),
                display_name: "Publisher".into(),
                email: "pub@example.com".into(),
            })
            .await
            .unwrap();
        let snap = repo
            .create_snap_with_default_tracks(&NewSnapEntry {
                name: "foo".into(),
                snap_id: SnapId::new("foo-id"),
                account: account.id,
                snap_type: SnapType::App,
            })
            .await
            .unwrap();
        (repo, MemoryBlobStore::new(), snap)
    }

    async fn upload(
        repo: &MemoryRepository,
        blobs: &MemoryBlobStore,
        data: &'static [u8],
        channels: Vec<String>,
    ) -> String {
        let id = stage_upload(blobs, Bytes::from_static(data)).await.unwrap();
        let accepted = begin_upload(repo, blobs, "https://dash", "foo", &id, data.len() as u64, channels)
            .await
            .unwrap();
        assert!(accepted.success);
        assert_eq!(
            accepted.status_details_url,
            format!("https://dash/dev/api/snap-status/{}", id)
        );
        id
    }

    #[tokio::test]
    async fn test_process_creates_revision_and_releases() {
        let (repo, blobs, snap) = setup().await;
        let id = upload(&repo, &blobs, b"snap-bytes", vec!["edge".into()]).await;

        let status = process_upload(&repo, &blobs, &NoopExtractor, &id).await.unwrap();
        assert!(status.processed);
        assert_eq!(status.code, READY_TO_RELEASE);
        assert_eq!(status.outcome, IngestOutcome::Created);
        assert!(matches!(status.metadata, MetadataOutcome::Degraded(_)));

        let rev = repo.revision_by_id(status.revision).await.unwrap().unwrap();
        assert_eq!(rev.sha3_384, digest(b"snap-bytes").raw);
        assert_eq!(rev.size, 10);
        assert!(blobs.exists(buckets::SNAPS, &rev.filename).await.unwrap());
        assert!(blobs.list(buckets::UNSCANNED).await.unwrap().is_empty());
        assert!(repo.upload_by_up_down_id(&id).await.unwrap().is_none());

        let edge = channels::resolve(&repo, &snap, "edge").await.unwrap();
        assert_eq!(edge.id, rev.id);
    }

    #[tokio::test]
    async fn test_duplicate_bytes_are_deduplicated() {
        let (repo, blobs, _) = setup().await;
        let mut revisions = Vec::new();
        for i in 0..3 {
            let id = upload(&repo, &blobs, b"same", vec![]).await;
            let status = process_upload(&repo, &blobs, &NoopExtractor, &id).await.unwrap();
            let expected = if i == 0 {
                IngestOutcome::Created
            } else {
                IngestOutcome::Deduplicated
            };
            assert_eq!(status.outcome, expected);
            revisions.push(status.revision);
        }
        assert!(revisions.iter().all(|r| *r == revisions[0]));
        assert_eq!(blobs.list(buckets::SNAPS).await.unwrap().len(), 1);
        assert!(blobs.list(buckets::UNSCANNED).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extracted_metadata_updates_snap() {
        let (repo, blobs, snap) = setup().await;
        let id = upload(&repo, &blobs, b"base-snap", vec![]).await;
        let extractor = StaticExtractor(SnapYaml {
            name: "foo".into(),
            snap_type: "base".into(),
            confinement: "classic".into(),
            ..Default::default()
        });

        let status = process_upload(&repo, &blobs, &extractor, &id).await.unwrap();
        assert!(matches!(status.metadata, MetadataOutcome::Extracted(_)));

        let snap = repo.snap_by_id(snap.id).await.unwrap().unwrap();
        assert_eq!(snap.snap_type, SnapType::Base);
        assert_eq!(snap.confinement, Some(Confinement::Classic));
    }

    #[tokio::test]
    async fn test_losing_insert_race_discards_blob() {
        let (repo, blobs, snap) = setup().await;
        let first = upload(&repo, &blobs, b"raced", vec![]).await;
        let created = process_upload(&repo, &blobs, &NoopExtractor, &first).await.unwrap();

        // a second upload that digested before the first one inserted
        let second = upload(&repo, &blobs, b"raced", vec![]).await;
        let key = object_key(&second);
        let (revision, outcome, _) = commit(
            &repo,
            &blobs,
            &NoopExtractor,
            &snap,
            buckets::UNSCANNED,
            &key,
            &digest(b"raced"),
        )
        .await
        .unwrap();
        assert_eq!(revision.id, created.revision);
        assert_eq!(outcome, IngestOutcome::Deduplicated);
        assert!(!blobs.exists(buckets::SNAPS, &key).await.unwrap());
        assert_eq!(blobs.list(buckets::SNAPS).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_process_resumes_after_revision_was_committed() {
        let (repo, blobs, snap) = setup().await;
        let id = upload(&repo, &blobs, b"resumed", vec!["beta".into()]).await;
        let key = object_key(&id);

        // an earlier attempt committed the revision, then failed to release
        let (committed, _, _) = commit(
            &repo,
            &blobs,
            &NoopExtractor,
            &snap,
            buckets::UNSCANNED,
            &key,
            &digest(b"resumed"),
        )
        .await
        .unwrap();
        assert!(repo.upload_by_up_down_id(&id).await.unwrap().is_some());

        let status = process_upload(&repo, &blobs, &NoopExtractor, &id).await.unwrap();
        assert_eq!(status.revision, committed.id);
        assert_eq!(status.outcome, IngestOutcome::Created);
        assert_eq!(status.metadata, MetadataOutcome::Skipped);
        assert!(blobs.exists(buckets::SNAPS, &key).await.unwrap());
        assert!(repo.upload_by_up_down_id(&id).await.unwrap().is_none());
        assert_eq!(channels::resolve(&repo, &snap, "beta").await.unwrap().id, committed.id);
    }

    #[tokio::test]
    async fn test_process_resumes_after_blob_was_moved() {
        let (repo, blobs, _) = setup().await;
        let id = upload(&repo, &blobs, b"moved", vec![]).await;
        let key = object_key(&id);
        blobs
            .move_object(buckets::UNSCANNED, &key, buckets::SNAPS, &key)
            .await
            .unwrap();

        let status = process_upload(&repo, &blobs, &NoopExtractor, &id).await.unwrap();
        assert_eq!(status.outcome, IngestOutcome::Created);
        let rev = repo.revision_by_id(status.revision).await.unwrap().unwrap();
        assert_eq!(rev.filename, key);
        assert_eq!(rev.sha3_384, digest(b"moved").raw);
        assert_eq!(blobs.list(buckets::SNAPS).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_upload_and_snap() {
        let (repo, blobs, _) = setup().await;
        assert!(matches!(
            process_upload(&repo, &blobs, &NoopExtractor, "nope").await,
            Err(KebeError::UploadNotFound(_))
        ));

        let id = stage_upload(&blobs, Bytes::from_static(b"x")).await.unwrap();
        assert!(matches!(
            begin_upload(&repo, &blobs, "", "missing", &id, 1, vec![]).await,
            Err(KebeError::SnapNotFound(_))
        ));
        assert!(matches!(
            begin_upload(&repo, &blobs, "", "foo", "not-staged", 1, vec![]).await,
            Err(KebeError::UploadNotFound(_))
        ));
        assert!(matches!(
            begin_upload(&repo, &blobs, "", "foo", &id, 1, vec!["a/b/c/d".into()]).await,
            Err(KebeError::InvalidChannel(_))
        ));
        assert!(matches!(
            begin_upload(&repo, &blobs, "", "foo", &id, 1, vec!["2.0/stable".into()]).await,
            Err(KebeError::ChannelUnknown { .. })
        ));
        assert!(repo.upload_by_up_down_id(&id).await.unwrap().is_none());
    }
}
