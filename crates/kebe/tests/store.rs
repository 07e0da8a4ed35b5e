//! End-to-end behavior of the store façade on in-memory backends.

use std::sync::Arc;

use bytes::Bytes;
use kebe::auth::{bind_discharge, AuthorizationHeader, StaticIdentityProvider};
use kebe::core::{Assertion, Keypair, KeyId, SignedDocument, Validation};
use kebe::metadata::StaticExtractor;
use kebe::store::{
    buckets, BlobStore, FsBlobStore, MemoryBlobStore, MemoryRepository, NewAccount, Repository,
    SqliteRepository,
};
use kebe::{
    IngestOutcome, KebeConfig, KebeError, MetadataOutcome, PublicErrorCode, SnapStore, SnapYaml,
    StoreContext,
};

type StoreOn<R, B> = SnapStore<R, B, StaticIdentityProvider, StaticExtractor>;
type Store = StoreOn<MemoryRepository, MemoryBlobStore>;

const EMAIL: &str = "dev@example.com";

fn config() -> KebeConfig {
    let mut config = KebeConfig::default();
    config.macaroon.root_key = "root-key".into();
    config.macaroon.root_id = "root-id".into();
    config.macaroon.root_location = "kebe".into();
    config.macaroon.discharge_key = "discharge-key".into();
    config.macaroon.third_party_caveat_id = "login".into();
    config.macaroon.third_party_location = "login.kebe".into();
    config
}

async fn store_on<R: Repository, B: BlobStore>(repo: R, blobs: B, yaml: SnapYaml) -> StoreOn<R, B> {
    kebe::logging::init_for_tests();
    let config = config();
    kebe::provision::initialize(&repo, &blobs, &config).await.unwrap();
    let ctx = StoreContext::load(&blobs, &config).await.unwrap();
    repo.create_account(&NewAccount {
        account_id: kebe::core::AccountId::new("dev-account"),
        username: "dev".into(),
        display_name: "Developer".into(),
        email: EMAIL.into(),
    })
    .await
    .unwrap();
    let identity = StaticIdentityProvider::new().with_verified_user("dev", "pw", EMAIL);
    SnapStore::new(Arc::new(ctx), repo, blobs, identity, StaticExtractor(yaml))
}

async fn store_with(yaml: SnapYaml) -> Store {
    store_on(MemoryRepository::new(), MemoryBlobStore::new(), yaml).await
}

async fn store() -> Store {
    store_with(SnapYaml::default()).await
}

async fn login(store: &Store, payload: &str) -> String {
    let root = store.issue_acl(payload).unwrap();
    let discharge = store.issue_discharge("dev", "pw", "login").await.unwrap();
    AuthorizationHeader {
        discharge: bind_discharge(&root, &discharge).unwrap(),
        root,
    }
    .to_string()
}

async fn upload(store: &Store, name: &str, data: &[u8], channels: &str) -> kebe::UploadStatus {
    let id = store.stage_upload(Bytes::copy_from_slice(data)).await.unwrap();
    store
        .begin_upload(name, &id, data.len() as u64, channels)
        .await
        .unwrap();
    store.process_upload(&id).await.unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_round_trip() {
    let store = store().await;
    let header = login(&store, r#"{"permissions":["package_upload"]}"#).await;
    let account = store.authorize(&header).await.unwrap();
    assert_eq!(account.email, EMAIL);

    let acl = store.verify_acl(&header).await.unwrap();
    assert!(acl.allowed);
    assert_eq!(acl.account.display_name, "Developer");
    assert_eq!(acl.permissions.len(), 6);
}

#[tokio::test]
async fn test_rejected_headers_are_opaque() {
    let store = store().await;
    let header = AuthorizationHeader::parse(&login(&store, "").await).unwrap();

    let undischarged = AuthorizationHeader {
        root: header.root.clone(),
        discharge: header.root.clone(),
    }
    .to_string();
    for bad in ["", "Bearer x", "Macaroon root=abc", undischarged.as_str()] {
        let err = store.authorize(bad).await.unwrap_err();
        assert!(matches!(err, KebeError::Unauthorized(_)), "{:?}", bad);
        assert_eq!(err.public_code(), PublicErrorCode::Unauthorized);
        assert_eq!(err.to_string(), "unauthorized");
    }
}

#[tokio::test]
async fn test_wrong_password_gets_no_discharge() {
    let store = store().await;
    let err = store.issue_discharge("dev", "nope", "login").await.unwrap_err();
    assert!(matches!(err, KebeError::Unauthorized(_)));
}

#[tokio::test]
async fn test_unknown_account_is_unauthorized() {
    let store = store().await;
    let identity_only = StaticIdentityProvider::new().with_verified_user("ghost", "pw", "ghost@x.com");
    let root = store.issue_acl("").unwrap();
    let discharge = store
        .context()
        .macaroons()
        .issue_discharge(&identity_only, "ghost", "pw", "login")
        .await
        .unwrap();
    let header = AuthorizationHeader {
        discharge: bind_discharge(&root, &discharge).unwrap(),
        root,
    }
    .to_string();
    assert!(matches!(
        store.authorize(&header).await,
        Err(KebeError::Unauthorized(_))
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Dashboard
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_register_creates_default_channels() {
    let store = store().await;
    let dry = store.register_snap_name(EMAIL, "hello", true).await.unwrap();
    assert!(dry.dry_run);
    assert!(store.repository().snap_by_name("hello").await.unwrap().is_none());

    let registered = store.register_snap_name(EMAIL, "hello", false).await.unwrap();
    let map = store.channel_map("hello").await.unwrap();
    assert_eq!(map.tracks, vec!["latest"]);
    let channels: Vec<_> = map.channel_map.iter().map(|e| e.channel.as_str()).collect();
    assert_eq!(
        channels,
        vec!["latest/stable", "latest/candidate", "latest/beta", "latest/edge"]
    );

    assert!(matches!(
        store.register_snap_name(EMAIL, "hello", false).await,
        Err(KebeError::AlreadyRegistered(_))
    ));
    assert!(matches!(
        store.register_snap_name(EMAIL, "Bad_Name", false).await,
        Err(KebeError::InvalidRequest(_))
    ));

    let info = store.account_info(EMAIL).await.unwrap();
    assert_eq!(info.snaps.len(), 1);
    assert_eq!(info.snaps[0].series, "16");
    assert_eq!(info.snaps[0].snap_id, registered.snap_id);
}

#[tokio::test]
async fn test_add_account_key() {
    let store = store().await;
    let key = Keypair::generate();
    let encoded = key.public_key().encode();

    let wrong = KeyId::new("not-the-key");
    assert!(matches!(
        store.add_account_key(EMAIL, "laptop", &wrong, &encoded).await,
        Err(KebeError::InvalidRequest(_))
    ));

    store
        .add_account_key(EMAIL, "laptop", &key.key_id(), &encoded)
        .await
        .unwrap();
    let info = store.account_info(EMAIL).await.unwrap();
    assert_eq!(info.account_keys.len(), 1);
    assert_eq!(info.account_keys[0].public_key_sha3_384, key.key_id());
}

#[tokio::test]
async fn test_add_track() {
    let store = store().await;
    store.register_snap_name(EMAIL, "hello", false).await.unwrap();
    store.add_track("hello", "2.0").await.unwrap();
    assert!(matches!(
        store.add_track("hello", "2.0").await,
        Err(KebeError::AlreadyRegistered(_))
    ));
    assert!(store.add_track("hello", "edge").await.is_err());
    assert!(store.add_track("hello", "a/b").await.is_err());
    assert_eq!(store.channel_map("hello").await.unwrap().channel_map.len(), 8);
}

// ─────────────────────────────────────────────────────────────────────────────
// Uploads and releases
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_upload_release_and_install() {
    let yaml = SnapYaml {
        name: "hello".into(),
        version: "1.0".into(),
        confinement: "strict".into(),
        base: "core22".into(),
        ..Default::default()
    };
    let store = store_with(yaml).await;
    store.register_snap_name(EMAIL, "hello", false).await.unwrap();

    let status = upload(&store, "hello", b"hello snap v1", "edge").await;
    assert_eq!(status.outcome, IngestOutcome::Created);
    assert!(matches!(status.metadata, MetadataOutcome::Extracted(_)));

    let action = store.snap_action("hello", Some("latest/edge")).await.unwrap();
    assert_eq!(action.revision, status.revision);
    assert_eq!(action.size, 13);
    assert_eq!(action.sha3_384, kebe::core::digest(b"hello snap v1").raw);
    assert!(action.download_url.ends_with(&action.download_filename));

    let bytes = store.download(&action.download_filename).await.unwrap();
    assert_eq!(&bytes[..], b"hello snap v1");

    // Nothing has been released to stable yet.
    assert!(matches!(
        store.snap_action("hello", None).await,
        Err(KebeError::NotFound(_))
    ));

    let channels = vec!["stable".to_string(), "candidate".to_string()];
    assert!(store.release("hello", status.revision, &channels).await.unwrap());
    let stable = store.snap_action("hello", None).await.unwrap();
    assert_eq!(stable.revision, status.revision);

    let found = store.find("hello").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].publisher, "dev");
    assert!(store.find("missing").await.unwrap().is_empty());
    assert_eq!(store.snap_names().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_upload_reuses_revision() {
    let store = store().await;
    store.register_snap_name(EMAIL, "hello", false).await.unwrap();

    let first = upload(&store, "hello", b"same bytes", "").await;
    let second = upload(&store, "hello", b"same bytes", "beta").await;
    assert_eq!(first.outcome, IngestOutcome::Created);
    assert_eq!(second.outcome, IngestOutcome::Deduplicated);
    assert_eq!(second.metadata, MetadataOutcome::Skipped);
    assert_eq!(first.revision, second.revision);

    let beta = store.snap_action("hello", Some("beta")).await.unwrap();
    assert_eq!(beta.revision, first.revision);
}

#[tokio::test]
async fn test_release_is_all_or_nothing() {
    let store = store().await;
    store.register_snap_name(EMAIL, "hello", false).await.unwrap();
    let status = upload(&store, "hello", b"v1", "").await;

    let channels = vec!["edge".to_string(), "9.9/stable".to_string()];
    let err = store.release("hello", status.revision, &channels).await.unwrap_err();
    assert!(matches!(err, KebeError::ChannelUnknown { .. }));
    assert_eq!(err.public_code(), PublicErrorCode::NotFound);
    assert!(store.snap_action("hello", Some("edge")).await.is_err());

    let branch = vec!["edge/hotfix".to_string()];
    assert!(matches!(
        store.release("hello", status.revision, &branch).await,
        Err(KebeError::ChannelUnknown { .. })
    ));
    let branch = vec!["latest/edge/hotfix".to_string()];
    assert!(matches!(
        store.release("hello", status.revision, &branch).await,
        Err(KebeError::BranchesUnsupported(_))
    ));
}

#[tokio::test]
async fn test_release_rejects_bad_requests() {
    let store = store().await;
    store.register_snap_name(EMAIL, "hello", false).await.unwrap();
    store.register_snap_name(EMAIL, "other", false).await.unwrap();
    let status = upload(&store, "hello", b"v1", "").await;
    let edge = vec!["edge".to_string()];

    assert!(matches!(store.release("", 1, &edge).await, Err(KebeError::InvalidRequest(_))));
    assert!(matches!(store.release("hello", 0, &edge).await, Err(KebeError::InvalidRequest(_))));
    assert!(matches!(
        store.release("hello", status.revision, &[]).await,
        Err(KebeError::InvalidRequest(_))
    ));
    assert!(matches!(
        store.release("hello", 9999, &edge).await,
        Err(KebeError::RevisionNotFound(9999))
    ));
    assert!(matches!(
        store.release("missing", status.revision, &edge).await,
        Err(KebeError::SnapNotFound(_))
    ));
    assert!(matches!(
        store.release("other", status.revision, &edge).await,
        Err(KebeError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_begin_upload_errors() {
    let store = store().await;
    store.register_snap_name(EMAIL, "hello", false).await.unwrap();
    let id = store.stage_upload(Bytes::from_static(b"x")).await.unwrap();

    assert!(matches!(
        store.begin_upload("missing", &id, 1, "").await,
        Err(KebeError::SnapNotFound(_))
    ));
    assert!(matches!(
        store.begin_upload("hello", "no-such-upload", 1, "").await,
        Err(KebeError::UploadNotFound(_))
    ));
    assert!(matches!(
        store.begin_upload("hello", &id, 1, "edge,").await,
        Ok(_)
    ));
    assert!(matches!(
        store.process_upload("no-such-upload").await,
        Err(KebeError::UploadNotFound(_))
    ));
}

#[tokio::test]
async fn test_begin_upload_rejects_channels_the_snap_lacks() {
    let store = store().await;
    store.register_snap_name(EMAIL, "hello", false).await.unwrap();
    let id = store.stage_upload(Bytes::from_static(b"v2")).await.unwrap();

    for channels in ["2.0/stable", "edge,2.0/beta", "latest/nightly"] {
        assert!(
            matches!(
                store.begin_upload("hello", &id, 2, channels).await,
                Err(KebeError::ChannelUnknown { .. })
            ),
            "{}",
            channels
        );
    }
    let staged = format!("{}.snap", id);
    assert!(store.blobs().exists(buckets::UNSCANNED, &staged).await.unwrap());
    assert!(matches!(
        store.process_upload(&id).await,
        Err(KebeError::UploadNotFound(_))
    ));

    // Once the track exists the same staged binary goes through.
    store.add_track("hello", "2.0").await.unwrap();
    store.begin_upload("hello", &id, 2, "2.0/stable").await.unwrap();
    let status = store.process_upload(&id).await.unwrap();
    let action = store.snap_action("hello", Some("2.0/stable")).await.unwrap();
    assert_eq!(action.revision, status.revision);
}

async fn identical_uploads_race<R: Repository, B: BlobStore>(store: &StoreOn<R, B>) {
    store.register_snap_name(EMAIL, "hello", false).await.unwrap();
    let mut ids = Vec::new();
    for _ in 0..2 {
        let id = store.stage_upload(Bytes::from_static(b"same bytes")).await.unwrap();
        store.begin_upload("hello", &id, 10, "edge").await.unwrap();
        ids.push(id);
    }

    let (a, b) = tokio::join!(store.process_upload(&ids[0]), store.process_upload(&ids[1]));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.revision, b.revision);
    let mut outcomes = vec![a.outcome, b.outcome];
    outcomes.sort_by_key(|o| *o == IngestOutcome::Deduplicated);
    assert_eq!(outcomes, vec![IngestOutcome::Created, IngestOutcome::Deduplicated]);

    assert_eq!(store.blobs().list(buckets::SNAPS).await.unwrap().len(), 1);
    assert!(store.blobs().list(buckets::UNSCANNED).await.unwrap().is_empty());
    let edge = store.snap_action("hello", Some("edge")).await.unwrap();
    assert_eq!(edge.revision, a.revision);
    assert_eq!(&store.download(&edge.download_filename).await.unwrap()[..], b"same bytes");
}

#[tokio::test]
async fn test_concurrent_identical_uploads_in_memory() {
    identical_uploads_race(&store().await).await;
}

#[tokio::test]
async fn test_concurrent_identical_uploads_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let repo = SqliteRepository::open(dir.path().join("kebe.db")).unwrap();
    let blobs = FsBlobStore::new(dir.path().join("blobs"));
    let store = store_on(repo, blobs, SnapYaml::default()).await;
    identical_uploads_race(&store).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Assertions
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_assertions_verify_against_trust_anchor() {
    let store = store().await;
    let registered = store.register_snap_name(EMAIL, "hello", false).await.unwrap();
    upload(&store, "hello", b"payload", "").await;
    let digest = kebe::core::digest(b"payload");

    let account = store
        .account_assertion(&kebe::core::AccountId::new("dev-account"))
        .await
        .unwrap();
    assert_eq!(account.media_type, kebe::core::MEDIA_TYPE);
    match store.verify_assertion(&account.bytes).unwrap() {
        Assertion::Account(a) => {
            assert_eq!(a.username, "dev");
            assert_eq!(a.validation, Validation::Verified);
        }
        other => panic!("unexpected assertion {:?}", other.assertion_type()),
    }

    let root_key = store.context().root_key_id().clone();
    let root_key_assertion = store.account_key_assertion(&root_key).await.unwrap();
    store.verify_assertion(&root_key_assertion.bytes).unwrap();

    let declaration = store
        .snap_declaration_assertion(&registered.snap_id)
        .await
        .unwrap();
    match store.verify_assertion(&declaration.bytes).unwrap() {
        Assertion::SnapDeclaration(d) => {
            assert_eq!(d.snap_name, "hello");
            assert_eq!(d.series, "16");
        }
        other => panic!("unexpected assertion {:?}", other.assertion_type()),
    }

    let revision = store.snap_revision_assertion(&digest.encoded).await.unwrap();
    match store.verify_assertion(&revision.bytes).unwrap() {
        Assertion::SnapRevision(r) => {
            assert_eq!(r.snap_sha3_384.encode(), digest.encoded);
            assert_eq!(r.snap_size, 7);
        }
        other => panic!("unexpected assertion {:?}", other.assertion_type()),
    }

    let mut tampered = revision.bytes.to_vec();
    let pos = tampered.iter().position(|b| *b == b'7').unwrap();
    tampered[pos] = b'8';
    assert!(store.verify_assertion(&tampered).is_err());
}

#[tokio::test]
async fn test_store_account_is_certified() {
    let store = store().await;
    let authority = store.context().authority_id().clone();
    let encoded = store.account_assertion(&authority).await.unwrap();
    let doc = SignedDocument::decode(&encoded.bytes).unwrap();
    assert_eq!(doc.header("validation"), Some("certified"));
}

#[tokio::test]
async fn test_missing_assertions() {
    let store = store().await;
    assert!(matches!(
        store.snap_revision_assertion("nope").await,
        Err(KebeError::NotFound(_))
    ));
    assert!(matches!(
        store.account_key_assertion(&KeyId::new("nope")).await,
        Err(KebeError::NotFound(_))
    ));
    assert!(matches!(
        store.download("nope.snap").await,
        Err(KebeError::NotFound(_))
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Production backends
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_open_on_sqlite_and_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.database.path = dir.path().join("kebe.db").to_string_lossy().into_owned();
    config.blobs.root = dir.path().join("blobs");
    config.metadata.enabled = false;

    let identity = StaticIdentityProvider::new().with_verified_user("dev", "pw", EMAIL);
    let store = kebe::ProductionStore::open(&config, identity.clone()).await.unwrap();
    store
        .repository()
        .create_account(&NewAccount {
            account_id: kebe::core::AccountId::new("dev-account"),
            username: "dev".into(),
            display_name: "Developer".into(),
            email: EMAIL.into(),
        })
        .await
        .unwrap();
    store.register_snap_name(EMAIL, "hello", false).await.unwrap();

    let id = store.stage_upload(Bytes::from_static(b"on disk")).await.unwrap();
    store.begin_upload("hello", &id, 7, "edge").await.unwrap();
    let status = store.process_upload(&id).await.unwrap();
    assert_eq!(status.outcome, IngestOutcome::Created);
    assert!(matches!(status.metadata, MetadataOutcome::Degraded(_)));
    let root_key = store.context().root_key_id().clone();
    drop(store);

    let store = kebe::ProductionStore::open(&config, identity).await.unwrap();
    assert_eq!(store.context().root_key_id(), &root_key);
    let action = store.snap_action("hello", Some("edge")).await.unwrap();
    assert_eq!(action.revision, status.revision);
    assert_eq!(&store.download(&action.download_filename).await.unwrap()[..], b"on disk");
}
