//! The store on SQLite and the filesystem, across restarts.

use kebe::{IngestOutcome, KebeError};
use kebe_testkit::fixtures::{TestFixture, PUBLISHER_EMAIL};
use kebe_testkit::generators;
use proptest::prelude::*;

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let (root_key, revision, snap_id) = {
        let fixture = TestFixture::persistent(dir.path()).await.unwrap();
        let registered = fixture.register("hello").await.unwrap();
        let status = fixture.upload("hello", b"v1 contents", "stable").await.unwrap();
        (
            fixture.store.context().root_key_id().clone(),
            status.revision,
            registered.snap_id,
        )
    };

    let fixture = TestFixture::persistent(dir.path()).await.unwrap();
    assert_eq!(fixture.store.context().root_key_id(), &root_key);

    let action = fixture.store.snap_action("hello", Some("stable")).await.unwrap();
    assert_eq!(action.revision, revision);
    assert_eq!(action.snap_id, snap_id);
    let bytes = fixture.store.download(&action.download_filename).await.unwrap();
    assert_eq!(&bytes[..], b"v1 contents");

    let again = fixture.upload("hello", b"v1 contents", "").await.unwrap();
    assert_eq!(again.outcome, IngestOutcome::Deduplicated);
    assert_eq!(again.revision, revision);

    let header = fixture.login("").await.unwrap();
    let account = fixture.store.authorize(&header).await.unwrap();
    assert_eq!(account.email, PUBLISHER_EMAIL);
}

#[tokio::test]
async fn test_failed_release_leaves_sqlite_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = TestFixture::persistent(dir.path()).await.unwrap();
    fixture.register("hello").await.unwrap();
    let v1 = fixture.upload("hello", b"v1", "edge").await.unwrap();
    let v2 = fixture.upload("hello", b"v2", "").await.unwrap();

    let channels = vec!["beta".to_string(), "nope/edge".to_string()];
    assert!(matches!(
        fixture.store.release("hello", v2.revision, &channels).await,
        Err(KebeError::ChannelUnknown { .. })
    ));
    let edge = fixture.store.snap_action("hello", Some("edge")).await.unwrap();
    assert_eq!(edge.revision, v1.revision);
    assert!(fixture.store.snap_action("hello", Some("beta")).await.is_err());
}

#[tokio::test]
async fn test_assertions_from_persistent_store_verify() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = TestFixture::persistent(dir.path()).await.unwrap();
    let registered = fixture.register("hello").await.unwrap();
    fixture.upload("hello", b"payload", "").await.unwrap();

    let declaration = fixture
        .store
        .snap_declaration_assertion(&registered.snap_id)
        .await
        .unwrap();
    fixture.store.verify_assertion(&declaration.bytes).unwrap();

    let generic_key = fixture.store.context().generic_key_id().clone();
    let key_assertion = fixture.store.account_key_assertion(&generic_key).await.unwrap();
    fixture.store.verify_assertion(&key_assertion.bytes).unwrap();
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn release_then_resolve_agrees((channel, track, _risk) in generators::channel()) {
        runtime().block_on(async {
            let fixture = TestFixture::new().await.unwrap();
            fixture.register("hello").await.unwrap();
            if track != "latest" {
                fixture.store.add_track("hello", &track).await.unwrap();
            }
            let status = fixture.upload("hello", b"bytes", "").await.unwrap();
            fixture
                .store
                .release("hello", status.revision, &[channel.clone()])
                .await
                .unwrap();
            let action = fixture.store.snap_action("hello", Some(&channel)).await.unwrap();
            assert_eq!(action.revision, status.revision);
        });
    }

    #[test]
    fn registered_names_round_trip(name in generators::snap_name()) {
        runtime().block_on(async {
            let fixture = TestFixture::new().await.unwrap();
            let registered = fixture.register(&name).await.unwrap();
            let names = fixture.store.snap_names().await.unwrap();
            assert_eq!(names.len(), 1);
            assert_eq!(names[0].snap_id, registered.snap_id);
            assert_eq!(names[0].name, name);
        });
    }
}
