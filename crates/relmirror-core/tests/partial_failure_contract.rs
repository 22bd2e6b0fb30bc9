//! Architectural Contract Test: All-or-Nothing Release Commit
//!
//! This test verifies that a release is committed only when every one of its
//! assets was republished.
//!
//! ## Architectural Constraints Verified
//!
//! 1. A failed download fails the pass with `PartialRelease`
//! 2. A failed upload fails the pass the same way
//! 3. The stored record is untouched, including entity tag and `last_polled`
//! 4. Origin errors on the release fetch propagate unchanged
//! 5. The next pass retries the whole release
//!
//! ## Why This Matters
//!
//! If the version advanced after a partial upload, the entity tag would make
//! the origin answer "not modified" from then on and the missing assets
//! would never be mirrored.

mod common;

use common::*;
use relmirror_core::Error;
use relmirror_core::pipeline::SyncOutcome;
use tokio_util::sync::CancellationToken;

const LINUX: &str = "tool-v2-linux-amd64.tar.gz";
const WINDOWS: &str = "tool-v2-windows-amd64.zip";

#[tokio::test]
async fn test_failed_download_leaves_record_untouched() {
    let harness = Harness::new();
    let before = harness.track_mirrored("v1", 40).await;
    harness
        .origin
        .serve(LINUX, AssetScript::Bytes(tar_gz(&[("tool", ELF_MAGIC)])));
    harness.origin.serve(WINDOWS, AssetScript::Fail);
    harness
        .origin
        .release(release("v2", published(0), &[LINUX, WINDOWS]), Some("\"etag-2\""));

    let err = harness
        .pipeline
        .sync(before.id, CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        Error::PartialRelease { tag, failed } => {
            assert_eq!(tag, "v2");
            assert_eq!(failed, vec![WINDOWS.to_string()]);
        }
        other => panic!("expected PartialRelease, got {:?}", other),
    }

    assert_eq!(harness.reload(&before).await, before);
    assert_eq!(harness.work_entries(), 0);
}

#[tokio::test]
async fn test_failed_upload_leaves_record_untouched() {
    let harness = Harness::new();
    let before = harness.track_mirrored("v1", 40).await;
    harness
        .origin
        .serve(LINUX, AssetScript::Bytes(b"linux".to_vec()));
    harness
        .origin
        .serve(WINDOWS, AssetScript::Bytes(b"windows".to_vec()));
    harness.objects.fail_key(&format!("acme/tool/{}", LINUX));
    harness
        .origin
        .release(release("v2", published(0), &[LINUX, WINDOWS]), None);

    let err = harness
        .pipeline
        .sync(before.id, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(
        matches!(&err, Error::PartialRelease { failed, .. } if failed == &vec![LINUX.to_string()]),
        "got {:?}",
        err
    );
    assert_eq!(harness.reload(&before).await, before);
}

#[tokio::test]
async fn test_every_failed_asset_is_reported() {
    let harness = Harness::new();
    let before = harness.track_mirrored("v1", 40).await;
    harness.origin.serve(WINDOWS, AssetScript::Fail);
    // LINUX is not served at all
    harness
        .origin
        .release(release("v2", published(0), &[WINDOWS, LINUX]), None);

    let err = harness
        .pipeline
        .sync(before.id, CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        Error::PartialRelease { failed, .. } => {
            assert_eq!(failed, vec![LINUX.to_string(), WINDOWS.to_string()]);
        }
        other => panic!("expected PartialRelease, got {:?}", other),
    }
}

#[tokio::test]
async fn test_origin_error_propagates() {
    let harness = Harness::new();
    let before = harness.track_mirrored("v1", 40).await;
    harness.origin.fail("HTTP 500 Internal Server Error");

    let err = harness
        .pipeline
        .sync(before.id, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Origin(_)), "got {:?}", err);
    assert_eq!(harness.reload(&before).await, before);
}

#[tokio::test]
async fn test_next_pass_retries_whole_release() {
    let harness = Harness::new();
    let before = harness.track_mirrored("v1", 40).await;
    harness
        .origin
        .serve(LINUX, AssetScript::Bytes(b"linux".to_vec()));
    harness.origin.serve(WINDOWS, AssetScript::Fail);
    harness
        .origin
        .release(release("v2", published(0), &[LINUX, WINDOWS]), Some("\"etag-2\""));

    assert!(
        harness
            .pipeline
            .sync(before.id, CancellationToken::new())
            .await
            .is_err()
    );

    harness
        .origin
        .serve(WINDOWS, AssetScript::Bytes(b"windows".to_vec()));
    harness
        .origin
        .release(release("v2", published(0), &[LINUX, WINDOWS]), Some("\"etag-2\""));

    let outcome = harness
        .pipeline
        .sync(before.id, CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome, SyncOutcome::Updated { assets: 2, .. }));
    // the failed pass did not store the new entity tag
    assert_eq!(
        harness.origin.presented_etags(),
        vec![
            Some("\"etag-1\"".to_string()),
            Some("\"etag-1\"".to_string())
        ]
    );
    assert_eq!(
        harness.reload(&before).await.etag.as_deref(),
        Some("\"etag-2\"")
    );
}
