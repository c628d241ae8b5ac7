//! Package uploads and rescans through `/upload`.

use axum::body::Body;
use axum::http::{Request, StatusCode};

mod common;

use common::{manifest, rogue_key, signed_package, trusted_key, version_name, write_artifact, Harness, ARTIFACT, BUILD_A, BUILD_B};

#[tokio::test]
async fn trusted_package_is_promoted() {
    let harness = Harness::insecure().await;
    let package = signed_package(&trusted_key(), &[(ARTIFACT, manifest(3, BUILD_A))]);

    let (status, body) = harness.upload(package).await;

    assert_eq!(status, StatusCode::ACCEPTED, "{}", body);
    assert_eq!(harness.deployed_dirs().len(), 1);
    let (status, body) = harness.get("/", Some("3")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with(&version_name(3, BUILD_A)));
}

#[tokio::test]
async fn untrusted_signature_is_forbidden_and_leaves_nothing() {
    let harness = Harness::insecure().await;
    let package = signed_package(&rogue_key(), &[(ARTIFACT, manifest(1, BUILD_A))]);

    let (status, body) = harness.upload(package).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.contains("signature"));
    assert!(harness.deployed_dirs().is_empty());
    assert_eq!(harness.launcher.launched(), 0);
}

#[tokio::test]
async fn failed_health_check_keeps_previous_version() {
    let harness = Harness::insecure().await;
    harness.deploy("orders-a", 1, BUILD_A).await;
    harness.launcher.fail_health_for(&version_name(1, BUILD_B));
    let package = signed_package(&trusted_key(), &[(ARTIFACT, manifest(1, BUILD_B))]);

    let (status, body) = harness.upload(package).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("health check"));
    assert_eq!(harness.deployed_dirs().len(), 1);
    assert_eq!(harness.launcher.disposed(), 1);

    let (status, body) = harness.get("/", Some("1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with(&version_name(1, BUILD_A)));
}

#[tokio::test]
async fn missing_trusted_certificate_is_a_server_error() {
    let harness = Harness::insecure().await;
    std::fs::remove_file(&harness.config.deployment.trusted_certificate).unwrap();
    let package = signed_package(&trusted_key(), &[(ARTIFACT, manifest(1, BUILD_A))]);

    let (status, _) = harness.upload(package).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(harness.deployed_dirs().is_empty());
}

#[tokio::test]
async fn search_rescans_the_watch_folder() {
    let harness = Harness::insecure().await;
    write_artifact(harness.watch_folder(), "orders-a", 1, BUILD_A);

    let request = Request::builder()
        .method("SEARCH")
        .uri("/upload")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Rescan triggered"));
    let (status, _) = harness.get("/", Some("1")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn other_verbs_are_rejected() {
    let harness = Harness::insecure().await;

    let (status, _) = harness.get("/upload", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
