//! Fetch-path integration tests: public blobs, redirects, clipping, the
//! accelerator prefix, and size caching.


use std::{
    io::IoSliceMut,
    sync::{Arc, Mutex},
};

use harness::{challenge_for, serve_blob, MockResponse, MockServer};
use registryfs::{CredentialCallback, RegistryFileSystem};

fn anonymous() -> CredentialCallback {
    Arc::new(|_url: &str| (String::new(), String::new()))
}

#[tokio::test]
async fn test_public_blob_open_stat_read() {
    let content = b"0123456789".to_vec();
    // A server that ignores Range and answers 200 with the whole body; the
    // size must come from Content-Length.
    let server = MockServer::spawn({
        let content = content.clone();
        move |_request| MockResponse::new(200).with_body(content.clone())
    })
    .await
    .unwrap();

    let fs = RegistryFileSystem::new(anonymous()).unwrap();
    let url = format!("{}/v2/x/blobs/sha256:aa", server.base_url());

    let file = fs.open(&url).await.unwrap();
    assert_eq!(file.size().await.unwrap(), 10);
    assert_eq!(file.metadata().await.unwrap().get_size(), 10);

    let mut buf = vec![0u8; 10];
    let n = file.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(n, 10);
    assert_eq!(buf, content);

    let metadata = fs.metadata(&url).await.unwrap();
    assert_eq!(metadata.get_size(), 10);
    assert!(metadata.is_file());
    assert!(metadata.get_mode().is_readable());
}

#[tokio::test]
async fn test_ranged_reads_and_scatter_buffers() {
    let content = b"abcdefghij".to_vec();
    let server = MockServer::spawn({
        let content = content.clone();
        move |request| serve_blob(&content, request)
    })
    .await
    .unwrap();

    let fs = RegistryFileSystem::new(anonymous()).unwrap();
    let url = format!("{}/v2/x/blobs/sha256:aa", server.base_url());
    let file = fs.open(&url).await.unwrap();

    let (mut front, mut back) = ([0u8; 4], [0u8; 4]);
    let mut bufs = [IoSliceMut::new(&mut front), IoSliceMut::new(&mut back)];
    let n = file.read_vectored_at(&mut bufs, 1).await.unwrap();
    assert_eq!(n, 8);
    assert_eq!(&front, b"bcde");
    assert_eq!(&back, b"fghi");
}

#[tokio::test]
async fn test_reads_clip_to_blob_size() {
    let content = b"0123456789".to_vec();
    let server = MockServer::spawn({
        let content = content.clone();
        move |request| serve_blob(&content, request)
    })
    .await
    .unwrap();

    let fs = RegistryFileSystem::new(anonymous()).unwrap();
    let url = format!("{}/v2/x/blobs/sha256:aa", server.base_url());
    let file = fs.open(&url).await.unwrap();

    // A request reaching past the end is clipped to the remainder.
    let mut buf = [0u8; 8];
    let n = file.read_at(&mut buf, 6).await.unwrap();
    assert_eq!(n, 4);
    assert_eq!(&buf[..4], b"6789");
    assert_eq!(
        server.requests().last().unwrap().header("range"),
        Some("bytes=6-9")
    );

    // A read at or past the end never touches the network.
    let issued = server.requests().len();
    assert_eq!(file.read_at(&mut buf, 20).await.unwrap(), 0);
    assert_eq!(file.read_at(&mut buf, 10).await.unwrap(), 0);
    assert_eq!(server.requests().len(), issued);
}

#[tokio::test]
async fn test_redirected_blob_is_fetched_without_auth() {
    let content = b"cdn-hosted-bytes".to_vec();
    let cdn = MockServer::spawn({
        let content = content.clone();
        move |request| serve_blob(&content, request)
    })
    .await
    .unwrap();
    let location = format!("{}/obj?sig=abc", cdn.base_url());

    let registry = MockServer::spawn({
        let location = location.clone();
        move |request| {
            if request.target.starts_with("/token") {
                return MockResponse::new(200).with_body(br#"{"token":"T1"}"#.to_vec());
            }
            match request.header("authorization") {
                Some("Bearer T1") => MockResponse::new(302).with_header("Location", &location),
                _ => challenge_for(request, "repository:x:pull"),
            }
        }
    })
    .await
    .unwrap();

    let fs = RegistryFileSystem::new(anonymous()).unwrap();
    let url = format!("{}/v2/x/blobs/sha256:aa", registry.base_url());
    let file = fs.open(&url).await.unwrap();
    assert_eq!(file.size().await.unwrap(), content.len() as u64);

    let mut buf = vec![0u8; content.len()];
    let n = file.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(n, content.len());
    assert_eq!(buf, content);

    // Every CDN fetch carries a Range and no Authorization header.
    let cdn_requests = cdn.requests();
    assert!(!cdn_requests.is_empty());
    for request in &cdn_requests {
        assert!(request.header("range").is_some());
        assert!(request.header("authorization").is_none());
    }
}

#[tokio::test]
async fn test_accelerator_prefix_wraps_effective_url() {
    let content = b"accelerated".to_vec();
    let registry = MockServer::spawn({
        let content = content.clone();
        move |request| serve_blob(&content, request)
    })
    .await
    .unwrap();
    let accelerator = MockServer::spawn({
        let content = content.clone();
        move |request| serve_blob(&content, request)
    })
    .await
    .unwrap();

    let fs = RegistryFileSystem::new(anonymous()).unwrap();
    let url = format!("{}/v2/x/blobs/sha256:aa", registry.base_url());
    let file = fs.open(&url).await.unwrap();

    let mut buf = vec![0u8; content.len()];
    file.read_at(&mut buf, 0).await.unwrap();
    assert!(accelerator.requests().is_empty());

    // The original URL travels inside the accelerated request path.
    fs.set_accelerate_address(&accelerator.base_url());
    file.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(buf, content);
    let routed = accelerator.requests();
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].target, format!("/{url}"));
    assert!(routed[0].header("range").is_some());

    // An empty address disables acceleration again.
    fs.set_accelerate_address("");
    let direct_before = registry.requests().len();
    file.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(accelerator.requests().len(), 1);
    assert_eq!(registry.requests().len(), direct_before + 1);
}

#[tokio::test]
async fn test_stat_size_is_stable_within_ttl() {
    let content = Arc::new(Mutex::new(b"0123456789".to_vec()));
    let server = MockServer::spawn({
        let content = Arc::clone(&content);
        move |request| {
            let content = content.lock().unwrap().clone();
            serve_blob(&content, request)
        }
    })
    .await
    .unwrap();

    let fs = RegistryFileSystem::new(anonymous()).unwrap();
    let url = format!("{}/v2/x/blobs/sha256:aa", server.base_url());
    assert_eq!(fs.metadata(&url).await.unwrap().get_size(), 10);

    // The server now reports a different size; the cached one wins.
    *content.lock().unwrap() = vec![7u8; 99];
    let issued = server.requests().len();
    assert_eq!(fs.metadata(&url).await.unwrap().get_size(), 10);
    assert_eq!(server.requests().len(), issued);
}

#[tokio::test]
async fn test_exists_maps_missing_blobs_to_false() {
    let content = b"present".to_vec();
    let server = MockServer::spawn({
        let content = content.clone();
        move |request| {
            if request.target.starts_with("/v2/x/blobs/sha256:aa") {
                serve_blob(&content, request)
            } else {
                MockResponse::new(404)
            }
        }
    })
    .await
    .unwrap();

    let fs = RegistryFileSystem::new(anonymous()).unwrap();
    let present = format!("{}/v2/x/blobs/sha256:aa", server.base_url());
    let missing = format!("{}/v2/x/blobs/sha256:bb", server.base_url());

    assert!(fs.exists(&present).await.unwrap());
    assert!(!fs.exists(&missing).await.unwrap());
}
