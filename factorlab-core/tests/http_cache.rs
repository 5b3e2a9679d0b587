//! Revalidating client against the on-disk cache, through a scripted server.

mod common;

use common::MockServer;
use factorlab_core::data::{cache_key, FetchOrigin};
use factorlab_core::ErrorKind;
use std::time::Duration;

const URL: &str = "https://example.org/data/factors.csv";
const HOUR: Duration = Duration::from_secs(3600);

#[test]
fn fresh_entry_is_served_without_any_request() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::new();
    server.serve(URL, "v1", Some("\"a\""));
    let mut http = server.client(dir.path());
    http.open().unwrap();

    assert_eq!(http.download(URL, HOUR).unwrap(), b"v1");
    let again = http.fetch(URL, HOUR).unwrap();
    assert_eq!(again.bytes, b"v1");
    assert_eq!(again.origin, FetchOrigin::Fresh);
    assert!(again.pending.is_none());
    assert_eq!(server.gets(), 1);
    assert_eq!(server.heads(), 0);
}

#[test]
fn stale_entry_with_matching_etag_is_refreshed_not_downloaded() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::new();
    server.serve(URL, "v1", Some("\"a\""));
    let mut http = server.client(dir.path());
    http.open().unwrap();

    http.download(URL, Duration::ZERO).unwrap();
    let fetched = http.fetch(URL, HOUR).unwrap();
    assert_eq!(fetched.origin, FetchOrigin::Revalidated);
    assert_eq!(fetched.bytes, b"v1");
    assert_eq!(server.heads(), 1);
    assert_eq!(server.gets(), 1);

    // the refresh extends the expiry, so the next call is a plain hit
    http.commit(fetched.pending.unwrap());
    assert_eq!(http.fetch(URL, HOUR).unwrap().origin, FetchOrigin::Fresh);
    assert_eq!(server.heads(), 1);
}

#[test]
fn stale_entry_with_matching_last_modified_is_refreshed_not_downloaded() {
    const STAMP: &str = "Tue, 02 Jan 2024 10:00:00 GMT";
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::new();
    server.serve_with_last_modified(URL, "v1", STAMP, None);
    let mut http = server.client(dir.path());
    http.open().unwrap();

    http.download(URL, Duration::ZERO).unwrap();

    // no ETag on either side: the date alone decides
    let fetched = http.fetch(URL, HOUR).unwrap();
    assert_eq!(fetched.origin, FetchOrigin::Revalidated);
    assert_eq!(fetched.bytes, b"v1");

    // a new ETag with the same date still counts as unchanged
    server.serve_with_last_modified(URL, "v2", STAMP, Some("\"fresh\""));
    let fetched = http.fetch(URL, HOUR).unwrap();
    assert_eq!(fetched.origin, FetchOrigin::Revalidated);
    assert_eq!(fetched.bytes, b"v1");
    assert_eq!(server.heads(), 2);
    assert_eq!(server.gets(), 1);

    server.serve_with_last_modified(URL, "v3", "Wed, 03 Jan 2024 10:00:00 GMT", None);
    let fetched = http.fetch(URL, HOUR).unwrap();
    assert_eq!(fetched.origin, FetchOrigin::Downloaded);
    assert_eq!(fetched.bytes, b"v3");
    assert_eq!(server.gets(), 2);
}

#[test]
fn stale_entry_with_changed_etag_is_downloaded_again() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::new();
    server.serve(URL, "v1", Some("\"a\""));
    let mut http = server.client(dir.path());
    http.open().unwrap();

    http.download(URL, Duration::ZERO).unwrap();
    server.serve(URL, "v2", Some("\"b\""));
    assert_eq!(http.download(URL, HOUR).unwrap(), b"v2");
    assert_eq!(server.heads(), 1);
    assert_eq!(server.gets(), 2);

    let meta = http.cache().read_meta(&cache_key(URL)).unwrap();
    assert_eq!(meta.validators.etag.as_deref(), Some("\"b\""));
}

#[test]
fn missing_validators_count_as_changed() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::new();
    server.serve(URL, "v1", None);
    let mut http = server.client(dir.path());
    http.open().unwrap();

    http.download(URL, Duration::ZERO).unwrap();
    http.download(URL, Duration::ZERO).unwrap();
    assert_eq!(server.heads(), 1);
    assert_eq!(server.gets(), 2);
}

#[test]
fn download_outside_session_is_a_usage_error_even_when_cached() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::new();
    server.serve(URL, "v1", Some("\"a\""));
    let mut http = server.client(dir.path());

    http.open().unwrap();
    http.download(URL, HOUR).unwrap();
    http.close();

    let err = http.download(URL, HOUR).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(server.gets(), 1);
}

#[test]
fn rejected_download_leaves_cache_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::new();
    server.reject(URL, 404);
    let mut http = server.client(dir.path());

    let err = http
        .session(|client| client.download(URL, HOUR))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteRejected);
    assert!(err.is_unreachable());
    assert!(http.cache().entries().is_empty());
    assert!(!http.is_open());
}

#[test]
fn failing_source_keeps_the_stale_entry() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::new();
    server.serve(URL, "v1", Some("\"a\""));
    let mut http = server.client(dir.path());
    http.open().unwrap();
    http.download(URL, Duration::ZERO).unwrap();

    server.unplug(URL);
    let err = http.download(URL, HOUR).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);

    let entry = http.cache().get(&cache_key(URL)).unwrap();
    assert_eq!(entry.payload, b"v1");
}

#[test]
fn fetch_stages_the_write_until_committed() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::new();
    server.serve(URL, "v1", Some("\"a\""));
    let mut http = server.client(dir.path());
    http.open().unwrap();

    let fetched = http.fetch(URL, HOUR).unwrap();
    assert_eq!(fetched.origin, FetchOrigin::Downloaded);
    assert!(http.cache().get(&cache_key(URL)).is_none());

    http.commit(fetched.pending.unwrap());
    let meta = http.cache().read_meta(&cache_key(URL)).unwrap();
    assert_eq!(meta.url.as_deref(), Some(URL));
    assert_eq!(meta.size, 2);
}

#[test]
fn equivalent_urls_share_one_entry() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::new();
    server.serve(URL, "v1", None);
    let mut http = server.client(dir.path());
    http.open().unwrap();

    http.download(URL, HOUR).unwrap();
    let spaced = format!("  {URL}  ");
    assert_eq!(cache_key(&spaced), cache_key(URL));
    assert_eq!(http.fetch(&spaced, HOUR).unwrap().origin, FetchOrigin::Fresh);
}

#[test]
fn session_helper_opens_once() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::new();
    server.serve(URL, "v1", None);
    server.serve("https://example.org/other.csv", "v2", None);
    let mut http = server.client(dir.path());

    http.session(|client| {
        client.download(URL, HOUR)?;
        client.download("https://example.org/other.csv", HOUR)
    })
    .unwrap();
    assert_eq!(server.sessions(), 1);
    assert_eq!(server.gets(), 2);
    assert!(!http.is_open());
}
