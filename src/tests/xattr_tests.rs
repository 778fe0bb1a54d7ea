use bytes::BufMut;

use crate::utils::xattr;

#[test]
fn test_build_and_get() {
    let blob = xattr::build_blob(&[(b"_sync", b"meta"), (b"color", b"red")]);
    assert_eq!(xattr::get(&blob, b"_sync").as_deref(), Some(&b"meta"[..]));
    assert_eq!(xattr::get(&blob, b"color").as_deref(), Some(&b"red"[..]));
    assert!(xattr::get(&blob, b"missing").is_none());
}

#[test]
fn test_body_offset() {
    let blob = xattr::build_blob(&[(b"_a", b"1")]);
    let mut with_body = bytes::BytesMut::from(&blob[..]);
    with_body.put_slice(b"{\"doc\":true}");

    let offset = xattr::body_offset(&with_body);
    assert_eq!(&with_body[offset..], b"{\"doc\":true}");

    // Too short to carry a header.
    assert_eq!(xattr::body_offset(b"ab"), 0);
}

#[test]
fn test_prune_keeps_only_system_keys() {
    let blob = xattr::build_blob(&[
        (b"_sync", b"s"),
        (b"user1", b"u1"),
        (b"_acl", b"a"),
        (b"user2", b"u2"),
    ]);
    let pruned = xattr::prune_user_keys(&blob).unwrap();
    assert!(xattr::get(&pruned, b"_sync").is_some());
    assert!(xattr::get(&pruned, b"_acl").is_some());
    assert!(xattr::get(&pruned, b"user1").is_none());
    assert!(xattr::get(&pruned, b"user2").is_none());
}

#[test]
fn test_prune_with_no_system_keys_returns_none() {
    let blob = xattr::build_blob(&[(b"user", b"u")]);
    assert!(xattr::prune_user_keys(&blob).is_none());
}

#[test]
fn test_prune_drops_document_body() {
    let blob = xattr::build_blob(&[(b"_sys", b"v")]);
    let mut with_body = bytes::BytesMut::from(&blob[..]);
    with_body.put_slice(b"body-bytes");

    let pruned = xattr::prune_user_keys(&with_body).unwrap();
    assert_eq!(xattr::body_offset(&pruned), pruned.len());
}
