// Copyright © 2021 The Radicle Link Contributors
//
// This file is part of radicle-link, distributed under the GPLv3 with Radicle
// Linking Exception. For full terms see the included LICENSE file.

use std::collections::HashMap;

use link_dfs::{PackExt, StreamKey};

#[test]
fn keys_with_the_same_identity_are_equal() {
    let a = StreamKey::new("repo", "pack-123", PackExt::Pack);
    let b = StreamKey::new("repo", "pack-123", PackExt::Pack);
    assert_eq!(a, b)
}

#[test]
fn keys_differ_by_extension() {
    let pack = StreamKey::new("repo", "pack-123", PackExt::Pack);
    let idx = StreamKey::new("repo", "pack-123", PackExt::Index);
    assert_ne!(pack, idx)
}

#[test]
fn keys_differ_by_repository() {
    let a = StreamKey::new("repo-a", "pack-123", PackExt::Pack);
    let b = StreamKey::new("repo-b", "pack-123", PackExt::Pack);
    assert_ne!(a, b)
}

#[test]
fn derived_key_keeps_the_file_identity() {
    let idx = StreamKey::new("repo", "pack-123", PackExt::Index);
    let rev = idx.derived(PackExt::ReverseIndex);

    assert_ne!(idx, rev);
    assert_eq!(rev.ext(), PackExt::ReverseIndex);
    assert_eq!(rev.repository(), idx.repository());
    assert_eq!(rev.name(), idx.name());
    assert_eq!(rev, idx.derived(PackExt::ReverseIndex))
}

#[test]
fn keys_are_usable_as_map_keys() {
    let mut map = HashMap::new();
    map.insert(StreamKey::new("repo", "pack-123", PackExt::Pack), 1);
    assert_eq!(
        map.get(&StreamKey::new("repo", "pack-123", PackExt::Pack)),
        Some(&1)
    )
}

#[test]
fn extension_positions_are_stable() {
    let exts = [
        PackExt::Pack,
        PackExt::Index,
        PackExt::ReverseIndex,
        PackExt::Bitmap,
        PackExt::CommitGraph,
        PackExt::ObjectSizeIndex,
        PackExt::Reftable,
    ];
    for (pos, ext) in exts.iter().enumerate() {
        assert_eq!(ext.position(), pos)
    }
}
