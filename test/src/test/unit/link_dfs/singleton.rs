// Copyright © 2021 The Radicle Link Contributors
//
// This file is part of radicle-link, distributed under the GPLv3 with Radicle
// Linking Exception. For full terms see the included LICENSE file.

use link_dfs::{Config, PackExt};

use crate::dfs::stream;

// The process-wide instance is shared between all tests of this binary, so
// everything touching it lives in this single test.
#[test]
fn reconfigure_replaces_the_instance() {
    let first = link_dfs::instance();
    assert_eq!(first.block_size(), 64 * 1024);

    link_dfs::reconfigure(Config {
        block_size: 1024,
        block_limit: 64 * 1024,
        ..Config::default()
    })
    .unwrap();

    let second = link_dfs::instance();
    assert_eq!(second.block_size(), 1024);

    // Readers holding the old instance keep operating on it.
    assert!(first.get_block(&stream("gone", PackExt::Pack), 0).is_none());

    // A rejected configuration leaves the current instance in place.
    assert!(link_dfs::reconfigure(Config {
        block_size: 3,
        ..Config::default()
    })
    .is_err());
    assert_eq!(link_dfs::instance().block_size(), 1024)
}
