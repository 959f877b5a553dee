// Copyright © 2021 The Radicle Link Contributors
//
// This file is part of radicle-link, distributed under the GPLv3 with Radicle
// Linking Exception. For full terms see the included LICENSE file.

use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use rand::{seq::SliceRandom as _, Rng as _};

use link_dfs::{Loaded, PackExt};

use crate::{
    dfs::{byte_at, cache, contents, stream, Parsed, TestFile},
    logging,
};

#[test]
fn concurrent_misses_coalesce_into_one_load() {
    logging::init();

    let cache = Arc::new(cache(64 * 1024, 1024 * 1024));
    let file = Arc::new(
        TestFile::new(stream("pack-1", PackExt::Pack), 64 * 1024, 64 * 1024)
            .delayed(Duration::from_millis(10)),
    );

    let threads: Vec<_> = (0..32)
        .map(|_| {
            let cache = cache.clone();
            let file = file.clone();
            thread::spawn(move || {
                let block = cache.get_or_load_block(&*file, 0).unwrap();
                assert_eq!(block.data(), &contents(0, 64 * 1024)[..]);
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(file.loads(), 1);
    let stats = cache.stats();
    assert_eq!(stats.misses[PackExt::Pack.position()], 1);
    assert_eq!(stats.hits[PackExt::Pack.position()], 31)
}

#[test]
fn concurrent_ref_misses_coalesce_into_one_load() {
    let cache = Arc::new(cache(512, 8 * 512));
    let key = stream("pack-1", PackExt::Index);
    let loads = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            let key = key.clone();
            let loads = loads.clone();
            thread::spawn(move || {
                let handle = cache
                    .get_or_load_ref(&key, 0, || {
                        loads.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        Ok::<_, Infallible>(Loaded {
                            value: Parsed("idx"),
                            size: 64,
                        })
                    })
                    .unwrap();
                assert_eq!(handle.get().unwrap().0, "idx");
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(loads.load(Ordering::SeqCst), 1)
}

#[test]
fn failed_load_credits_the_reservation() {
    let cache = cache(512, 8 * 512);
    let file = TestFile::new(stream("pack-1", PackExt::Pack), 512, 512);

    file.fail_next();
    assert!(cache.get_or_load_block(&file, 0).is_err());
    assert_eq!(file.loads(), 1);
    assert_eq!(cache.current_size(), 0);
    assert!(!cache.contains(file.key(), 0));

    // A failure does not poison the key.
    let block = cache.get_or_load_block(&file, 0).unwrap();
    assert_eq!(block.data(), &contents(0, 512)[..]);
    assert_eq!(file.loads(), 2);
    assert_eq!(cache.current_size(), 512)
}

#[test]
fn smash_the_cache() {
    // Readers hammer a small cache from many threads. Whatever interleaving
    // happens, returned bytes must match the backing stream, and once the
    // dust settles the ceiling must hold.
    logging::init();

    let cache = Arc::new(cache(512, 8 * 512));
    let files: Vec<_> = (0..8)
        .map(|i| {
            Arc::new(TestFile::new(
                stream(&format!("pack-{}", i), PackExt::Pack),
                512,
                4096,
            ))
        })
        .collect();

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let files = files.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..200 {
                    let file = files.choose(&mut rng).unwrap();
                    let position = rng.gen_range(0..4096u64);
                    let block = cache.get_or_load_block(&**file, position).unwrap();
                    assert!(block.contains(file.key(), position));
                    let mut buf = [0u8; 1];
                    assert_eq!(block.copy(position, &mut buf), 1);
                    assert_eq!(buf[0], byte_at(position));
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert!(cache.current_size() <= 8 * 512)
}
