// Copyright © 2021 The Radicle Link Contributors
//
// This file is part of radicle-link, distributed under the GPLv3 with Radicle
// Linking Exception. For full terms see the included LICENSE file.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use rustc_hash::FxHasher;

/// The packfile-auxiliary artifacts a stream can carry.
///
/// [`PackExt::position`] is stable for the lifetime of the process and indexes
/// the per-extension statistics arrays of the block cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PackExt {
    Pack,
    Index,
    ReverseIndex,
    Bitmap,
    CommitGraph,
    ObjectSizeIndex,
    Reftable,
}

impl PackExt {
    /// The file suffix conventionally used for this artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pack => "pack",
            Self::Index => "idx",
            Self::ReverseIndex => "rev",
            Self::Bitmap => "bitmap",
            Self::CommitGraph => "graph",
            Self::ObjectSizeIndex => "objsize",
            Self::Reftable => "ref",
        }
    }

    pub fn position(&self) -> usize {
        *self as usize
    }
}

/// Identity of a cacheable byte stream: a file of a repository on the DFS,
/// qualified by the artifact kind it holds.
///
/// The hash is computed once at construction and pre-multiplied by a small
/// prime, so mixing a block position into it later composes cheaply. Keys are
/// immutable; equality is structural.
#[derive(Clone)]
pub struct StreamKey {
    pub(crate) hash: u32,
    ext: PackExt,
    repo: Arc<str>,
    name: Arc<str>,
}

impl StreamKey {
    pub fn new(repo: impl AsRef<str>, name: impl AsRef<str>, ext: PackExt) -> Self {
        let repo: Arc<str> = Arc::from(repo.as_ref());
        let name: Arc<str> = Arc::from(name.as_ref());
        Self {
            hash: mix(&repo, &name, ext),
            ext,
            repo,
            name,
        }
    }

    /// The key of an auxiliary stream derived from the same file, e.g. the
    /// reverse index computed from a primary index.
    pub fn derived(&self, ext: PackExt) -> Self {
        Self {
            hash: mix(&self.repo, &self.name, ext),
            ext,
            repo: self.repo.clone(),
            name: self.name.clone(),
        }
    }

    pub fn ext(&self) -> PackExt {
        self.ext
    }

    pub fn repository(&self) -> &str {
        &self.repo
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn mix(repo: &str, name: &str, ext: PackExt) -> u32 {
    let mut hasher = FxHasher::default();
    repo.hash(&mut hasher);
    name.hash(&mut hasher);
    ext.extension().hash(&mut hasher);
    (hasher.finish() as u32).wrapping_mul(31)
}

impl PartialEq for StreamKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.ext == other.ext
            && self.name == other.name
            && self.repo == other.repo
    }
}

impl Eq for StreamKey {}

impl Hash for StreamKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash)
    }
}

impl fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "StreamKey({}:{}.{})",
            self.repo,
            self.name,
            self.ext.extension()
        )
    }
}
