// Copyright © 2021 The Radicle Link Contributors
//
// This file is part of radicle-link, distributed under the GPLv3 with Radicle
// Linking Exception. For full terms see the included LICENSE file.

pub mod block;
pub mod cache;
pub mod stream;

pub use block::{Block, BlockFile};
pub use cache::{instance, reconfigure, BlockCache, Config, Handle, Loaded, StatsView};
pub use stream::{PackExt, StreamKey};
