// Copyright (c) 2018-2022 The Botho Foundation

//! Common types shared by the Botho consensus crates.

#![deny(missing_docs)]

pub mod logger;
mod peer_id;

pub use peer_id::{PeerId, PeerIdError, PEER_ID_LEN};
