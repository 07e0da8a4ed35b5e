//! Proptest generators for property-based testing.

use proptest::prelude::*;

use kebe_core::{Keypair, Risk};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a risk.
pub fn risk() -> impl Strategy<Value = Risk> {
    prop_oneof![
        Just(Risk::Stable),
        Just(Risk::Candidate),
        Just(Risk::Beta),
        Just(Risk::Edge),
    ]
}

/// Generate a track name.
pub fn track_name() -> impl Strategy<Value = String> {
    "[0-9]{1,2}\\.[0-9]{1,2}|latest|lts-[a-z]{2,6}"
}

/// Generate a valid, registrable snap name.
pub fn snap_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,10}(-[a-z0-9]{1,8}){0,2}"
}

/// Generate a fully qualified `track/risk` channel with its parts.
pub fn channel() -> impl Strategy<Value = (String, String, Risk)> {
    (track_name(), risk()).prop_map(|(track, risk)| (format!("{}/{}", track, risk), track, risk))
}

/// Generate snap file contents.
pub fn snap_bytes() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..4096)
}

/// Generate a split of `len` bytes into chunk lengths.
pub fn chunk_sizes() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..512, 1..16)
}
