//! Id generation for commands and node identity.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Fixed origin for id timestamps: 2017-01-01T00:00:00Z.
///
/// Measuring from a recent origin keeps the leading component short while
/// preserving ordering across processes.
const ID_EPOCH_MS: u128 = 1_483_228_800_000;

/// Length of the random suffix.
const SUFFIX_LEN: usize = 10;

/// Generates ids of the form `{millis-since-fixed-origin}:{random-suffix}`.
///
/// Ids are globally-orderable-enough: the leading millisecond component
/// gives coarse ordering, the random suffix disambiguates ids minted in
/// the same millisecond. Used for command ids and for node identity (and
/// so for per-node inbox addresses).
#[derive(Clone, Copy, Debug, Default)]
pub struct IdSource;

impl IdSource {
    pub fn new() -> Self {
        Self
    }

    /// Mint a fresh id.
    pub fn generate(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis().saturating_sub(ID_EPOCH_MS))
            .unwrap_or(0);
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SUFFIX_LEN)
            .map(char::from)
            .collect();
        format!("{}:{}", millis, suffix)
    }
}
