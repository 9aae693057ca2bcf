// LNP Hosted Channels library: rust implementation of the trusted
// hosted-channel protocol for the Lightning network (LNP)
//
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

use strict_encoding::{strict_deserialize, strict_serialize};

use super::HostedCommits;

/// Current version of the persisted channel record layout
pub const HOSTED_STATE_VERSION: u16 = 1;

/// Versioned persistent record of a hosted channel, one per channel id.
///
/// The version tag goes first so that future layout changes can be migrated
/// on read; the codec must stay stable across upgrades.
#[derive(Clone, PartialEq, Eq, Debug)]
#[derive(StrictEncode, StrictDecode)]
pub struct StoredChannel {
    /// Layout version of the record
    pub version: u16,

    /// The serialized commitment store
    pub commits: HostedCommits,
}

/// Errors of the persisted channel record codec
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum StoredStateError {
    /// channel record version {found} is not known to this implementation
    /// (the latest supported version is {supported})
    UnknownVersion { found: u16, supported: u16 },

    /// channel record is corrupted: {0}
    #[from]
    Codec(strict_encoding::Error),
}

impl StoredChannel {
    /// Wraps commitment store into the current-version record
    pub fn with(commits: HostedCommits) -> StoredChannel {
        StoredChannel {
            version: HOSTED_STATE_VERSION,
            commits,
        }
    }

    /// Serializes the record for persistence
    pub fn serialize(&self) -> Vec<u8> {
        strict_serialize(self)
            .expect("hosted channel record in-memory serialization")
    }

    /// Restores commitment store from persisted bytes, checking the record
    /// version
    pub fn restore(data: &[u8]) -> Result<HostedCommits, StoredStateError> {
        let stored: StoredChannel = strict_deserialize(data)?;
        if stored.version != HOSTED_STATE_VERSION {
            return Err(StoredStateError::UnknownVersion {
                found: stored.version,
                supported: HOSTED_STATE_VERSION,
            });
        }
        Ok(stored.commits)
    }
}
