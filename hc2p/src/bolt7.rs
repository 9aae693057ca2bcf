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

//! BOLT-7 gossip: hosted channels keep the latest `channel_update` from the
//! host inside the commitment store for routing purposes.

use std::io;

use amplify::Slice32;
use lightning_encoding::{LightningDecode, LightningEncode};
use secp256k1::ecdsa::Signature;

use super::ShortChannelId;

/// Bit of `message_flags` signalling the presence of `htlc_maximum_msat`
pub const CHANNEL_UPDATE_OPTION_MAXIMUM_HTLC: u8 = 1;

/// After creating the channel announcement, it can be updated by the channel
/// operators. For hosted channels only the host issues updates, and the
/// optional `htlc_maximum_msat` field must survive storage round-trips.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("channel_update({short_channel_id}, {timestamp}, ...)")]
pub struct ChannelUpdate {
    /// Signature of the sender node over the remaining message fields
    pub signature: Signature,

    /// The genesis hash of the blockchain where the channel resides
    pub chain_hash: Slice32,

    /// Short channel id the update applies to
    pub short_channel_id: ShortChannelId,

    /// Posix timestamp of the update
    pub timestamp: u32,

    /// Message flags; the lowest bit governs `htlc_maximum_msat` presence
    pub message_flags: u8,

    /// Channel flags: direction and disabled bits
    pub channel_flags: u8,

    /// Number of blocks the sender subtracts from the incoming HTLC expiry
    pub cltv_expiry_delta: u16,

    /// The minimum HTLC value the sender will route, in milli-satoshi
    pub htlc_minimum_msat: u64,

    /// Base routing fee in milli-satoshi
    pub fee_base_msat: u32,

    /// Proportional routing fee in millionths of a satoshi
    pub fee_proportional_millionths: u32,

    /// The maximum HTLC value the sender will route, in milli-satoshi;
    /// governed by the lowest bit of `message_flags`
    pub htlc_maximum_msat: Option<u64>,
}

impl LightningEncode for ChannelUpdate {
    fn lightning_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        let mut message_flags =
            self.message_flags & !CHANNEL_UPDATE_OPTION_MAXIMUM_HTLC;
        if self.htlc_maximum_msat.is_some() {
            message_flags |= CHANNEL_UPDATE_OPTION_MAXIMUM_HTLC;
        }

        let mut len = self.signature.lightning_encode(&mut e)?;
        len += self.chain_hash.lightning_encode(&mut e)?;
        len += self.short_channel_id.lightning_encode(&mut e)?;
        len += self.timestamp.lightning_encode(&mut e)?;
        len += message_flags.lightning_encode(&mut e)?;
        len += self.channel_flags.lightning_encode(&mut e)?;
        len += self.cltv_expiry_delta.lightning_encode(&mut e)?;
        len += self.htlc_minimum_msat.lightning_encode(&mut e)?;
        len += self.fee_base_msat.lightning_encode(&mut e)?;
        len += self.fee_proportional_millionths.lightning_encode(&mut e)?;
        if let Some(htlc_maximum_msat) = self.htlc_maximum_msat {
            len += htlc_maximum_msat.lightning_encode(&mut e)?;
        }
        Ok(len)
    }
}

impl LightningDecode for ChannelUpdate {
    fn lightning_decode<D: io::Read>(
        mut d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        let signature = Signature::lightning_decode(&mut d)?;
        let chain_hash = Slice32::lightning_decode(&mut d)?;
        let short_channel_id = ShortChannelId::lightning_decode(&mut d)?;
        let timestamp = u32::lightning_decode(&mut d)?;
        let message_flags = u8::lightning_decode(&mut d)?;
        let channel_flags = u8::lightning_decode(&mut d)?;
        let cltv_expiry_delta = u16::lightning_decode(&mut d)?;
        let htlc_minimum_msat = u64::lightning_decode(&mut d)?;
        let fee_base_msat = u32::lightning_decode(&mut d)?;
        let fee_proportional_millionths = u32::lightning_decode(&mut d)?;
        let htlc_maximum_msat =
            if message_flags & CHANNEL_UPDATE_OPTION_MAXIMUM_HTLC != 0 {
                Some(u64::lightning_decode(&mut d)?)
            } else {
                None
            };
        Ok(ChannelUpdate {
            signature,
            chain_hash,
            short_channel_id,
            timestamp,
            message_flags,
            channel_flags,
            cltv_expiry_delta,
            htlc_minimum_msat,
            fee_base_msat,
            fee_proportional_millionths,
            htlc_maximum_msat,
        })
    }
}
