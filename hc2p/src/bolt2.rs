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

//! BOLT-2 HTLC update messages: hosted channels reuse them verbatim, with the
//! exception that trailing extension TLVs are left to the transport codec.

use bitcoin::hashes::sha256;
use bitcoin_scripts::hlc::{HashLock, HashPreimage};

use super::{ChannelId, OnionPacket};

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display(
    "update_add_htlc({channel_id}, {htlc_id}, {amount_msat}, {payment_hash}, \
     {cltv_expiry}, ...)"
)]
pub struct UpdateAddHtlc {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The HTLC ID
    pub htlc_id: u64,

    /// The HTLC value in milli-satoshi
    pub amount_msat: u64,

    /// The payment hash, the pre-image of which controls HTLC redemption
    pub payment_hash: HashLock,

    /// The expiry height of the HTLC
    pub cltv_expiry: u32,

    /// An obfuscated list of hops and instructions for each hop along the
    /// path. It commits to the HTLC by setting the payment_hash as associated
    /// data, i.e. includes the payment_hash in the computation of HMACs. This
    /// prevents replay attacks that would reuse a previous
    /// onion_routing_packet with a different payment_hash.
    pub onion_routing_packet: OnionPacket,
}

impl UpdateAddHtlc {
    /// Checks whether the given preimage unlocks this HTLC
    #[inline]
    pub fn is_unlocked_by(&self, preimage: HashPreimage) -> bool {
        self.payment_hash == HashLock::from(preimage)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("update_fulfill_htlc({channel_id}, {htlc_id}, ...preimages)")]
pub struct UpdateFulfillHtlc {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The HTLC ID
    pub htlc_id: u64,

    /// The pre-image of the payment hash, allowing HTLC redemption
    pub payment_preimage: HashPreimage,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("update_fail_htlc({channel_id}, {htlc_id}, ...reason)")]
pub struct UpdateFailHtlc {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The HTLC ID
    pub htlc_id: u64,

    /// The reason field is an opaque encrypted blob for the benefit of the
    /// original HTLC initiator, as defined in BOLT #4; however, there's a
    /// special malformed failure variant for the case where the peer couldn't
    /// parse it: in this case the current node instead takes action,
    /// encrypting it into a update_fail_htlc for relaying.
    pub reason: Vec<u8>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("update_fail_malformed_htlc({channel_id}, {htlc_id}, ...onion)")]
pub struct UpdateFailMalformedHtlc {
    /// The channel ID
    pub channel_id: ChannelId,

    /// The HTLC ID
    pub htlc_id: u64,

    /// SHA256 hash of onion data
    pub sha256_of_onion: sha256::Hash,

    /// The failure code
    pub failure_code: u16,
}

/// Sum of the four HTLC update messages: entries of the unsigned update
/// queues inside the hosted-channel commitment store.
#[derive(Clone, PartialEq, Eq, Debug, Display, From)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display(inner)]
pub enum UpdateMessage {
    #[from]
    AddHtlc(UpdateAddHtlc),

    #[from]
    FulfillHtlc(UpdateFulfillHtlc),

    #[from]
    FailHtlc(UpdateFailHtlc),

    #[from]
    FailMalformedHtlc(UpdateFailMalformedHtlc),
}

impl UpdateMessage {
    /// Id of the HTLC the update refers to
    pub fn htlc_id(&self) -> u64 {
        match self {
            UpdateMessage::AddHtlc(add) => add.htlc_id,
            UpdateMessage::FulfillHtlc(fulfill) => fulfill.htlc_id,
            UpdateMessage::FailHtlc(fail) => fail.htlc_id,
            UpdateMessage::FailMalformedHtlc(fail) => fail.htlc_id,
        }
    }

    /// Detects updates which resolve an HTLC with a failure
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            UpdateMessage::FailHtlc(_) | UpdateMessage::FailMalformedHtlc(_)
        )
    }
}
