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

//! Hosted-channel protocol messages

use std::io;

use amplify::Slice32;
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin_scripts::hlc::{HashLock, HashPreimage};
use bitcoin_scripts::PubkeyScript;
use lightning_encoding::{LightningDecode, LightningEncode};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

use super::{ChannelId, NodeColor};

/// Error code for a state signed over a block day too distant from the
/// current one
pub const ERR_HOSTED_WRONG_BLOCKDAY: &str = "0001";
/// Error code for an invalid local signature inside a received state
pub const ERR_HOSTED_WRONG_LOCAL_SIG: &str = "0002";
/// Error code for an invalid remote signature inside a received state
pub const ERR_HOSTED_WRONG_REMOTE_SIG: &str = "0003";
/// Error code set when the remote peer has closed the channel
pub const ERR_HOSTED_CLOSED_BY_REMOTE_PEER: &str = "0004";
/// Error code for an outgoing HTLC which was not resolved in time
pub const ERR_HOSTED_TIMED_OUT_OUTGOING_HTLC: &str = "0005";
/// Error code for an HTLC which got fulfilled outside of the channel
pub const ERR_HOSTED_HTLC_EXTERNAL_FULFILL: &str = "0006";
/// Error code set when the host denies the channel
pub const ERR_HOSTED_CHANNEL_DENIED: &str = "0007";
/// Error code for a manual, client-initiated suspend
pub const ERR_HOSTED_MANUAL_SUSPEND: &str = "0008";
/// Error code for a resize proposal which can not be reconciled
pub const ERR_HOSTED_INVALID_RESIZE: &str = "0009";

/// First message of the hosted-channel handshake, sent by the client both on
/// the initial open and on every reconnection.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("invoke_hosted_channel({chain_hash}, ...)")]
pub struct InvokeHostedChannel {
    /// The genesis hash of the blockchain the channel values are bound to
    pub chain_hash: Slice32,

    /// Client refund script committed into every cross-signed state. This
    /// core never publishes it on-chain; it exists as evidence.
    pub refund_script_pubkey: PubkeyScript,

    /// Arbitrary secret negotiated out of band, may entitle the client to
    /// non-default channel parameters
    pub secret: Vec<u8>,
}

/// Immutable channel parameters proposed by the host in response to
/// [`InvokeHostedChannel`]. Committed into every [`LastCrossSignedState`].
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display(
    "init_hosted_channel({channel_capacity_msat}, \
     {initial_client_balance_msat}, ...)"
)]
pub struct InitHostedChannel {
    /// The maximum total value of in-flight HTLCs, in milli-satoshi
    pub max_htlc_value_in_flight_msat: u64,

    /// The minimum HTLC size the host accepts, in milli-satoshi
    pub htlc_minimum_msat: u64,

    /// The maximum number of in-flight HTLCs
    pub max_accepted_htlcs: u16,

    /// Total channel capacity, in milli-satoshi
    pub channel_capacity_msat: u64,

    /// Balance given to the client at channel creation, in milli-satoshi
    pub initial_client_balance_msat: u64,

    /// Feature list of the hosted channel
    pub features: Vec<u16>,
}

/// Compact signing handshake message: carries the signer's view counters and
/// its signature over the counterparty's next cross-signed state.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("state_update({block_day}, {local_updates}, {remote_updates}, ...)")]
pub struct StateUpdate {
    /// Day number the signed state is bound to
    pub block_day: u32,

    /// Number of updates originated by the sender included in the state
    pub local_updates: u32,

    /// Number of updates originated by the receiver included in the state
    pub remote_updates: u32,

    /// Sender's signature over the receiver-view state hash
    pub local_sig_of_remote_lcss: Signature,
}

/// Host-initiated forced state reset, effective only after the client
/// explicitly accepts it.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display(
    "state_override({block_day}, {local_balance_msat}, {local_updates}, \
     {remote_updates}, ...)"
)]
pub struct StateOverride {
    /// Day number the overridden state is bound to
    pub block_day: u32,

    /// Host balance after the override, in milli-satoshi
    pub local_balance_msat: u64,

    /// Host update counter after the override
    pub local_updates: u32,

    /// Client update counter after the override
    pub remote_updates: u32,

    /// Host signature over the client-view overridden state
    pub local_sig_of_remote_lcss: Signature,
}

/// Client-initiated capacity increase, signed separately and folded into the
/// next cross-signed state.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("resize_channel({new_capacity_msat}, ...)")]
pub struct ResizeChannel {
    /// New total channel capacity, in milli-satoshi
    pub new_capacity_msat: u64,

    /// Client signature over `sha256(le64(new_capacity_msat))`
    pub client_sig: Signature,
}

impl ResizeChannel {
    fn sig_hash(new_capacity_msat: u64) -> Message {
        let mut engine = sha256::Hash::engine();
        engine.input(&new_capacity_msat.to_le_bytes());
        let hash = sha256::Hash::from_engine(engine);
        Message::from_slice(hash.as_inner())
            .expect("SHA256 hash is a valid message")
    }

    /// Creates resize proposal signed with the client node key
    pub fn with(new_capacity_msat: u64, node_key: &SecretKey) -> ResizeChannel {
        let msg = ResizeChannel::sig_hash(new_capacity_msat);
        ResizeChannel {
            new_capacity_msat,
            client_sig: SECP256K1.sign_ecdsa(&msg, node_key),
        }
    }

    /// Verifies the client signature over the proposed capacity
    pub fn verify_client_sig(&self, pubkey: PublicKey) -> bool {
        let msg = ResizeChannel::sig_hash(self.new_capacity_msat);
        SECP256K1
            .verify_ecdsa(&msg, &self.client_sig, &pubkey)
            .is_ok()
    }
}

/// Request for host branding, sent by the client once the channel is open
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("ask_branding_info({channel_id})")]
pub struct AskBrandingInfo {
    /// The channel ID
    pub channel_id: ChannelId,
}

/// Host branding details displayed by wallet UIs
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("hosted_channel_branding({contact_info}, ...)")]
pub struct HostedChannelBranding {
    /// Brand color
    pub rgb: NodeColor,

    /// Optional PNG icon of the host
    pub png_icon: Option<Vec<u8>>,

    /// Host contact information
    pub contact_info: String,
}

/// Signature allowing announcement of a public hosted channel
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[display("announcement_signature(...)")]
pub struct AnnouncementSignature {
    /// Signature over the channel announcement
    pub node_signature: Signature,

    /// Whether the sender expects an announcement signature in response
    pub wants_reply: bool,
}

impl AnnouncementSignature {
    fn encode<E: io::Write>(&self, mut e: E) -> Result<usize, io::Error> {
        let mut len = e.write(&self.node_signature.serialize_compact())?;
        len += e.write(&[self.wants_reply as u8])?;
        Ok(len)
    }

    fn decode<D: io::Read>(mut d: D) -> Result<Self, io::Error> {
        let mut sig = [0u8; 64];
        d.read_exact(&mut sig)?;
        let node_signature = Signature::from_compact(&sig)
            .map_err(|_| io::ErrorKind::InvalidData)?;
        let mut flag = [0u8; 1];
        d.read_exact(&mut flag)?;
        Ok(AnnouncementSignature {
            node_signature,
            wants_reply: flag[0] != 0,
        })
    }
}

impl LightningEncode for AnnouncementSignature {
    #[inline]
    fn lightning_encode<E: io::Write>(
        &self,
        e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        self.encode(e).map_err(lightning_encoding::Error::from)
    }
}

impl LightningDecode for AnnouncementSignature {
    #[inline]
    fn lightning_decode<D: io::Read>(
        d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        Self::decode(d).map_err(lightning_encoding::Error::from)
    }
}

#[cfg(feature = "strict_encoding")]
impl strict_encoding::StrictEncode for AnnouncementSignature {
    #[inline]
    fn strict_encode<E: io::Write>(
        &self,
        e: E,
    ) -> Result<usize, strict_encoding::Error> {
        self.encode(e).map_err(strict_encoding::Error::from)
    }
}

#[cfg(feature = "strict_encoding")]
impl strict_encoding::StrictDecode for AnnouncementSignature {
    #[inline]
    fn strict_decode<D: io::Read>(
        d: D,
    ) -> Result<Self, strict_encoding::Error> {
        Self::decode(d).map_err(strict_encoding::Error::from)
    }
}

/// Request for the list of public hosted channels of a host
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("query_public_hosted_channels({chain_hash})")]
pub struct QueryPublicHostedChannels {
    /// The genesis hash of the blockchain the request applies to
    pub chain_hash: Slice32,
}

/// Marks the end of a public hosted channels listing
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("reply_public_hosted_channels_end({chain_hash})")]
pub struct ReplyPublicHostedChannelsEnd {
    /// The genesis hash of the blockchain the reply applies to
    pub chain_hash: Slice32,
}

/// Request for payment preimages known to a sync peer, used by the on-chain
/// preimage rescue procedure
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("query_preimages(...)")]
pub struct QueryPreimages {
    /// Payment hashes to look preimages up for
    pub hashes: Vec<HashLock>,
}

/// Preimages revealed by a sync peer in response to [`QueryPreimages`]
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("reply_preimages(...)")]
pub struct ReplyPreimages {
    /// Revealed payment preimages
    pub preimages: Vec<HashPreimage>,
}
