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

use std::collections::{BTreeMap, BTreeSet};

use amplify::Slice32;
use bitcoin_scripts::hlc::{HashLock, HashPreimage};
use chrono::Utc;
use hc2p::{
    HostedChannelBranding, Messages, OnionPacket, StateOverride,
    UpdateAddHtlc, UpdateMessage,
};

/// Channel lifecycle: states of the hosted-channel state machine.
///
/// Once a local or remote error is recorded the channel is additionally
/// *suspended*, which is an overlay over `Open`/`Sleeping` rather than a
/// separate lifecycle stage: only fulfills, overrides and inbound
/// error/state messages are processed while suspended.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[repr(u8)]
pub enum Lifecycle {
    /// Channel is initialized, communications with the remote host have not
    /// started yet
    #[display("INIT")]
    Initial,

    /// Waiting for a socket to the host before invoking the channel
    #[display("WAIT_FOR_INIT")]
    WaitForInit,

    /// Sent `invoke_hosted_channel`, waiting for the host to reply with
    /// channel parameters or a known state
    #[display("WAIT_FOR_ACCEPT")]
    WaitForAccept,

    /// Sent the signature over the zero state, waiting for the host
    /// signature to arrive
    #[display("WAIT_REMOTE_STATE_UPDATE")]
    WaitRemoteStateUpdate,

    /// Channel is operational
    #[display("OPEN")]
    Open,

    /// Socket to the host is down; state is kept and will be reconciled by
    /// the resync procedure on the next connection
    #[display("SLEEPING")]
    Sleeping,
}

/// Snapshot of the global chain view threaded into the state machine as an
/// explicit environment value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display, Default)]
#[display("{height}@{day}")]
pub struct BlockStamp {
    /// Current chain tip height
    pub height: u32,

    /// Current day number: days since the unix epoch, UTC. Signed states are
    /// bound to this value, so both peers must derive it from UTC wall
    /// clock; a drift above one day suspends signing.
    pub day: u32,
}

impl BlockStamp {
    /// Constructs stamp for a given chain height with explicitly provided
    /// day number
    pub fn with(height: u32, day: u32) -> BlockStamp {
        BlockStamp { height, day }
    }

    /// Constructs stamp for a given chain height taking the day number from
    /// the UTC wall clock
    pub fn at_height(height: u32) -> BlockStamp {
        BlockStamp {
            height,
            day: (Utc::now().timestamp() / 86400) as u32,
        }
    }
}

/// Commands issued by upper layers (payment FSMs, wallet UI) to the channel
/// state machine.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Command {
    /// Route a new outgoing HTLC through the channel
    AddHtlc {
        amount_msat: u64,
        payment_hash: HashLock,
        cltv_expiry: u32,
        onion_routing_packet: OnionPacket,
    },

    /// Reveal the preimage of an incoming HTLC. Permitted even while the
    /// channel is suspended: a preimage is value and must always propagate.
    FulfillHtlc {
        htlc_id: u64,
        payment_preimage: HashPreimage,
    },

    /// Fail an incoming HTLC
    FailHtlc { htlc_id: u64, reason: Vec<u8> },

    /// Fail an incoming HTLC which carried an unparsable onion
    FailMalformedHtlc {
        htlc_id: u64,
        sha256_of_onion: Slice32,
        failure_code: u16,
    },

    /// Commit all pending updates into a new cross-signed state
    Sign,

    /// Propose increasing channel capacity by the given amount
    ProposeResize { delta_msat: u64 },

    /// Accept a previously received host state override
    AcceptOverride,
}

/// Inputs processed by the channel state machine. A single channel processes
/// events strictly serially; each transition is atomic with respect to the
/// next event.
#[derive(Clone, PartialEq, Debug)]
pub enum Event {
    /// Message from the remote host
    Peer(Messages),

    /// Command from an upper layer
    Command(Command),

    /// New chain tip observed
    Block(BlockStamp),

    /// Transport connection to the host established
    SocketOnline,

    /// Transport connection to the host lost
    SocketOffline,

    /// Completion of an on-chain preimage lookup requested earlier via
    /// [`Reaction::preimage_request`]
    PreimagesRevealed(BTreeMap<HashLock, HashPreimage>),
}

/// Remote party has revealed a preimage for one of our outgoing HTLCs,
/// either over the wire or on-chain.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RemoteFulfill {
    /// The fulfilled outgoing HTLC
    pub add: UpdateAddHtlc,

    /// Preimage unlocking it
    pub preimage: HashPreimage,
}

/// Notifications emitted towards upper layers. Listeners address the channel
/// through its opaque id, never through a back-pointer into the state
/// machine.
#[derive(Clone, PartialEq, Debug)]
pub enum ChannelEvent {
    /// A new incoming HTLC got cross-signed
    AddReceived(UpdateAddHtlc),

    /// Remote peer has revealed a preimage for our outgoing HTLC
    FulfillReceived(RemoteFulfill),

    /// An outgoing HTLC was rejected before leaving the channel
    AddRejectedLocally {
        add: UpdateAddHtlc,
        reason: super::LocalReject,
    },

    /// Remote peer has failed our outgoing HTLC
    AddRejectedRemotely {
        add: UpdateAddHtlc,
        fail: UpdateMessage,
    },

    /// A new cross-signed state is in place; payment resolvers must re-check
    /// their in-flight HTLCs
    ResolversNotified,

    /// Channel lifecycle stage has changed
    StateTransition { old: Lifecycle, new: Lifecycle },

    /// Host branding information has arrived
    BrandingUpdated(HostedChannelBranding),

    /// Host has proposed a state override which requires explicit user
    /// acceptance
    OverrideProposed(StateOverride),

    /// Remote peer has failed the channel; it is now suspended
    RemoteErrored(hc2p::Fail),
}

/// Outcome of a single state transition: what to persist, send and notify.
/// The runtime applies it with store-before-send ordering.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Reaction {
    /// The new channel state must be made durable before any of `sends` is
    /// observable by the remote party
    pub persist: bool,

    /// Messages to send to the host, in order
    pub sends: Vec<Messages>,

    /// Notifications for upper layers
    pub events: Vec<ChannelEvent>,

    /// Payment hashes to look up on-chain; completion re-enters the state
    /// machine as [`Event::PreimagesRevealed`]
    pub preimage_request: Option<BTreeSet<HashLock>>,

    /// Drop the transport connection; the resync procedure will reconcile
    /// state on the next connection
    pub disconnect: bool,
}

impl Reaction {
    pub(super) fn none() -> Reaction {
        Reaction::default()
    }

    pub(super) fn send(message: Messages) -> Reaction {
        Reaction {
            sends: vec![message],
            ..Reaction::default()
        }
    }

    pub(super) fn store_and_send(sends: Vec<Messages>) -> Reaction {
        Reaction {
            persist: true,
            sends,
            ..Reaction::default()
        }
    }

    pub(super) fn disconnect() -> Reaction {
        Reaction {
            disconnect: true,
            ..Reaction::default()
        }
    }
}
