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

//! Deterministic fixtures shared by the state machine test suites: a client
//! channel driven through the real event interface and a hand-rolled host
//! side producing signatures the way a real host would.

use amplify::{DumbDefault, Slice32, Wrapper};
use bitcoin::hashes::Hash;
use bitcoin_scripts::hlc::{HashLock, HashPreimage};
use bitcoin_scripts::PubkeyScript;
use hc2p::hosted::ERR_HOSTED_MANUAL_SUSPEND;
use hc2p::{
    Fail, InitHostedChannel, LastCrossSignedState, Messages, OnionPacket,
    StateUpdate, UpdateAddHtlc,
};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

use super::{
    BlockStamp, ChannelHosted, Command, Event, HostedCommits, HostedPolicy,
    Lifecycle, NodeSigner, RemoteNodeInfo,
};

pub fn client_key() -> SecretKey {
    SecretKey::from_slice(&[0x11; 32]).unwrap()
}

pub fn host_key() -> SecretKey {
    SecretKey::from_slice(&[0x22; 32]).unwrap()
}

pub fn client_pubkey() -> PublicKey {
    PublicKey::from_secret_key(SECP256K1, &client_key())
}

pub fn host_pubkey() -> PublicKey {
    PublicKey::from_secret_key(SECP256K1, &host_key())
}

pub fn remote_info() -> RemoteNodeInfo {
    RemoteNodeInfo {
        node_id: host_pubkey(),
        node_specific_pubkey: client_pubkey(),
        alias: s!("test host"),
    }
}

pub fn policy() -> HostedPolicy {
    HostedPolicy {
        max_htlc_value_in_flight_msat_min: 90_000_000,
        ..HostedPolicy::default()
    }
}

/// Chain tip used by the fixtures: height 18900, day 19000
pub fn start_block() -> BlockStamp {
    BlockStamp::with(18900, 19000)
}

pub fn block(height: u32) -> BlockStamp {
    BlockStamp::with(height, 19000)
}

pub fn init(
    channel_capacity_msat: u64,
    initial_client_balance_msat: u64,
) -> InitHostedChannel {
    InitHostedChannel {
        max_htlc_value_in_flight_msat: 90_000_000,
        htlc_minimum_msat: 1000,
        max_accepted_htlcs: 10,
        channel_capacity_msat,
        initial_client_balance_msat,
        features: vec![],
    }
}

/// Host signature over the client-view state, as the real host would produce
/// when replying in a signing round
pub fn host_sign(client_view: &LastCrossSignedState) -> Signature {
    let msg = Message::from_slice(client_view.hosted_sig_hash().as_inner())
        .expect("SHA256 hash is a valid message");
    SECP256K1.sign_ecdsa(&msg, &host_key())
}

/// The `state_update` reply of the host for a given client-view state:
/// counters mirror the client view, the signature covers its hash
pub fn host_state_update(client_view: &LastCrossSignedState) -> StateUpdate {
    StateUpdate {
        block_day: client_view.block_day,
        local_updates: client_view.remote_updates,
        remote_updates: client_view.local_updates,
        local_sig_of_remote_lcss: host_sign(client_view),
    }
}

pub fn preimage(id: u8) -> HashPreimage {
    HashPreimage::from(Slice32::from_inner([id; 32]))
}

pub fn payment_hash(id: u8) -> HashLock {
    HashLock::from(preimage(id))
}

pub fn add_command(amount_msat: u64, preimage_id: u8, cltv_expiry: u32) -> Command {
    Command::AddHtlc {
        amount_msat,
        payment_hash: payment_hash(preimage_id),
        cltv_expiry,
        onion_routing_packet: OnionPacket::dumb_default(),
    }
}

/// A not-yet-established channel just as the wallet creates it
pub fn fresh_channel() -> ChannelHosted {
    ChannelHosted::open_with(
        remote_info(),
        NodeSigner::with(client_key()),
        Slice32::default(),
        PubkeyScript::default(),
        vec![],
        policy(),
        start_block(),
    )
}

/// Runs the full establishment handshake and returns an operational channel
pub fn opened_channel(
    channel_capacity_msat: u64,
    initial_client_balance_msat: u64,
) -> ChannelHosted {
    let mut channel = fresh_channel();
    channel.process(Event::SocketOnline).unwrap();
    channel
        .process(Event::Peer(Messages::InitHostedChannel(init(
            channel_capacity_msat,
            initial_client_balance_msat,
        ))))
        .unwrap();
    let state = channel.commits().unwrap().last_cross_signed_state.clone();
    channel
        .process(Event::Peer(Messages::StateUpdate(host_state_update(
            &state,
        ))))
        .unwrap();
    assert_eq!(channel.stage(), Lifecycle::Open);
    channel
}

/// The incoming add the host would send next over the given channel
pub fn incoming_add(
    channel: &ChannelHosted,
    amount_msat: u64,
    preimage_id: u8,
) -> UpdateAddHtlc {
    let commits = channel.commits().unwrap();
    UpdateAddHtlc {
        channel_id: commits.remote_info.channel_id(),
        htlc_id: commits.next_incoming_htlc_id(),
        amount_msat,
        payment_hash: payment_hash(preimage_id),
        cltv_expiry: 19050,
        onion_routing_packet: OnionPacket::dumb_default(),
    }
}

/// A suspended channel holding a single cross-signed outgoing HTLC: capacity
/// 200m, client balance 100m minus the HTLC amount
pub fn errored_channel_with_outgoing(
    htlc_id: u64,
    amount_msat: u64,
) -> ChannelHosted {
    let add = UpdateAddHtlc {
        channel_id: remote_info().channel_id(),
        htlc_id,
        amount_msat,
        payment_hash: payment_hash(htlc_id as u8),
        cltv_expiry: 19050,
        onion_routing_packet: OnionPacket::dumb_default(),
    };
    let state = LastCrossSignedState {
        is_host: false,
        refund_script_pubkey: PubkeyScript::default(),
        init_hosted_channel: init(200_000_000, 100_000_000),
        block_day: 19000,
        local_balance_msat: 100_000_000 - amount_msat,
        remote_balance_msat: 100_000_000,
        local_updates: htlc_id as u32,
        remote_updates: 0,
        incoming_htlcs: vec![],
        outgoing_htlcs: vec![add],
        remote_sig_of_local: hc2p::dumb_sig(),
        local_sig_of_remote: hc2p::dumb_sig(),
    };
    let mut commits = HostedCommits::with(remote_info(), state);
    commits.local_error = Some(Fail::with_code(
        commits.remote_info.channel_id(),
        ERR_HOSTED_MANUAL_SUSPEND,
    ));
    let mut channel = ChannelHosted::restore(
        NodeSigner::with(client_key()),
        Slice32::default(),
        policy(),
        commits,
        start_block(),
    );
    channel.stage = Lifecycle::Open;
    channel
}

/// Cross-signs a client-view state with both test keys, the way a completed
/// signing round would leave it
pub fn cross_signed(
    client_view: LastCrossSignedState,
) -> LastCrossSignedState {
    let mut state = client_view.with_local_sig_of_remote(&client_key());
    state.remote_sig_of_local = host_sign(&state);
    state
}
