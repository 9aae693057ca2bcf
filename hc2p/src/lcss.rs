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

//! Last cross-signed state: the bilaterally signed snapshot of channel
//! balances, update counters and in-flight HTLCs which replaces an on-chain
//! commitment transaction for hosted channels.

use std::io;

use amplify::Wrapper;
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin_scripts::PubkeyScript;
use lightning_encoding::{LightningDecode, LightningEncode};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

use super::{InitHostedChannel, ResizeChannel, StateUpdate, UpdateAddHtlc};

/// Placeholder signature put into not-yet-signed states. Never verifies
/// under any key.
pub fn dumb_sig() -> Signature {
    Signature::from_compact(&[1u8; 64])
        .expect("compact signature of 64 low non-zero bytes")
}

/// Last cross-signed state of a hosted channel.
///
/// Both peers hold a mirrored copy of the same state: each side signs the
/// *other* side's view, so `remote_sig_of_local` of one peer equals
/// `local_sig_of_remote` of the reversed state held by its counterparty.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display(
    "last_cross_signed_state({local_balance_msat}, {remote_balance_msat}, \
     {block_day}, {local_updates}, {remote_updates}, ...)"
)]
pub struct LastCrossSignedState {
    /// Local role: hosted-channel clients always set `false`
    pub is_host: bool,

    /// Client refund script committed into the state
    pub refund_script_pubkey: PubkeyScript,

    /// Immutable channel parameters agreed at open
    pub init_hosted_channel: InitHostedChannel,

    /// Day number of the last signing, binding the state in time
    pub block_day: u32,

    /// Local balance in milli-satoshi
    pub local_balance_msat: u64,

    /// Remote balance in milli-satoshi
    pub remote_balance_msat: u64,

    /// Count of updates originated by the local peer included in this state
    pub local_updates: u32,

    /// Count of updates originated by the remote peer included in this state
    pub remote_updates: u32,

    /// In-flight HTLCs offered to the local peer
    pub incoming_htlcs: Vec<UpdateAddHtlc>,

    /// In-flight HTLCs offered by the local peer
    pub outgoing_htlcs: Vec<UpdateAddHtlc>,

    /// Remote signature over this state hash
    pub remote_sig_of_local: Signature,

    /// Local signature over the reversed state hash
    pub local_sig_of_remote: Signature,
}

impl LastCrossSignedState {
    /// Computes the hosted signature hash: a fixed little-endian
    /// concatenation of the state fields with HTLCs serialized exactly as on
    /// the wire, SHA-256'd.
    pub fn hosted_sig_hash(&self) -> sha256::Hash {
        let mut engine = sha256::Hash::engine();
        engine.input(self.refund_script_pubkey.as_inner().as_bytes());
        engine.input(
            &self.init_hosted_channel.channel_capacity_msat.to_le_bytes(),
        );
        engine.input(
            &self
                .init_hosted_channel
                .initial_client_balance_msat
                .to_le_bytes(),
        );
        engine.input(&self.block_day.to_le_bytes());
        engine.input(&self.local_balance_msat.to_le_bytes());
        engine.input(&self.remote_balance_msat.to_le_bytes());
        engine.input(&self.local_updates.to_le_bytes());
        engine.input(&self.remote_updates.to_le_bytes());
        for add in &self.incoming_htlcs {
            engine.input(
                &add.lightning_serialize()
                    .expect("memory encoders do not fail"),
            );
        }
        for add in &self.outgoing_htlcs {
            engine.input(
                &add.lightning_serialize()
                    .expect("memory encoders do not fail"),
            );
        }
        engine.input(&[self.is_host as u8]);
        sha256::Hash::from_engine(engine)
    }

    /// Produces the same state as seen from the counterparty side: the role
    /// flag, counters, balances, HTLC directions and signatures all swap.
    /// Reversal is an involution: `state.reverse().reverse() == state`.
    pub fn reverse(&self) -> LastCrossSignedState {
        LastCrossSignedState {
            is_host: !self.is_host,
            refund_script_pubkey: self.refund_script_pubkey.clone(),
            init_hosted_channel: self.init_hosted_channel.clone(),
            block_day: self.block_day,
            local_balance_msat: self.remote_balance_msat,
            remote_balance_msat: self.local_balance_msat,
            local_updates: self.remote_updates,
            remote_updates: self.local_updates,
            incoming_htlcs: self.outgoing_htlcs.clone(),
            outgoing_htlcs: self.incoming_htlcs.clone(),
            remote_sig_of_local: self.local_sig_of_remote,
            local_sig_of_remote: self.remote_sig_of_local,
        }
    }

    /// Returns a copy with `local_sig_of_remote` signing the reversed state
    /// hash with the given node key.
    pub fn with_local_sig_of_remote(
        mut self,
        node_key: &SecretKey,
    ) -> LastCrossSignedState {
        let hash = self.reverse().hosted_sig_hash();
        let msg = Message::from_slice(hash.as_inner())
            .expect("SHA256 hash is a valid message");
        self.local_sig_of_remote = SECP256K1.sign_ecdsa(&msg, node_key);
        self
    }

    /// Verifies `remote_sig_of_local` against the local-view state hash
    pub fn verify_remote_sig(&self, pubkey: PublicKey) -> bool {
        let msg = Message::from_slice(self.hosted_sig_hash().as_inner())
            .expect("SHA256 hash is a valid message");
        SECP256K1
            .verify_ecdsa(&msg, &self.remote_sig_of_local, &pubkey)
            .is_ok()
    }

    /// Projects the compact [`StateUpdate`] handshake message out of this
    /// state
    pub fn state_update(&self) -> StateUpdate {
        StateUpdate {
            block_day: self.block_day,
            local_updates: self.local_updates,
            remote_updates: self.remote_updates,
            local_sig_of_remote_lcss: self.local_sig_of_remote,
        }
    }

    /// Both sides have seen the same set of updates
    pub fn is_even(&self, remote: &LastCrossSignedState) -> bool {
        self.remote_updates == remote.local_updates
            && self.local_updates == remote.remote_updates
    }

    /// The local state contains updates the remote state does not know about
    pub fn is_ahead(&self, remote: &LastCrossSignedState) -> bool {
        self.remote_updates > remote.local_updates
            || self.local_updates > remote.remote_updates
    }

    /// Folds an accepted resize proposal: capacity swaps to the new value and
    /// the host-side balance grows by the difference.
    pub fn with_resize(&self, resize: &ResizeChannel) -> LastCrossSignedState {
        let mut state = self.clone();
        let delta = resize
            .new_capacity_msat
            .saturating_sub(state.init_hosted_channel.channel_capacity_msat);
        state.init_hosted_channel.channel_capacity_msat =
            resize.new_capacity_msat;
        if state.is_host {
            state.local_balance_msat += delta;
        } else {
            state.remote_balance_msat += delta;
        }
        state
    }

    /// Total value locked in in-flight HTLCs, in milli-satoshi
    pub fn total_in_flight_msat(&self) -> u64 {
        let incoming: u64 =
            self.incoming_htlcs.iter().map(|add| add.amount_msat).sum();
        let outgoing: u64 =
            self.outgoing_htlcs.iter().map(|add| add.amount_msat).sum();
        incoming + outgoing
    }
}

impl LightningEncode for LastCrossSignedState {
    fn lightning_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        let mut len = (self.is_host as u8).lightning_encode(&mut e)?;
        len += self.refund_script_pubkey.lightning_encode(&mut e)?;
        len += self.init_hosted_channel.lightning_encode(&mut e)?;
        len += self.block_day.lightning_encode(&mut e)?;
        len += self.local_balance_msat.lightning_encode(&mut e)?;
        len += self.remote_balance_msat.lightning_encode(&mut e)?;
        len += self.local_updates.lightning_encode(&mut e)?;
        len += self.remote_updates.lightning_encode(&mut e)?;
        len += self.incoming_htlcs.lightning_encode(&mut e)?;
        len += self.outgoing_htlcs.lightning_encode(&mut e)?;
        len += self.remote_sig_of_local.lightning_encode(&mut e)?;
        len += self.local_sig_of_remote.lightning_encode(&mut e)?;
        Ok(len)
    }
}

impl LightningDecode for LastCrossSignedState {
    fn lightning_decode<D: io::Read>(
        mut d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        Ok(LastCrossSignedState {
            is_host: u8::lightning_decode(&mut d)? != 0,
            refund_script_pubkey: PubkeyScript::lightning_decode(&mut d)?,
            init_hosted_channel: InitHostedChannel::lightning_decode(&mut d)?,
            block_day: u32::lightning_decode(&mut d)?,
            local_balance_msat: u64::lightning_decode(&mut d)?,
            remote_balance_msat: u64::lightning_decode(&mut d)?,
            local_updates: u32::lightning_decode(&mut d)?,
            remote_updates: u32::lightning_decode(&mut d)?,
            incoming_htlcs: Vec::lightning_decode(&mut d)?,
            outgoing_htlcs: Vec::lightning_decode(&mut d)?,
            remote_sig_of_local: Signature::lightning_decode(&mut d)?,
            local_sig_of_remote: Signature::lightning_decode(&mut d)?,
        })
    }
}
