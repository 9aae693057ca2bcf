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

use std::collections::BTreeSet;

use hc2p::{
    ChannelId, ChannelUpdate, Fail, LastCrossSignedState, ResizeChannel,
    StateOverride, UpdateAddHtlc, UpdateMessage,
};

use super::RemoteNodeInfo;

/// Origin of an update inside the pending queues
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Origin {
    Local,
    Remote,
}

/// Commitment spec: balances and in-flight HTLC sets projected out of a
/// cross-signed state, optionally with pending updates applied on top.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CommitmentSpec {
    /// Local balance in milli-satoshi
    pub to_local_msat: u64,

    /// Remote balance in milli-satoshi
    pub to_remote_msat: u64,

    /// In-flight HTLCs offered to us
    pub incoming_htlcs: Vec<UpdateAddHtlc>,

    /// In-flight HTLCs offered by us
    pub outgoing_htlcs: Vec<UpdateAddHtlc>,
}

impl CommitmentSpec {
    /// Number of in-flight HTLCs in both directions
    pub fn htlc_count(&self) -> usize {
        self.incoming_htlcs.len() + self.outgoing_htlcs.len()
    }

    /// Total value locked in in-flight HTLCs, in milli-satoshi
    pub fn total_in_flight_msat(&self) -> u64 {
        let incoming: u64 =
            self.incoming_htlcs.iter().map(|add| add.amount_msat).sum();
        let outgoing: u64 =
            self.outgoing_htlcs.iter().map(|add| add.amount_msat).sum();
        incoming + outgoing
    }

    /// Finds an in-flight incoming HTLC by its id
    pub fn find_incoming(&self, htlc_id: u64) -> Option<&UpdateAddHtlc> {
        self.incoming_htlcs.iter().find(|add| add.htlc_id == htlc_id)
    }

    /// Finds an in-flight outgoing HTLC by its id
    pub fn find_outgoing(&self, htlc_id: u64) -> Option<&UpdateAddHtlc> {
        self.outgoing_htlcs.iter().find(|add| add.htlc_id == htlc_id)
    }

    /// Applies a single pending update. Updates referencing HTLCs this
    /// projection does not know are skipped: admission of every update was
    /// checked before it entered a queue.
    fn apply(&mut self, origin: Origin, update: &UpdateMessage) {
        match (origin, update) {
            (Origin::Local, UpdateMessage::AddHtlc(add)) => {
                self.to_local_msat -= add.amount_msat;
                self.outgoing_htlcs.push(add.clone());
            }
            (Origin::Remote, UpdateMessage::AddHtlc(add)) => {
                self.to_remote_msat -= add.amount_msat;
                self.incoming_htlcs.push(add.clone());
            }
            (Origin::Local, UpdateMessage::FulfillHtlc(fulfill)) => {
                if let Some(pos) = self
                    .incoming_htlcs
                    .iter()
                    .position(|add| add.htlc_id == fulfill.htlc_id)
                {
                    let add = self.incoming_htlcs.remove(pos);
                    self.to_local_msat += add.amount_msat;
                }
            }
            (Origin::Remote, UpdateMessage::FulfillHtlc(fulfill)) => {
                if let Some(pos) = self
                    .outgoing_htlcs
                    .iter()
                    .position(|add| add.htlc_id == fulfill.htlc_id)
                {
                    let add = self.outgoing_htlcs.remove(pos);
                    self.to_remote_msat += add.amount_msat;
                }
            }
            (Origin::Local, update) => {
                if let Some(pos) = self
                    .incoming_htlcs
                    .iter()
                    .position(|add| add.htlc_id == update.htlc_id())
                {
                    let add = self.incoming_htlcs.remove(pos);
                    self.to_remote_msat += add.amount_msat;
                }
            }
            (Origin::Remote, update) => {
                if let Some(pos) = self
                    .outgoing_htlcs
                    .iter()
                    .position(|add| add.htlc_id == update.htlc_id())
                {
                    let add = self.outgoing_htlcs.remove(pos);
                    self.to_local_msat += add.amount_msat;
                }
            }
        }
    }
}

impl From<&LastCrossSignedState> for CommitmentSpec {
    fn from(state: &LastCrossSignedState) -> CommitmentSpec {
        CommitmentSpec {
            to_local_msat: state.local_balance_msat,
            to_remote_msat: state.remote_balance_msat,
            incoming_htlcs: state.incoming_htlcs.clone(),
            outgoing_htlcs: state.outgoing_htlcs.clone(),
        }
    }
}

/// In-memory commitment store of a hosted channel: the current cross-signed
/// state plus everything which is not covered by it yet.
///
/// Pure value: the state machine replaces the whole record on every
/// transition and persists it as an atomic unit.
#[derive(Clone, PartialEq, Eq, Debug)]
#[derive(StrictEncode, StrictDecode)]
pub struct HostedCommits {
    /// Identity of the remote host and the local key used towards it
    pub remote_info: RemoteNodeInfo,

    /// The bilaterally signed channel snapshot, the canonical shared truth
    pub last_cross_signed_state: LastCrossSignedState,

    /// Updates originated by us, not yet covered by a cross-signed state
    pub next_local_updates: Vec<UpdateMessage>,

    /// Updates originated by the host, not yet covered by a cross-signed
    /// state
    pub next_remote_updates: Vec<UpdateMessage>,

    /// Latest gossip update received from the host
    pub channel_update: Option<ChannelUpdate>,

    /// Outgoing HTLC ids resolved after the channel entered an error state;
    /// suppresses double handling
    pub post_error_outgoing_resolved_ids: BTreeSet<u64>,

    /// Failure produced by the local side, if any
    pub local_error: Option<Fail>,

    /// Failure received from the host, if any
    pub remote_error: Option<Fail>,

    /// Pending capacity increase proposal, signed but not yet folded into a
    /// cross-signed state
    pub resize_proposal: Option<ResizeChannel>,

    /// Host-proposed state override awaiting explicit user acceptance
    pub override_proposal: Option<StateOverride>,
}

impl HostedCommits {
    /// Constructs commitment store around a cross-signed state
    pub fn with(
        remote_info: RemoteNodeInfo,
        last_cross_signed_state: LastCrossSignedState,
    ) -> HostedCommits {
        HostedCommits {
            remote_info,
            last_cross_signed_state,
            next_local_updates: vec![],
            next_remote_updates: vec![],
            channel_update: None,
            post_error_outgoing_resolved_ids: bset![],
            local_error: None,
            remote_error: None,
            resize_proposal: None,
            override_proposal: None,
        }
    }

    /// Channel id of this hosted channel
    #[inline]
    pub fn channel_id(&self) -> ChannelId {
        self.remote_info.channel_id()
    }

    /// The channel is suspended once either side has produced an error
    #[inline]
    pub fn is_errored(&self) -> bool {
        self.local_error.is_some() || self.remote_error.is_some()
    }

    /// Spec of the current cross-signed state, without pending updates
    pub fn local_spec(&self) -> CommitmentSpec {
        CommitmentSpec::from(&self.last_cross_signed_state)
    }

    /// Spec with all pending updates applied: the state the next signing
    /// round will commit to
    pub fn next_local_spec(&self) -> CommitmentSpec {
        let mut spec = self.local_spec();
        for update in &self.next_local_updates {
            spec.apply(Origin::Local, update);
        }
        for update in &self.next_remote_updates {
            spec.apply(Origin::Remote, update);
        }
        spec
    }

    /// Builds the unsigned next cross-signed state for the given block day:
    /// pending updates folded into balances and HTLC sets, update counters
    /// advanced by the number of updates each side originated, signatures
    /// cleared.
    pub fn next_local_unsigned_lcss(
        &self,
        block_day: u32,
    ) -> LastCrossSignedState {
        let spec = self.next_local_spec();
        let state = &self.last_cross_signed_state;
        LastCrossSignedState {
            is_host: state.is_host,
            refund_script_pubkey: state.refund_script_pubkey.clone(),
            init_hosted_channel: state.init_hosted_channel.clone(),
            block_day,
            local_balance_msat: spec.to_local_msat,
            remote_balance_msat: spec.to_remote_msat,
            local_updates: state.local_updates
                + self.next_local_updates.len() as u32,
            remote_updates: state.remote_updates
                + self.next_remote_updates.len() as u32,
            incoming_htlcs: spec.incoming_htlcs,
            outgoing_htlcs: spec.outgoing_htlcs,
            remote_sig_of_local: hc2p::dumb_sig(),
            local_sig_of_remote: hc2p::dumb_sig(),
        }
    }

    /// Id for the next outgoing HTLC. Update counters grow with every
    /// update, so deriving the id from them keeps HTLC ids unique and
    /// monotonic without a separate counter.
    pub fn next_outgoing_htlc_id(&self) -> u64 {
        (self.last_cross_signed_state.local_updates as u64)
            + self.next_local_updates.len() as u64
            + 1
    }

    /// Id the host must use for its next incoming HTLC; mirrors
    /// [`Self::next_outgoing_htlc_id`]
    pub fn next_incoming_htlc_id(&self) -> u64 {
        (self.last_cross_signed_state.remote_updates as u64)
            + self.next_remote_updates.len() as u64
            + 1
    }

    /// Ids of incoming HTLCs whose preimage we have revealed in a not yet
    /// cross-signed fulfill. If such an HTLC expires before it is signed
    /// over, we may have given away value without being paid.
    pub fn revealed_fulfills(&self) -> BTreeSet<u64> {
        self.next_local_updates
            .iter()
            .filter_map(|update| match update {
                UpdateMessage::FulfillHtlc(fulfill) => Some(fulfill.htlc_id),
                _ => None,
            })
            .collect()
    }

    /// Finds an outgoing HTLC by id across the signed state and the pending
    /// queues
    pub fn find_outgoing_htlc(&self, htlc_id: u64) -> Option<UpdateAddHtlc> {
        self.next_local_spec()
            .find_outgoing(htlc_id)
            .cloned()
            .or_else(|| self.local_spec().find_outgoing(htlc_id).cloned())
    }

    /// Returns a copy with the resize proposal folded into the cross-signed
    /// state
    pub fn with_resize(&self, resize: &ResizeChannel) -> HostedCommits {
        let mut commits = self.clone();
        commits.last_cross_signed_state =
            commits.last_cross_signed_state.with_resize(resize);
        commits
    }
}

#[cfg(test)]
mod test {
    use amplify::{DumbDefault, Slice32, Wrapper};
    use bitcoin_scripts::hlc::{HashLock, HashPreimage};
    use bitcoin_scripts::PubkeyScript;
    use hc2p::{
        InitHostedChannel, OnionPacket, UpdateFailHtlc, UpdateFulfillHtlc,
    };
    use secp256k1::{PublicKey, SecretKey, SECP256K1};

    use super::*;

    fn pubkey(byte: u8) -> PublicKey {
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        PublicKey::from_secret_key(SECP256K1, &sk)
    }

    fn remote_info() -> RemoteNodeInfo {
        RemoteNodeInfo {
            node_id: pubkey(0x22),
            node_specific_pubkey: pubkey(0x11),
            alias: s!("test host"),
        }
    }

    fn commits() -> HostedCommits {
        let state = LastCrossSignedState {
            is_host: false,
            refund_script_pubkey: PubkeyScript::default(),
            init_hosted_channel: InitHostedChannel {
                max_htlc_value_in_flight_msat: 90_000_000,
                htlc_minimum_msat: 1000,
                max_accepted_htlcs: 10,
                channel_capacity_msat: 100_000_000,
                initial_client_balance_msat: 0,
                features: vec![],
            },
            block_day: 19000,
            local_balance_msat: 40_000_000,
            remote_balance_msat: 60_000_000,
            local_updates: 4,
            remote_updates: 2,
            incoming_htlcs: vec![],
            outgoing_htlcs: vec![],
            remote_sig_of_local: hc2p::dumb_sig(),
            local_sig_of_remote: hc2p::dumb_sig(),
        };
        HostedCommits::with(remote_info(), state)
    }

    fn add(id: u64, amount_msat: u64) -> UpdateAddHtlc {
        UpdateAddHtlc {
            channel_id: remote_info().channel_id(),
            htlc_id: id,
            amount_msat,
            payment_hash: HashLock::from(Slice32::from_inner([id as u8; 32])),
            cltv_expiry: 19050,
            onion_routing_packet: OnionPacket::dumb_default(),
        }
    }

    #[test]
    fn spec_projection_preserves_capacity() {
        let mut commits = commits();
        commits
            .next_local_updates
            .push(UpdateMessage::AddHtlc(add(5, 1_000_000)));
        commits
            .next_remote_updates
            .push(UpdateMessage::AddHtlc(add(3, 2_000_000)));

        let spec = commits.next_local_spec();
        assert_eq!(spec.to_local_msat, 39_000_000);
        assert_eq!(spec.to_remote_msat, 58_000_000);
        assert_eq!(spec.htlc_count(), 2);
        assert_eq!(spec.total_in_flight_msat(), 3_000_000);

        // Balance conservation: local + remote + in-flight = capacity
        assert_eq!(
            spec.to_local_msat
                + spec.to_remote_msat
                + spec.total_in_flight_msat(),
            100_000_000
        );
    }

    #[test]
    fn spec_projection_resolves_htlcs() {
        let mut commits = commits();
        // One committed incoming and one committed outgoing HTLC
        commits.last_cross_signed_state.incoming_htlcs =
            vec![add(2, 3_000_000)];
        commits.last_cross_signed_state.outgoing_htlcs =
            vec![add(4, 5_000_000)];

        // We fulfill the incoming one, the host fails our outgoing one
        commits.next_local_updates.push(UpdateMessage::FulfillHtlc(
            UpdateFulfillHtlc {
                channel_id: commits.channel_id(),
                htlc_id: 2,
                payment_preimage: HashPreimage::from(Slice32::default()),
            },
        ));
        commits
            .next_remote_updates
            .push(UpdateMessage::FailHtlc(UpdateFailHtlc {
                channel_id: commits.channel_id(),
                htlc_id: 4,
                reason: vec![],
            }));

        let spec = commits.next_local_spec();
        // Fulfilled incoming credits us, failed outgoing refunds us
        assert_eq!(spec.to_local_msat, 40_000_000 + 3_000_000 + 5_000_000);
        assert_eq!(spec.to_remote_msat, 60_000_000);
        assert_eq!(spec.htlc_count(), 0);
    }

    #[test]
    fn next_unsigned_state_advances_counters() {
        let mut commits = commits();
        commits
            .next_local_updates
            .push(UpdateMessage::AddHtlc(add(5, 1_000_000)));
        commits
            .next_local_updates
            .push(UpdateMessage::AddHtlc(add(6, 1_000_000)));
        commits
            .next_remote_updates
            .push(UpdateMessage::AddHtlc(add(3, 2_000_000)));

        let next = commits.next_local_unsigned_lcss(19001);
        assert_eq!(next.local_updates, 6);
        assert_eq!(next.remote_updates, 3);
        assert_eq!(next.block_day, 19001);
        assert_eq!(next.outgoing_htlcs.len(), 2);
        assert_eq!(next.incoming_htlcs.len(), 1);
        // Counters never decrease across state transitions
        assert!(
            next.local_updates
                >= commits.last_cross_signed_state.local_updates
        );
        assert!(
            next.remote_updates
                >= commits.last_cross_signed_state.remote_updates
        );
    }

    #[test]
    fn htlc_id_derivation() {
        let mut commits = commits();
        assert_eq!(commits.next_outgoing_htlc_id(), 5);
        assert_eq!(commits.next_incoming_htlc_id(), 3);

        commits
            .next_local_updates
            .push(UpdateMessage::AddHtlc(add(5, 1_000_000)));
        assert_eq!(commits.next_outgoing_htlc_id(), 6);
    }

    #[test]
    fn revealed_fulfills_tracking() {
        let mut commits = commits();
        assert!(commits.revealed_fulfills().is_empty());
        commits.last_cross_signed_state.incoming_htlcs =
            vec![add(2, 3_000_000)];
        commits.next_local_updates.push(UpdateMessage::FulfillHtlc(
            UpdateFulfillHtlc {
                channel_id: commits.channel_id(),
                htlc_id: 2,
                payment_preimage: HashPreimage::from(Slice32::default()),
            },
        ));
        assert_eq!(commits.revealed_fulfills(), bset![2]);
    }

    #[test]
    fn resize_keeps_client_balance() {
        let commits = commits();
        let node_key = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let resize = ResizeChannel::with(150_000_000, &node_key);

        let resized = commits.with_resize(&resize);
        let state = &resized.last_cross_signed_state;
        assert_eq!(state.init_hosted_channel.channel_capacity_msat, 150_000_000);
        assert_eq!(state.local_balance_msat, 40_000_000);
        assert_eq!(state.remote_balance_msat, 110_000_000);
    }
}
