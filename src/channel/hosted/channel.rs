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

use amplify::{Slice32, Wrapper};
use bitcoin::hashes::{sha256, Hash};
use bitcoin_scripts::hlc::{HashLock, HashPreimage};
use bitcoin_scripts::PubkeyScript;
use hc2p::hosted::{
    ERR_HOSTED_MANUAL_SUSPEND, ERR_HOSTED_TIMED_OUT_OUTGOING_HTLC,
    ERR_HOSTED_WRONG_LOCAL_SIG, ERR_HOSTED_WRONG_REMOTE_SIG,
};
use hc2p::{
    AskBrandingInfo, ChannelId, ChannelUpdate, Fail, InitHostedChannel,
    InvokeHostedChannel, LastCrossSignedState, Messages, OnionPacket,
    StateOverride, StateUpdate, UpdateAddHtlc, UpdateFailHtlc,
    UpdateFailMalformedHtlc, UpdateFulfillHtlc, UpdateMessage,
};

use super::{
    BlockStamp, ChannelEvent, Command, Event, HostedCommits, HostedPolicy,
    Lifecycle, LocalReject, NodeSigner, OverrideError, Reaction,
    RemoteFulfill, RemoteNodeInfo,
};
use crate::channel::{Error, TransitionFail};

/// Hosted-channel state machine.
///
/// Pure event handler: [`ChannelHosted::process`] consumes one input at a
/// time, replaces the owned [`HostedCommits`] value and describes the
/// required side effects in the returned [`Reaction`]. Events of a single
/// channel must be processed strictly serially; different channels are
/// independent.
pub struct ChannelHosted {
    pub(super) stage: Lifecycle,
    pub(super) commits: Option<HostedCommits>,
    pub(super) policy: HostedPolicy,
    pub(super) signer: NodeSigner,
    pub(super) chain_hash: Slice32,
    pub(super) remote_info: RemoteNodeInfo,
    pub(super) refund_script_pubkey: PubkeyScript,
    pub(super) invoke_secret: Vec<u8>,
    pub(super) block: BlockStamp,
}

impl ChannelHosted {
    /// Constructs a channel which has never been established: the first
    /// connection to the host will run the invoke/init handshake.
    pub fn open_with(
        remote_info: RemoteNodeInfo,
        signer: NodeSigner,
        chain_hash: Slice32,
        refund_script_pubkey: PubkeyScript,
        invoke_secret: Vec<u8>,
        policy: HostedPolicy,
        block: BlockStamp,
    ) -> ChannelHosted {
        ChannelHosted {
            stage: Lifecycle::WaitForInit,
            commits: None,
            policy,
            signer,
            chain_hash,
            remote_info,
            refund_script_pubkey,
            invoke_secret,
            block,
        }
    }

    /// Restores a channel from a persisted commitment store. The channel
    /// starts sleeping; the first connection will run the resync procedure.
    pub fn restore(
        signer: NodeSigner,
        chain_hash: Slice32,
        policy: HostedPolicy,
        commits: HostedCommits,
        block: BlockStamp,
    ) -> ChannelHosted {
        ChannelHosted {
            stage: Lifecycle::Sleeping,
            policy,
            signer,
            chain_hash,
            remote_info: commits.remote_info.clone(),
            refund_script_pubkey: commits
                .last_cross_signed_state
                .refund_script_pubkey
                .clone(),
            invoke_secret: vec![],
            commits: Some(commits),
            block,
        }
    }

    /// Current lifecycle stage
    #[inline]
    pub fn stage(&self) -> Lifecycle {
        self.stage
    }

    /// Current commitment store, if the channel got past the handshake
    #[inline]
    pub fn commits(&self) -> Option<&HostedCommits> {
        self.commits.as_ref()
    }

    /// Channel id towards this host
    #[inline]
    pub fn channel_id(&self) -> ChannelId {
        self.remote_info.channel_id()
    }

    /// Identity key of the remote host
    #[inline]
    pub fn remote_node_id(&self) -> secp256k1::PublicKey {
        self.remote_info.node_id
    }

    /// Processes a single event and returns the side effects to apply.
    ///
    /// An `Err` return means the input was a fatal protocol violation (or a
    /// local misuse); the channel state is left unchanged and the caller
    /// decides whether to [`ChannelHosted::local_suspend`].
    pub fn process(&mut self, event: Event) -> Result<Reaction, Error> {
        let old = self.stage;
        let mut reaction = self.dispatch(event)?;
        let new = self.stage;
        if old != new {
            debug!(
                "hosted channel {} transitions {} -> {}",
                self.channel_id(),
                old,
                new
            );
            reaction.events.push(ChannelEvent::StateTransition { old, new });
        }
        Ok(reaction)
    }

    /// Suspends the channel with one of the `ERR_HOSTED_*` codes: records
    /// the local error and composes the failure message for the host. No-op
    /// if the channel is already failed locally. Fulfills and overrides stay
    /// available on a suspended channel.
    pub fn local_suspend(&mut self, code: &str) -> Reaction {
        let commits = match self.commits.as_mut() {
            Some(commits) => commits,
            None => {
                warn!("suspending a hosted channel without commitments");
                return Reaction::none();
            }
        };
        if commits.local_error.is_some() {
            return Reaction::none();
        }
        let fail = Fail::with_code(commits.remote_info.channel_id(), code);
        warn!("suspending hosted channel {}", fail);
        commits.local_error = Some(fail.clone());
        Reaction::store_and_send(vec![Messages::Fail(fail)])
    }

    fn dispatch(&mut self, event: Event) -> Result<Reaction, Error> {
        match event {
            Event::SocketOnline => self.on_socket_online(),
            Event::SocketOffline => Ok(self.on_socket_offline()),
            Event::Block(stamp) => self.on_block(stamp),
            Event::PreimagesRevealed(preimages) => self.on_preimages(preimages),
            Event::Command(command) => self.on_command(command),
            Event::Peer(message) => self.on_peer(message),
        }
    }

    fn invoke_message(&self) -> Messages {
        Messages::InvokeHostedChannel(InvokeHostedChannel {
            chain_hash: self.chain_hash,
            refund_script_pubkey: self.refund_script_pubkey.clone(),
            secret: self.invoke_secret.clone(),
        })
    }

    fn on_socket_online(&mut self) -> Result<Reaction, Error> {
        match self.stage {
            Lifecycle::Initial | Lifecycle::WaitForInit => {
                self.stage = Lifecycle::WaitForAccept;
                Ok(Reaction::send(self.invoke_message()))
            }
            Lifecycle::Sleeping => {
                let local_error = self
                    .commits
                    .as_ref()
                    .and_then(|commits| commits.local_error.clone());
                match local_error {
                    Some(fail) => Ok(Reaction::send(Messages::Fail(fail))),
                    None => Ok(Reaction::send(self.invoke_message())),
                }
            }
            _ => Ok(Reaction::none()),
        }
    }

    fn on_socket_offline(&mut self) -> Reaction {
        self.stage = match self.stage {
            Lifecycle::Open | Lifecycle::Sleeping => Lifecycle::Sleeping,
            // A handshake which did not reach a cross-signed state restarts
            // from scratch on the next connection
            Lifecycle::WaitForAccept | Lifecycle::WaitRemoteStateUpdate => {
                if self
                    .commits
                    .as_ref()
                    .map(|commits| {
                        commits.last_cross_signed_state.local_updates > 0
                            || commits.last_cross_signed_state.remote_updates
                                > 0
                    })
                    .unwrap_or(false)
                {
                    Lifecycle::Sleeping
                } else {
                    self.commits = None;
                    Lifecycle::WaitForInit
                }
            }
            other => other,
        };
        Reaction::none()
    }

    fn on_command(&mut self, command: Command) -> Result<Reaction, Error> {
        match command {
            Command::AddHtlc {
                amount_msat,
                payment_hash,
                cltv_expiry,
                onion_routing_packet,
            } => self.send_add(
                amount_msat,
                payment_hash,
                cltv_expiry,
                onion_routing_packet,
            ),
            Command::FulfillHtlc {
                htlc_id,
                payment_preimage,
            } => self.send_fulfill(htlc_id, payment_preimage),
            Command::FailHtlc { htlc_id, reason } => {
                self.send_fail(htlc_id, reason)
            }
            Command::FailMalformedHtlc {
                htlc_id,
                sha256_of_onion,
                failure_code,
            } => {
                self.send_fail_malformed(htlc_id, sha256_of_onion, failure_code)
            }
            Command::Sign => self.send_state_update(),
            Command::ProposeResize { delta_msat } => {
                self.propose_resize(delta_msat)
            }
            Command::AcceptOverride => self.accept_override(),
        }
    }

    fn on_peer(&mut self, message: Messages) -> Result<Reaction, Error> {
        match message {
            Messages::InitHostedChannel(init) => self.on_init(init),
            Messages::LastCrossSignedState(remote_state) => match self.stage {
                Lifecycle::WaitForAccept => {
                    self.restore_from_remote(remote_state)
                }
                Lifecycle::Sleeping => self.attempt_init_resync(remote_state),
                _ => {
                    trace!("ignoring last_cross_signed_state in {}", self.stage);
                    Ok(Reaction::none())
                }
            },
            Messages::StateUpdate(state_update) => match self.stage {
                Lifecycle::WaitRemoteStateUpdate => {
                    self.finalize_open(state_update)
                }
                Lifecycle::Open => self.attempt_state_update(state_update),
                _ => {
                    trace!("ignoring state_update in {}", self.stage);
                    Ok(Reaction::none())
                }
            },
            Messages::StateOverride(state_override) => {
                self.on_override_proposal(state_override)
            }
            Messages::UpdateAddHtlc(add) => self.receive_add(add),
            Messages::UpdateFulfillHtlc(fulfill) => self.receive_fulfill(fulfill),
            Messages::UpdateFailHtlc(fail) => {
                self.receive_fail(UpdateMessage::FailHtlc(fail))
            }
            Messages::UpdateFailMalformedHtlc(fail) => {
                self.receive_fail(UpdateMessage::FailMalformedHtlc(fail))
            }
            Messages::Fail(fail) => self.on_remote_fail(fail),
            Messages::Warning(warning) => {
                warn!("hosted channel peer warning: {}", warning);
                Ok(Reaction::none())
            }
            Messages::ChannelUpdate(update) => self.on_channel_update(update),
            Messages::HostedChannelBranding(branding) => Ok(Reaction {
                events: vec![ChannelEvent::BrandingUpdated(branding)],
                ..Reaction::default()
            }),
            other => {
                trace!("hosted channel ignores peer message {}", other);
                Ok(Reaction::none())
            }
        }
    }

    // Handshake: invoke -> init -> zero state -> open
    // ===============================================

    fn on_init(&mut self, init: InitHostedChannel) -> Result<Reaction, Error> {
        if self.stage != Lifecycle::WaitForAccept {
            trace!("ignoring init_hosted_channel in {}", self.stage);
            return Ok(Reaction::none());
        }
        self.policy.validate_init(&init)?;

        let zero_state = LastCrossSignedState {
            is_host: false,
            refund_script_pubkey: self.refund_script_pubkey.clone(),
            block_day: self.block.day,
            local_balance_msat: init.initial_client_balance_msat,
            remote_balance_msat: init.channel_capacity_msat
                - init.initial_client_balance_msat,
            init_hosted_channel: init,
            local_updates: 0,
            remote_updates: 0,
            incoming_htlcs: vec![],
            outgoing_htlcs: vec![],
            remote_sig_of_local: hc2p::dumb_sig(),
            local_sig_of_remote: hc2p::dumb_sig(),
        };
        let zero_state = self.signer.sign_state(zero_state);
        let state_update = zero_state.state_update();

        self.commits =
            Some(HostedCommits::with(self.remote_info.clone(), zero_state));
        self.stage = Lifecycle::WaitRemoteStateUpdate;
        // Nothing to persist yet: the state is not cross-signed
        Ok(Reaction::send(Messages::StateUpdate(state_update)))
    }

    fn finalize_open(
        &mut self,
        state_update: StateUpdate,
    ) -> Result<Reaction, Error> {
        let channel_id = self.remote_info.channel_id();
        let commits = self.commits.as_mut().ok_or(Error::NoCommitments)?;

        if is_block_day_out_of_sync(self.block, state_update.block_day) {
            return Err(TransitionFail::with(
                channel_id,
                "initial state_update is signed over an out-of-sync block day",
            )
            .into());
        }
        if state_update.local_updates != 0 || state_update.remote_updates != 0 {
            return Err(TransitionFail::with(
                channel_id,
                "initial state_update carries non-zero update counters",
            )
            .into());
        }

        let mut state = commits.last_cross_signed_state.clone();
        state.remote_sig_of_local = state_update.local_sig_of_remote_lcss;
        if !state.verify_remote_sig(commits.remote_info.node_id) {
            return Err(TransitionFail::with(
                channel_id,
                "invalid host signature over the initial state",
            )
            .into());
        }

        commits.last_cross_signed_state = state;
        self.stage = Lifecycle::Open;
        Ok(Reaction::store_and_send(vec![Messages::AskBrandingInfo(
            AskBrandingInfo { channel_id },
        )]))
    }

    /// Restore path: we invoked a channel we do not remember, but the host
    /// knows us and replies with the full state. Adopt its reverse after
    /// verifying both signatures.
    fn restore_from_remote(
        &mut self,
        remote_state: LastCrossSignedState,
    ) -> Result<Reaction, Error> {
        let local_sig_ok =
            remote_state.verify_remote_sig(self.signer.pubkey());
        let remote_sig_ok = remote_state
            .reverse()
            .verify_remote_sig(self.remote_info.node_id);

        let state = remote_state.reverse();
        self.refund_script_pubkey = state.refund_script_pubkey.clone();
        self.commits =
            Some(HostedCommits::with(self.remote_info.clone(), state.clone()));
        self.stage = Lifecycle::Open;

        if !local_sig_ok {
            return Ok(self.local_suspend(ERR_HOSTED_WRONG_LOCAL_SIG));
        }
        if !remote_sig_ok {
            return Ok(self.local_suspend(ERR_HOSTED_WRONG_REMOTE_SIG));
        }

        Ok(Reaction {
            persist: true,
            sends: vec![Messages::LastCrossSignedState(state)],
            events: vec![ChannelEvent::ResolversNotified],
            ..Reaction::default()
        })
    }

    // The signing handshake
    // =====================

    fn cross_sign(
        &self,
        commits: &HostedCommits,
        state_update: StateUpdate,
    ) -> (LastCrossSignedState, bool) {
        let mut next = commits.next_local_unsigned_lcss(state_update.block_day);
        next.remote_sig_of_local = state_update.local_sig_of_remote_lcss;
        let next = self.signer.sign_state(next);
        let sig_ok = next.verify_remote_sig(commits.remote_info.node_id);
        (next, sig_ok)
    }

    fn attempt_state_update(
        &mut self,
        state_update: StateUpdate,
    ) -> Result<Reaction, Error> {
        let commits = self.commits.clone().ok_or(Error::NoCommitments)?;
        let state = &commits.last_cross_signed_state;

        // The host may echo a state we have already cross-signed
        if state_update.local_sig_of_remote_lcss == state.remote_sig_of_local
            && state_update.local_updates == state.remote_updates
            && state_update.remote_updates == state.local_updates
        {
            trace!("state_update duplicates the current cross-signed state");
            return Ok(Reaction::none());
        }

        // A state bound to a distant day can not be signed over; this is a
        // transient clock condition, not a protocol violation: reconnect and
        // let the resync procedure reconcile
        if is_block_day_out_of_sync(self.block, state_update.block_day) {
            debug!(
                "state_update block day {} is out of sync, disconnecting",
                state_update.block_day
            );
            self.stage = Lifecycle::Sleeping;
            return Ok(Reaction::disconnect());
        }

        let (next, sig_ok) = self.cross_sign(&commits, state_update);

        // The host acknowledged fewer of our updates than the signing round
        // includes: keep the state and repeat our signature so the host can
        // catch up
        if state_update.remote_updates < next.local_updates {
            debug!(
                "host acknowledged {} local updates out of {}, re-signing",
                state_update.remote_updates, next.local_updates
            );
            return Ok(Reaction::store_and_send(vec![Messages::StateUpdate(
                next.state_update(),
            )]));
        }

        let (commits, next) = if sig_ok {
            (commits, next)
        } else {
            // The host may have folded a pending resize into the state it
            // signed; retry once against the resized state
            match commits.resize_proposal {
                Some(resize) => {
                    let resized = commits.with_resize(&resize);
                    let (next, sig_ok) =
                        self.cross_sign(&resized, state_update);
                    if !sig_ok {
                        return Ok(
                            self.local_suspend(ERR_HOSTED_WRONG_REMOTE_SIG)
                        );
                    }
                    let mut resized = resized;
                    resized.resize_proposal = None;
                    (resized, next)
                }
                None => {
                    return Ok(self.local_suspend(ERR_HOSTED_WRONG_REMOTE_SIG))
                }
            }
        };

        let mut events = vec![];
        let signed_spec = commits.local_spec();
        for update in &commits.next_remote_updates {
            match update {
                UpdateMessage::AddHtlc(add) => {
                    events.push(ChannelEvent::AddReceived(add.clone()))
                }
                update if update.is_failure() => {
                    if let Some(add) =
                        signed_spec.find_outgoing(update.htlc_id()).cloned()
                    {
                        events.push(ChannelEvent::AddRejectedRemotely {
                            add,
                            fail: update.clone(),
                        });
                    }
                }
                // Remote fulfills were surfaced the moment they arrived
                _ => {}
            }
        }
        events.push(ChannelEvent::ResolversNotified);

        let mut promoted = commits;
        promoted.last_cross_signed_state = next.clone();
        promoted.next_local_updates = vec![];
        promoted.next_remote_updates = vec![];
        self.commits = Some(promoted);

        let mut reaction = Reaction::store_and_send(vec![
            Messages::StateUpdate(next.state_update()),
        ]);
        reaction.events = events;
        Ok(reaction)
    }

    fn send_state_update(&mut self) -> Result<Reaction, Error> {
        let commits = self.commits.as_ref().ok_or(Error::NoCommitments)?;
        if self.stage != Lifecycle::Open || commits.is_errored() {
            trace!("sign command on a non-operational channel, skipping");
            return Ok(Reaction::none());
        }
        if commits.next_local_updates.is_empty()
            && commits.resize_proposal.is_none()
        {
            return Ok(Reaction::none());
        }
        let next = self
            .signer
            .sign_state(commits.next_local_unsigned_lcss(self.block.day));
        Ok(Reaction::send(Messages::StateUpdate(next.state_update())))
    }

    // HTLC lifecycle
    // ==============

    fn send_add(
        &mut self,
        amount_msat: u64,
        payment_hash: HashLock,
        cltv_expiry: u32,
        onion_routing_packet: OnionPacket,
    ) -> Result<Reaction, Error> {
        let commits = self.commits.as_mut().ok_or(Error::NoCommitments)?;
        let add = UpdateAddHtlc {
            channel_id: commits.remote_info.channel_id(),
            htlc_id: commits.next_outgoing_htlc_id(),
            amount_msat,
            payment_hash,
            cltv_expiry,
            onion_routing_packet,
        };

        let params = &commits.last_cross_signed_state.init_hosted_channel;
        let spec = commits.next_local_spec();
        let reason = if self.stage != Lifecycle::Open || commits.is_errored() {
            Some(LocalReject::ChannelNotAbleToSend)
        } else if amount_msat < params.htlc_minimum_msat {
            Some(LocalReject::HtlcValueTooSmall)
        } else if spec.htlc_count() + 1 > params.max_accepted_htlcs as usize {
            Some(LocalReject::TooManyAcceptedHtlcs)
        } else if spec.total_in_flight_msat() + amount_msat
            > params.max_htlc_value_in_flight_msat
        {
            Some(LocalReject::HtlcValueInFlightTooHigh)
        } else if spec.to_local_msat < amount_msat {
            Some(LocalReject::InsufficientBalance)
        } else if cltv_expiry <= self.block.height + self.policy.cltv_safety_delta
        {
            Some(LocalReject::ExpiryTooSoon)
        } else {
            None
        };
        if let Some(reason) = reason {
            return Ok(Reaction {
                events: vec![ChannelEvent::AddRejectedLocally { add, reason }],
                ..Reaction::default()
            });
        }

        commits
            .next_local_updates
            .push(UpdateMessage::AddHtlc(add.clone()));
        let next = self
            .signer
            .sign_state(commits.next_local_unsigned_lcss(self.block.day));
        Ok(Reaction::store_and_send(vec![
            Messages::UpdateAddHtlc(add),
            Messages::StateUpdate(next.state_update()),
        ]))
    }

    fn receive_add(&mut self, add: UpdateAddHtlc) -> Result<Reaction, Error> {
        let channel_id = self.remote_info.channel_id();
        if self.stage != Lifecycle::Open {
            return Err(TransitionFail::with(
                channel_id,
                format!("{} received in {}", add, self.stage),
            )
            .into());
        }
        let commits = self.commits.as_mut().ok_or(Error::NoCommitments)?;
        if commits.is_errored() {
            return Err(TransitionFail::with(
                channel_id,
                format!("{} received on a suspended channel", add),
            )
            .into());
        }

        let params = &commits.last_cross_signed_state.init_hosted_channel;
        let spec = commits.next_local_spec();
        if add.htlc_id != commits.next_incoming_htlc_id() {
            return Err(TransitionFail::with(
                channel_id,
                format!(
                    "unexpected incoming htlc id {}, expected {}",
                    add.htlc_id,
                    commits.next_incoming_htlc_id()
                ),
            )
            .into());
        }
        if add.amount_msat < params.htlc_minimum_msat {
            return Err(TransitionFail::with(
                channel_id,
                format!("incoming htlc amount {} below minimum", add.amount_msat),
            )
            .into());
        }
        if spec.htlc_count() + 1 > params.max_accepted_htlcs as usize {
            return Err(TransitionFail::with(
                channel_id,
                "incoming htlc exceeds the in-flight count limit",
            )
            .into());
        }
        if spec.total_in_flight_msat() + add.amount_msat
            > params.max_htlc_value_in_flight_msat
        {
            return Err(TransitionFail::with(
                channel_id,
                "incoming htlc exceeds the in-flight value limit",
            )
            .into());
        }
        if spec.to_remote_msat < add.amount_msat {
            return Err(TransitionFail::with(
                channel_id,
                "incoming htlc overdraws the host balance",
            )
            .into());
        }

        commits.next_remote_updates.push(UpdateMessage::AddHtlc(add));
        Ok(Reaction::none())
    }

    fn send_fulfill(
        &mut self,
        htlc_id: u64,
        payment_preimage: HashPreimage,
    ) -> Result<Reaction, Error> {
        let channel_id = self.remote_info.channel_id();
        let commits = self.commits.as_mut().ok_or(Error::NoCommitments)?;
        let add = commits
            .next_local_spec()
            .find_incoming(htlc_id)
            .cloned()
            .ok_or(Error::UnknownHtlc(channel_id, htlc_id))?;
        if !add.is_unlocked_by(payment_preimage) {
            return Err(TransitionFail::with(
                channel_id,
                format!("preimage does not match the hash of htlc {}", htlc_id),
            )
            .into());
        }
        // A preimage is value: sending it is permitted even on a suspended
        // channel
        let fulfill = UpdateFulfillHtlc {
            channel_id,
            htlc_id,
            payment_preimage,
        };
        commits
            .next_local_updates
            .push(UpdateMessage::FulfillHtlc(fulfill));
        Ok(Reaction::store_and_send(vec![Messages::UpdateFulfillHtlc(
            fulfill,
        )]))
    }

    fn send_fail(
        &mut self,
        htlc_id: u64,
        reason: Vec<u8>,
    ) -> Result<Reaction, Error> {
        let channel_id = self.remote_info.channel_id();
        let commits = self.commits.as_mut().ok_or(Error::NoCommitments)?;
        if commits.is_errored() {
            return Err(Error::Suspended(channel_id));
        }
        commits
            .next_local_spec()
            .find_incoming(htlc_id)
            .ok_or(Error::UnknownHtlc(channel_id, htlc_id))?;
        let fail = UpdateFailHtlc {
            channel_id,
            htlc_id,
            reason,
        };
        commits
            .next_local_updates
            .push(UpdateMessage::FailHtlc(fail.clone()));
        Ok(Reaction::store_and_send(vec![Messages::UpdateFailHtlc(fail)]))
    }

    fn send_fail_malformed(
        &mut self,
        htlc_id: u64,
        sha256_of_onion: Slice32,
        failure_code: u16,
    ) -> Result<Reaction, Error> {
        let channel_id = self.remote_info.channel_id();
        let commits = self.commits.as_mut().ok_or(Error::NoCommitments)?;
        if commits.is_errored() {
            return Err(Error::Suspended(channel_id));
        }
        commits
            .next_local_spec()
            .find_incoming(htlc_id)
            .ok_or(Error::UnknownHtlc(channel_id, htlc_id))?;
        let fail = UpdateFailMalformedHtlc {
            channel_id,
            htlc_id,
            sha256_of_onion: sha256::Hash::from_slice(
                sha256_of_onion.as_inner(),
            )
            .expect("32 bytes make a valid SHA256 value"),
            failure_code,
        };
        commits
            .next_local_updates
            .push(UpdateMessage::FailMalformedHtlc(fail));
        Ok(Reaction::store_and_send(vec![
            Messages::UpdateFailMalformedHtlc(fail),
        ]))
    }

    fn receive_fulfill(
        &mut self,
        fulfill: UpdateFulfillHtlc,
    ) -> Result<Reaction, Error> {
        let channel_id = self.remote_info.channel_id();
        let commits = self.commits.as_mut().ok_or(Error::NoCommitments)?;
        let add = commits
            .local_spec()
            .find_outgoing(fulfill.htlc_id)
            .cloned()
            .ok_or_else(|| {
                TransitionFail::with(
                    channel_id,
                    format!("{} references an unknown htlc", fulfill),
                )
            })?;
        if !add.is_unlocked_by(fulfill.payment_preimage) {
            return Err(TransitionFail::with(
                channel_id,
                format!("{} carries an invalid preimage", fulfill),
            )
            .into());
        }

        let event = ChannelEvent::FulfillReceived(RemoteFulfill {
            add,
            preimage: fulfill.payment_preimage,
        });
        if commits.is_errored() {
            if commits
                .post_error_outgoing_resolved_ids
                .contains(&fulfill.htlc_id)
            {
                return Err(TransitionFail::with(
                    channel_id,
                    format!("{} was already resolved after the error", fulfill),
                )
                .into());
            }
            commits
                .post_error_outgoing_resolved_ids
                .insert(fulfill.htlc_id);
            // No signing rounds happen on a suspended channel: record the
            // resolution durably and propagate the preimage
            return Ok(Reaction {
                persist: true,
                events: vec![event],
                ..Reaction::default()
            });
        }

        commits
            .next_remote_updates
            .push(UpdateMessage::FulfillHtlc(fulfill));
        Ok(Reaction {
            events: vec![event],
            ..Reaction::default()
        })
    }

    fn receive_fail(
        &mut self,
        update: UpdateMessage,
    ) -> Result<Reaction, Error> {
        let channel_id = self.remote_info.channel_id();
        let commits = self.commits.as_mut().ok_or(Error::NoCommitments)?;
        let htlc_id = update.htlc_id();
        if commits.is_errored()
            || commits.post_error_outgoing_resolved_ids.contains(&htlc_id)
        {
            return Err(TransitionFail::with(
                channel_id,
                format!("{} received on a suspended channel", update),
            )
            .into());
        }
        if commits.local_spec().find_outgoing(htlc_id).is_some() {
            commits.next_remote_updates.push(update);
            return Ok(Reaction::none());
        }
        if commits.next_local_spec().find_outgoing(htlc_id).is_some() {
            // The host is failing an add we have not signed over yet: a
            // race, not a violation. Reconnect and resync.
            debug!(
                "host fails not-yet-signed htlc {}, reconnecting",
                htlc_id
            );
            self.stage = Lifecycle::Sleeping;
            return Ok(Reaction::disconnect());
        }
        Err(TransitionFail::with(
            channel_id,
            format!("{} references an unknown htlc", update),
        )
        .into())
    }

    // Expiry and preimage rescue
    // ==========================

    fn on_block(&mut self, stamp: BlockStamp) -> Result<Reaction, Error> {
        self.block = stamp;
        if !matches!(self.stage, Lifecycle::Open | Lifecycle::Sleeping) {
            return Ok(Reaction::none());
        }
        let commits = match &self.commits {
            Some(commits) => commits,
            None => return Ok(Reaction::none()),
        };

        // An incoming HTLC whose preimage we revealed but which expired
        // un-resolved means we may have paid out value without compensation
        let revealed = commits.revealed_fulfills();
        let danger = commits
            .local_spec()
            .incoming_htlcs
            .iter()
            .any(|add| {
                revealed.contains(&add.htlc_id)
                    && stamp.height > add.cltv_expiry
            });
        if danger {
            return Ok(self.local_suspend(ERR_HOSTED_MANUAL_SUSPEND));
        }

        let sent_expired: BTreeSet<HashLock> = commits
            .next_local_spec()
            .outgoing_htlcs
            .iter()
            .filter(|add| stamp.height > add.cltv_expiry)
            .map(|add| add.payment_hash)
            .collect();
        if sent_expired.is_empty() {
            return Ok(Reaction::none());
        }
        debug!(
            "hosted channel {} has {} expired outgoing payment hashes, \
             requesting an on-chain preimage scan",
            commits.remote_info.channel_id(),
            sent_expired.len()
        );
        Ok(Reaction {
            preimage_request: Some(sent_expired),
            ..Reaction::default()
        })
    }

    fn on_preimages(
        &mut self,
        preimages: BTreeMap<HashLock, HashPreimage>,
    ) -> Result<Reaction, Error> {
        if !matches!(self.stage, Lifecycle::Open | Lifecycle::Sleeping) {
            return Ok(Reaction::none());
        }
        let commits = match self.commits.as_mut() {
            Some(commits) => commits,
            None => return Ok(Reaction::none()),
        };

        let tip = self.block.height;
        let expired: Vec<UpdateAddHtlc> = commits
            .next_local_spec()
            .outgoing_htlcs
            .into_iter()
            .filter(|add| tip > add.cltv_expiry)
            .collect();
        if expired.is_empty() {
            return Ok(Reaction::none());
        }

        let mut events = vec![];
        for add in expired {
            commits
                .post_error_outgoing_resolved_ids
                .insert(add.htlc_id);
            match preimages.get(&add.payment_hash) {
                // The preimage showed up on-chain: the payment actually
                // succeeded and must be propagated as a fulfill
                Some(preimage) => {
                    events.push(ChannelEvent::FulfillReceived(RemoteFulfill {
                        add,
                        preimage: *preimage,
                    }))
                }
                None => events.push(ChannelEvent::AddRejectedLocally {
                    add,
                    reason: LocalReject::InPrincipleNotSendable,
                }),
            }
        }

        let mut reaction =
            self.local_suspend(ERR_HOSTED_TIMED_OUT_OUTGOING_HTLC);
        // The resolved-ids bookkeeping must survive a restart even if the
        // channel was already suspended earlier
        reaction.persist = true;
        events.extend(reaction.events);
        reaction.events = events;
        Ok(reaction)
    }

    // Failures, overrides, gossip
    // ===========================

    fn on_remote_fail(&mut self, fail: Fail) -> Result<Reaction, Error> {
        let commits = match self.commits.as_mut() {
            Some(commits) => commits,
            None => {
                // The host denied the channel before any state existed
                return Err(TransitionFail::with(
                    self.remote_info.channel_id(),
                    format!("host denied the channel: {}", fail),
                )
                .into());
            }
        };
        commits.remote_error = Some(fail.clone());
        if matches!(
            self.stage,
            Lifecycle::WaitForAccept
                | Lifecycle::WaitRemoteStateUpdate
                | Lifecycle::Open
        ) {
            // Stay open-but-errored so that overrides can still arrive
            self.stage = Lifecycle::Open;
        }
        Ok(Reaction {
            persist: true,
            events: vec![ChannelEvent::RemoteErrored(fail)],
            ..Reaction::default()
        })
    }

    fn on_override_proposal(
        &mut self,
        state_override: StateOverride,
    ) -> Result<Reaction, Error> {
        let commits = self.commits.as_mut().ok_or(Error::NoCommitments)?;
        commits.override_proposal = Some(state_override);
        Ok(Reaction {
            persist: true,
            events: vec![ChannelEvent::OverrideProposed(state_override)],
            ..Reaction::default()
        })
    }

    fn on_channel_update(
        &mut self,
        update: ChannelUpdate,
    ) -> Result<Reaction, Error> {
        let commits = match self.commits.as_mut() {
            Some(commits) => commits,
            None => return Ok(Reaction::none()),
        };
        commits.channel_update = Some(update);
        Ok(Reaction {
            persist: true,
            ..Reaction::default()
        })
    }

    /// Applies a previously received host override: balances and counters
    /// are taken from the host proposal, all in-flight HTLCs are dropped and
    /// the error state is cleared. Rejections leave the channel untouched.
    fn accept_override(&mut self) -> Result<Reaction, Error> {
        let commits = self.commits.as_mut().ok_or(Error::NoCommitments)?;
        let proposal = commits
            .override_proposal
            .ok_or(Error::Override(OverrideError::NoProposal))?;
        let state = &commits.last_cross_signed_state;
        let capacity = state.init_hosted_channel.channel_capacity_msat;

        if proposal.local_balance_msat > capacity {
            return Err(OverrideError::BalanceExceedsCapacity.into());
        }
        if proposal.local_updates < state.remote_updates {
            return Err(OverrideError::LocalUpdatesRegression.into());
        }
        if proposal.remote_updates < state.local_updates {
            return Err(OverrideError::RemoteUpdatesRegression.into());
        }
        if proposal.block_day < state.block_day {
            return Err(OverrideError::BlockDayRegression.into());
        }

        let overridden = LastCrossSignedState {
            is_host: state.is_host,
            refund_script_pubkey: state.refund_script_pubkey.clone(),
            init_hosted_channel: state.init_hosted_channel.clone(),
            block_day: proposal.block_day,
            local_balance_msat: capacity - proposal.local_balance_msat,
            remote_balance_msat: proposal.local_balance_msat,
            local_updates: proposal.remote_updates,
            remote_updates: proposal.local_updates,
            incoming_htlcs: vec![],
            outgoing_htlcs: vec![],
            remote_sig_of_local: proposal.local_sig_of_remote_lcss,
            local_sig_of_remote: hc2p::dumb_sig(),
        };
        let overridden = self.signer.sign_state(overridden);
        if !overridden.verify_remote_sig(commits.remote_info.node_id) {
            return Err(OverrideError::InvalidSignature.into());
        }

        // All outgoing HTLCs which existed before the override are gone
        let mut lost = commits.next_local_spec().outgoing_htlcs;
        for add in commits.local_spec().outgoing_htlcs {
            if !lost.iter().any(|known| known.htlc_id == add.htlc_id) {
                lost.push(add);
            }
        }
        let mut events: Vec<ChannelEvent> = lost
            .into_iter()
            .map(|add| ChannelEvent::AddRejectedLocally {
                add,
                reason: LocalReject::InPrincipleNotSendable,
            })
            .collect();
        events.push(ChannelEvent::ResolversNotified);

        let mut accepted = HostedCommits::with(
            commits.remote_info.clone(),
            overridden.clone(),
        );
        accepted.channel_update = commits.channel_update.clone();
        self.commits = Some(accepted);
        self.stage = Lifecycle::Open;

        let mut reaction = Reaction::store_and_send(vec![
            Messages::StateUpdate(overridden.state_update()),
        ]);
        reaction.events = events;
        Ok(reaction)
    }

    /// Proposes growing the channel capacity by `delta_msat`. The signed
    /// proposal is stored and re-sent until the host folds it into a
    /// cross-signed state.
    fn propose_resize(&mut self, delta_msat: u64) -> Result<Reaction, Error> {
        let channel_id = self.remote_info.channel_id();
        if self.stage != Lifecycle::Open {
            return Err(Error::LifecycleMismatch {
                current: self.stage,
                required: &[Lifecycle::Open],
            });
        }
        let commits = self.commits.as_mut().ok_or(Error::NoCommitments)?;
        if commits.is_errored() {
            return Err(Error::Suspended(channel_id));
        }
        if commits.resize_proposal.is_some() {
            return Err(TransitionFail::with(
                channel_id,
                "a resize proposal is already pending",
            )
            .into());
        }

        let new_capacity_msat = commits
            .last_cross_signed_state
            .init_hosted_channel
            .channel_capacity_msat
            + delta_msat;
        let resize = self.signer.sign_resize(new_capacity_msat);
        commits.resize_proposal = Some(resize);

        // Start a signing round right away so the host can fold the new
        // capacity into the next cross-signed state
        let next = self
            .signer
            .sign_state(commits.next_local_unsigned_lcss(self.block.day));
        Ok(Reaction::store_and_send(vec![
            Messages::ResizeChannel(resize),
            Messages::StateUpdate(next.state_update()),
        ]))
    }
}

/// Signed states bind to UTC day numbers; a state more than one day away
/// from the local clock can not be trusted.
fn is_block_day_out_of_sync(block: BlockStamp, block_day: u32) -> bool {
    (block.day as i64 - block_day as i64).abs() > 1
}

#[cfg(test)]
mod test {
    use super::super::testkit::{
        self as testkit, add_command, block, host_state_update, init,
        opened_channel, preimage,
    };
    use super::*;

    #[test]
    fn establish_channel() {
        // Scenario: invoke -> init(capacity 100m, client balance 0) ->
        // state_update exchange -> open
        let mut channel = testkit::fresh_channel();
        assert_eq!(channel.stage(), Lifecycle::WaitForInit);

        let reaction = channel.process(Event::SocketOnline).unwrap();
        assert!(matches!(
            reaction.sends[..],
            [Messages::InvokeHostedChannel(_)]
        ));
        assert_eq!(channel.stage(), Lifecycle::WaitForAccept);

        let reaction = channel
            .process(Event::Peer(Messages::InitHostedChannel(init(
                100_000_000,
                0,
            ))))
            .unwrap();
        assert_eq!(channel.stage(), Lifecycle::WaitRemoteStateUpdate);
        assert!(!reaction.persist);
        let sent_update = match &reaction.sends[..] {
            [Messages::StateUpdate(update)] => *update,
            wrong => panic!("unexpected handshake reaction: {:?}", wrong),
        };
        assert_eq!(sent_update.block_day, 19000);
        assert_eq!(sent_update.local_updates, 0);
        assert_eq!(sent_update.remote_updates, 0);

        let state = channel.commits().unwrap().last_cross_signed_state.clone();
        assert_eq!(state.local_balance_msat, 0);
        assert_eq!(state.remote_balance_msat, 100_000_000);

        let reaction = channel
            .process(Event::Peer(Messages::StateUpdate(host_state_update(
                &state,
            ))))
            .unwrap();
        assert_eq!(channel.stage(), Lifecycle::Open);
        assert!(reaction.persist);
        assert!(matches!(reaction.sends[..], [Messages::AskBrandingInfo(_)]));
        assert!(channel
            .commits()
            .unwrap()
            .last_cross_signed_state
            .verify_remote_sig(testkit::host_pubkey()));
    }

    #[test]
    fn add_and_sign() {
        // Scenario: client with balance 100m sends a 50k HTLC and completes
        // the signing round
        let mut channel = opened_channel(200_000_000, 100_000_000);

        let reaction = channel
            .process(Event::Command(add_command(50_000, 7, 19050)))
            .unwrap();
        assert!(reaction.persist);
        let add = match &reaction.sends[..] {
            [Messages::UpdateAddHtlc(add), Messages::StateUpdate(_)] => {
                add.clone()
            }
            wrong => panic!("unexpected add reaction: {:?}", wrong),
        };
        assert_eq!(add.htlc_id, 1);

        // Host acknowledges: its view counters mirror ours
        let next = channel
            .commits()
            .unwrap()
            .next_local_unsigned_lcss(channel.block.day);
        let reaction = channel
            .process(Event::Peer(Messages::StateUpdate(host_state_update(
                &next,
            ))))
            .unwrap();
        assert!(reaction.persist);
        assert!(matches!(
            reaction.events[..],
            [ChannelEvent::ResolversNotified]
        ));

        let state = &channel.commits().unwrap().last_cross_signed_state;
        assert_eq!(state.local_updates, 1);
        assert_eq!(state.remote_updates, 0);
        assert_eq!(state.outgoing_htlcs.len(), 1);
        assert_eq!(state.local_balance_msat, 100_000_000 - 50_000);
        assert_eq!(state.remote_balance_msat, 100_000_000);
        assert!(channel.commits().unwrap().next_local_updates.is_empty());
    }

    #[test]
    fn add_rejections() {
        let mut channel = opened_channel(200_000_000, 100_000_000);

        // Below the host minimum
        let reaction = channel
            .process(Event::Command(add_command(999, 7, 19050)))
            .unwrap();
        assert!(matches!(
            reaction.events[..],
            [ChannelEvent::AddRejectedLocally {
                reason: LocalReject::HtlcValueTooSmall,
                ..
            }]
        ));

        // Over the in-flight value limit
        let reaction = channel
            .process(Event::Command(add_command(100_000_001, 7, 19050)))
            .unwrap();
        assert!(matches!(
            reaction.events[..],
            [ChannelEvent::AddRejectedLocally {
                reason: LocalReject::HtlcValueInFlightTooHigh,
                ..
            }]
        ));

        // Expiring too close to the tip
        let reaction = channel
            .process(Event::Command(add_command(50_000, 7, 18905)))
            .unwrap();
        assert!(matches!(
            reaction.events[..],
            [ChannelEvent::AddRejectedLocally {
                reason: LocalReject::ExpiryTooSoon,
                ..
            }]
        ));

        // Nothing was queued
        assert!(channel.commits().unwrap().next_local_updates.is_empty());
    }

    #[test]
    fn receive_add_and_fulfill() {
        let mut channel = opened_channel(200_000_000, 100_000_000);
        let incoming = testkit::incoming_add(&channel, 2_000_000, 3);

        channel
            .process(Event::Peer(Messages::UpdateAddHtlc(incoming.clone())))
            .unwrap();

        // Host starts the signing round over the state with its add
        let next = channel
            .commits()
            .unwrap()
            .next_local_unsigned_lcss(channel.block.day);
        let reaction = channel
            .process(Event::Peer(Messages::StateUpdate(host_state_update(
                &next,
            ))))
            .unwrap();
        assert!(matches!(
            reaction.events[..],
            [
                ChannelEvent::AddReceived(_),
                ChannelEvent::ResolversNotified
            ]
        ));
        let state = &channel.commits().unwrap().last_cross_signed_state;
        assert_eq!(state.incoming_htlcs.len(), 1);
        assert_eq!(state.remote_balance_msat, 100_000_000 - 2_000_000);

        // Now reveal the preimage
        let reaction = channel
            .process(Event::Command(Command::FulfillHtlc {
                htlc_id: incoming.htlc_id,
                payment_preimage: preimage(3),
            }))
            .unwrap();
        assert!(reaction.persist);
        assert!(matches!(
            reaction.sends[..],
            [Messages::UpdateFulfillHtlc(_)]
        ));
        // The fulfill sits in the queue until the next signing round
        assert_eq!(
            channel.commits().unwrap().revealed_fulfills(),
            bset![incoming.htlc_id]
        );
    }

    #[test]
    fn fulfill_after_error() {
        // Scenario: errored channel with one outgoing add id=7; peer fulfill
        // still propagates
        let mut channel = testkit::errored_channel_with_outgoing(7, 25_000);

        let fulfill = UpdateFulfillHtlc {
            channel_id: channel.channel_id(),
            htlc_id: 7,
            payment_preimage: preimage(7),
        };
        let reaction = channel
            .process(Event::Peer(Messages::UpdateFulfillHtlc(fulfill)))
            .unwrap();

        assert!(reaction.persist);
        assert!(reaction.sends.is_empty());
        assert!(matches!(
            reaction.events[..],
            [ChannelEvent::FulfillReceived(_)]
        ));
        assert!(channel
            .commits()
            .unwrap()
            .post_error_outgoing_resolved_ids
            .contains(&7));

        // A duplicate resolution of the same id is a violation
        let duplicate = UpdateFulfillHtlc {
            channel_id: channel.channel_id(),
            htlc_id: 7,
            payment_preimage: preimage(7),
        };
        assert!(matches!(
            channel.process(Event::Peer(Messages::UpdateFulfillHtlc(duplicate))),
            Err(Error::Transition(_))
        ));
    }

    #[test]
    fn fail_of_unsigned_add_disconnects() {
        let mut channel = opened_channel(200_000_000, 100_000_000);
        channel
            .process(Event::Command(add_command(50_000, 7, 19050)))
            .unwrap();

        // The host fails the add before any signing round covered it
        let fail = UpdateFailHtlc {
            channel_id: channel.channel_id(),
            htlc_id: 1,
            reason: vec![],
        };
        let reaction = channel
            .process(Event::Peer(Messages::UpdateFailHtlc(fail)))
            .unwrap();
        assert!(reaction.disconnect);
        assert_eq!(channel.stage(), Lifecycle::Sleeping);

        // Failing a completely unknown htlc is a violation instead
        let unknown = UpdateFailHtlc {
            channel_id: channel.channel_id(),
            htlc_id: 42,
            reason: vec![],
        };
        assert!(matches!(
            channel.process(Event::Peer(Messages::UpdateFailHtlc(unknown))),
            Err(Error::Transition(_))
        ));
    }

    #[test]
    fn out_of_sync_block_day_disconnects() {
        let mut channel = opened_channel(200_000_000, 100_000_000);
        channel
            .process(Event::Command(add_command(50_000, 7, 19050)))
            .unwrap();

        let mut next = channel
            .commits()
            .unwrap()
            .next_local_unsigned_lcss(19002);
        next.block_day = 19002;
        let reaction = channel
            .process(Event::Peer(Messages::StateUpdate(host_state_update(
                &next,
            ))))
            .unwrap();
        assert!(reaction.disconnect);
        assert_eq!(channel.stage(), Lifecycle::Sleeping);
        // No promotion happened
        assert_eq!(
            channel.commits().unwrap().last_cross_signed_state.local_updates,
            0
        );
    }

    #[test]
    fn wrong_remote_sig_suspends() {
        let mut channel = opened_channel(200_000_000, 100_000_000);
        channel
            .process(Event::Command(add_command(50_000, 7, 19050)))
            .unwrap();

        // Host signs a different state than the one we are committing to
        let mut tampered = channel
            .commits()
            .unwrap()
            .next_local_unsigned_lcss(channel.block.day);
        tampered.local_balance_msat -= 1;
        let reaction = channel
            .process(Event::Peer(Messages::StateUpdate(host_state_update(
                &tampered,
            ))))
            .unwrap();
        assert!(reaction.persist);
        assert!(matches!(reaction.sends[..], [Messages::Fail(_)]));
        let fail = channel.commits().unwrap().local_error.clone().unwrap();
        assert_eq!(fail.code().as_deref(), Some(ERR_HOSTED_WRONG_REMOTE_SIG));
    }

    #[test]
    fn reject_override_with_regressed_counter() {
        // Scenario: override proposes local_updates=3 while our state
        // remembers remote_updates=5
        let mut channel = testkit::errored_channel_with_outgoing(7, 25_000);
        {
            let commits = channel.commits.as_mut().unwrap();
            commits.last_cross_signed_state.remote_updates = 5;
        }
        let proposal = StateOverride {
            block_day: 19001,
            local_balance_msat: 50_000_000,
            local_updates: 3,
            remote_updates: 10,
            local_sig_of_remote_lcss: hc2p::dumb_sig(),
        };
        channel
            .process(Event::Peer(Messages::StateOverride(proposal)))
            .unwrap();

        let before = channel.commits().unwrap().clone();
        let err = channel
            .process(Event::Command(Command::AcceptOverride))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "new local update number from remote host is wrong"
        );
        // No state change on rejection
        assert_eq!(channel.commits().unwrap(), &before);
    }

    #[test]
    fn accept_override() {
        let mut channel = testkit::errored_channel_with_outgoing(7, 25_000);
        let state =
            channel.commits().unwrap().last_cross_signed_state.clone();
        let capacity = state.init_hosted_channel.channel_capacity_msat;

        // Build the override the way the host would: its own balance and
        // counters plus a signature over our resulting view
        let overridden_view = LastCrossSignedState {
            is_host: false,
            refund_script_pubkey: state.refund_script_pubkey.clone(),
            init_hosted_channel: state.init_hosted_channel.clone(),
            block_day: 19002,
            local_balance_msat: capacity - 60_000_000,
            remote_balance_msat: 60_000_000,
            local_updates: 20,
            remote_updates: 20,
            incoming_htlcs: vec![],
            outgoing_htlcs: vec![],
            remote_sig_of_local: hc2p::dumb_sig(),
            local_sig_of_remote: hc2p::dumb_sig(),
        };
        let proposal = StateOverride {
            block_day: 19002,
            local_balance_msat: 60_000_000,
            local_updates: 20,
            remote_updates: 20,
            local_sig_of_remote_lcss: testkit::host_sign(&overridden_view),
        };
        channel
            .process(Event::Peer(Messages::StateOverride(proposal)))
            .unwrap();

        let reaction = channel
            .process(Event::Command(Command::AcceptOverride))
            .unwrap();
        assert!(reaction.persist);
        assert!(matches!(reaction.sends[..], [Messages::StateUpdate(_)]));
        // The pre-override outgoing add is gone and reported as lost
        assert!(matches!(
            reaction.events[..],
            [
                ChannelEvent::AddRejectedLocally {
                    reason: LocalReject::InPrincipleNotSendable,
                    ..
                },
                ChannelEvent::ResolversNotified
            ]
        ));

        let commits = channel.commits().unwrap();
        let state = &commits.last_cross_signed_state;
        assert!(state.incoming_htlcs.is_empty());
        assert!(state.outgoing_htlcs.is_empty());
        assert!(state.verify_remote_sig(testkit::host_pubkey()));
        assert_eq!(state.local_balance_msat, capacity - 60_000_000);
        assert!(!commits.is_errored());
        assert_eq!(channel.stage(), Lifecycle::Open);
    }

    #[test]
    fn expired_outgoing_with_preimage_on_chain() {
        // Scenario: outgoing add with expiry 19000 at tip 19001; the
        // preimage shows up in the on-chain scan
        let mut channel = opened_channel(200_000_000, 100_000_000);
        channel
            .process(Event::Command(add_command(50_000, 7, 19000)))
            .unwrap();
        let next = channel
            .commits()
            .unwrap()
            .next_local_unsigned_lcss(channel.block.day);
        channel
            .process(Event::Peer(Messages::StateUpdate(host_state_update(
                &next,
            ))))
            .unwrap();

        let reaction = channel.process(Event::Block(block(19001))).unwrap();
        let hashes = reaction.preimage_request.expect("scan must be requested");
        let payment_hash = HashLock::from(preimage(7));
        assert!(hashes.contains(&payment_hash));

        let mut found = BTreeMap::new();
        found.insert(payment_hash, preimage(7));
        let reaction =
            channel.process(Event::PreimagesRevealed(found)).unwrap();

        assert!(reaction.persist);
        assert!(matches!(
            reaction.events[..],
            [ChannelEvent::FulfillReceived(_)]
        ));
        let commits = channel.commits().unwrap();
        assert!(commits.post_error_outgoing_resolved_ids.contains(&1));
        assert_eq!(
            commits.local_error.as_ref().unwrap().code().as_deref(),
            Some(ERR_HOSTED_TIMED_OUT_OUTGOING_HTLC)
        );
    }

    #[test]
    fn revealed_preimage_with_expired_incoming_suspends() {
        let mut channel = opened_channel(200_000_000, 100_000_000);
        let incoming = testkit::incoming_add(&channel, 2_000_000, 3);
        channel
            .process(Event::Peer(Messages::UpdateAddHtlc(incoming.clone())))
            .unwrap();
        let next = channel
            .commits()
            .unwrap()
            .next_local_unsigned_lcss(channel.block.day);
        channel
            .process(Event::Peer(Messages::StateUpdate(host_state_update(
                &next,
            ))))
            .unwrap();

        // We reveal the preimage but the host never signs over the fulfill
        channel
            .process(Event::Command(Command::FulfillHtlc {
                htlc_id: incoming.htlc_id,
                payment_preimage: preimage(3),
            }))
            .unwrap();

        let reaction = channel
            .process(Event::Block(block(incoming.cltv_expiry + 1)))
            .unwrap();
        assert!(matches!(reaction.sends[..], [Messages::Fail(_)]));
        let fail = channel.commits().unwrap().local_error.clone().unwrap();
        assert_eq!(fail.code().as_deref(), Some(ERR_HOSTED_MANUAL_SUSPEND));
    }

    #[test]
    fn remote_fail_suspends_but_fulfill_command_passes() {
        let mut channel = opened_channel(200_000_000, 100_000_000);
        let incoming = testkit::incoming_add(&channel, 2_000_000, 3);
        channel
            .process(Event::Peer(Messages::UpdateAddHtlc(incoming.clone())))
            .unwrap();
        let next = channel
            .commits()
            .unwrap()
            .next_local_unsigned_lcss(channel.block.day);
        channel
            .process(Event::Peer(Messages::StateUpdate(host_state_update(
                &next,
            ))))
            .unwrap();

        let fail = Fail::with_code(channel.channel_id(), "boom");
        let reaction =
            channel.process(Event::Peer(Messages::Fail(fail))).unwrap();
        assert!(reaction.persist);
        assert!(matches!(
            reaction.events[..],
            [ChannelEvent::RemoteErrored(_)]
        ));
        assert!(channel.commits().unwrap().is_errored());

        // New adds are rejected with a typed reason
        let reaction = channel
            .process(Event::Command(add_command(50_000, 9, 19050)))
            .unwrap();
        assert!(matches!(
            reaction.events[..],
            [ChannelEvent::AddRejectedLocally {
                reason: LocalReject::ChannelNotAbleToSend,
                ..
            }]
        ));

        // Failing an incoming htlc is not permitted while suspended
        assert!(matches!(
            channel.process(Event::Command(Command::FailHtlc {
                htlc_id: incoming.htlc_id,
                reason: vec![],
            })),
            Err(Error::Suspended(_))
        ));

        // But revealing a preimage still is
        let reaction = channel
            .process(Event::Command(Command::FulfillHtlc {
                htlc_id: incoming.htlc_id,
                payment_preimage: preimage(3),
            }))
            .unwrap();
        assert!(matches!(
            reaction.sends[..],
            [Messages::UpdateFulfillHtlc(_)]
        ));
    }

    #[test]
    fn propose_resize_and_fold() {
        let mut channel = opened_channel(200_000_000, 100_000_000);
        let reaction = channel
            .process(Event::Command(Command::ProposeResize {
                delta_msat: 100_000_000,
            }))
            .unwrap();
        assert!(reaction.persist);
        assert!(matches!(
            reaction.sends[..],
            [Messages::ResizeChannel(_), Messages::StateUpdate(_)]
        ));

        // The host folds the resize into the state it signs; our plain next
        // state fails verification and the resized retry must succeed
        let resize = channel.commits().unwrap().resize_proposal.unwrap();
        let resized_next = channel
            .commits()
            .unwrap()
            .with_resize(&resize)
            .next_local_unsigned_lcss(channel.block.day);
        let reaction = channel
            .process(Event::Peer(Messages::StateUpdate(host_state_update(
                &resized_next,
            ))))
            .unwrap();
        assert!(reaction.persist);

        let commits = channel.commits().unwrap();
        let state = &commits.last_cross_signed_state;
        assert_eq!(
            state.init_hosted_channel.channel_capacity_msat,
            300_000_000
        );
        assert_eq!(state.remote_balance_msat, 100_000_000 + 100_000_000);
        assert_eq!(state.local_balance_msat, 100_000_000);
        assert!(commits.resize_proposal.is_none());
        assert!(state.verify_remote_sig(testkit::host_pubkey()));
    }

    #[test]
    fn fail_malformed_requires_known_htlc() {
        let mut channel = opened_channel(200_000_000, 100_000_000);
        let err = channel
            .process(Event::Command(Command::FailMalformedHtlc {
                htlc_id: 9,
                sha256_of_onion: Slice32::from_inner(
                    sha256::Hash::hash(&[]).into_inner(),
                ),
                failure_code: 0x4000 | 1,
            }))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownHtlc(_, 9)));
    }
}
