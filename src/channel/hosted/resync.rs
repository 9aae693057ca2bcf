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

//! Resync engine: reconciliation of the local state with the
//! `last_cross_signed_state` the host replies with after a reconnect.
//!
//! Either side may have signed states or queued updates the other never
//! received. Comparing the update counters of both views classifies the
//! situation into even, ahead or behind; behind additionally splits into a
//! reconstructible divergence and a hopeless one where the host state is
//! adopted as authoritative.

use hc2p::hosted::{
    ERR_HOSTED_INVALID_RESIZE, ERR_HOSTED_WRONG_LOCAL_SIG,
    ERR_HOSTED_WRONG_REMOTE_SIG,
};
use hc2p::{LastCrossSignedState, Messages, UpdateAddHtlc, UpdateMessage};

use super::{
    ChannelEvent, ChannelHosted, HostedCommits, Lifecycle, LocalReject,
    Reaction,
};
use crate::channel::Error;

impl ChannelHosted {
    pub(super) fn attempt_init_resync(
        &mut self,
        remote_state: LastCrossSignedState,
    ) -> Result<Reaction, Error> {
        let mut commits = self.commits.clone().ok_or(Error::NoCommitments)?;

        // A suspended channel does not reconcile: repeat our failure and our
        // view of the state so the host can issue an override
        if commits.is_errored() {
            let mut sends = vec![];
            if let Some(fail) = &commits.local_error {
                sends.push(Messages::Fail(fail.clone()));
            }
            sends.push(Messages::LastCrossSignedState(
                commits.last_cross_signed_state.clone(),
            ));
            self.stage = Lifecycle::Open;
            return Ok(Reaction {
                sends,
                ..Reaction::default()
            });
        }

        // The host may have folded our resize proposal into the state it
        // sends while we never saw the signing round complete
        let remote_capacity =
            remote_state.init_hosted_channel.channel_capacity_msat;
        let local_capacity = commits
            .last_cross_signed_state
            .init_hosted_channel
            .channel_capacity_msat;
        if remote_capacity != local_capacity {
            match commits.resize_proposal {
                Some(resize)
                    if resize.new_capacity_msat == remote_capacity =>
                {
                    commits = commits.with_resize(&resize);
                    commits.resize_proposal = None;
                }
                _ => {
                    return Ok(
                        self.local_suspend(ERR_HOSTED_INVALID_RESIZE)
                    )
                }
            }
        }

        // The received state must carry valid signatures of both sides
        if !remote_state.verify_remote_sig(self.signer.pubkey()) {
            return Ok(self.local_suspend(ERR_HOSTED_WRONG_LOCAL_SIG));
        }
        if !remote_state
            .reverse()
            .verify_remote_sig(commits.remote_info.node_id)
        {
            return Ok(self.local_suspend(ERR_HOSTED_WRONG_REMOTE_SIG));
        }

        let local = commits.last_cross_signed_state.clone();
        if local.is_even(&remote_state) || local.is_ahead(&remote_state) {
            // Everything the host has we have too: repeat our state and our
            // still-unsigned updates; the host must resend its own
            let mut sends =
                vec![Messages::LastCrossSignedState(local)];
            if let Some(resize) = commits.resize_proposal {
                sends.push(Messages::ResizeChannel(resize));
            }
            for update in &commits.next_local_updates {
                sends.push(Messages::from(update.clone()));
            }
            commits.next_remote_updates = vec![];
            self.commits = Some(commits);
            self.stage = Lifecycle::Open;
            return Ok(Reaction {
                persist: true,
                sends,
                ..Reaction::default()
            });
        }

        // We are behind: the host signed a state including updates we queued
        // but never saw acknowledged
        let local_acked =
            (remote_state.remote_updates - local.local_updates) as usize;
        let remote_acked =
            (remote_state.local_updates - local.remote_updates) as usize;

        let leftover_local: Vec<UpdateMessage> = commits
            .next_local_updates
            .iter()
            .skip(local_acked)
            .cloned()
            .collect();
        let accounted_remote: Vec<UpdateMessage> = commits
            .next_remote_updates
            .iter()
            .take(remote_acked)
            .cloned()
            .collect();

        let mut synced_commits = commits.clone();
        synced_commits.next_local_updates.truncate(local_acked);
        synced_commits.next_remote_updates = accounted_remote.clone();

        let mut synced =
            synced_commits.next_local_unsigned_lcss(remote_state.block_day);
        synced.local_sig_of_remote = remote_state.remote_sig_of_local;
        synced.remote_sig_of_local = remote_state.local_sig_of_remote;

        if synced.reverse() == remote_state {
            let mut events = vec![];
            let signed_spec = commits.local_spec();
            for update in &accounted_remote {
                match update {
                    UpdateMessage::AddHtlc(add) => {
                        events.push(ChannelEvent::AddReceived(add.clone()))
                    }
                    update if update.is_failure() => {
                        if let Some(add) = signed_spec
                            .find_outgoing(update.htlc_id())
                            .cloned()
                        {
                            events.push(ChannelEvent::AddRejectedRemotely {
                                add,
                                fail: update.clone(),
                            });
                        }
                    }
                    _ => {}
                }
            }
            events.push(ChannelEvent::ResolversNotified);

            let mut sends =
                vec![Messages::LastCrossSignedState(synced.clone())];
            let mut promoted = synced_commits;
            promoted.last_cross_signed_state = synced;
            promoted.next_local_updates = leftover_local.clone();
            promoted.next_remote_updates = vec![];
            if let Some(resize) = promoted.resize_proposal {
                sends.push(Messages::ResizeChannel(resize));
            }
            for update in &leftover_local {
                sends.push(Messages::from(update.clone()));
            }
            self.commits = Some(promoted);
            self.stage = Lifecycle::Open;
            return Ok(Reaction {
                persist: true,
                sends,
                events,
                ..Reaction::default()
            });
        }

        // Too far behind to reconstruct: the host state becomes
        // authoritative and every outgoing HTLC it does not know about is
        // reported lost
        warn!(
            "hosted channel {} is too far behind, adopting the host state",
            commits.remote_info.channel_id()
        );
        let adopted = remote_state.reverse();
        let lost: Vec<UpdateAddHtlc> = commits
            .next_local_spec()
            .outgoing_htlcs
            .into_iter()
            .filter(|add| {
                !adopted
                    .outgoing_htlcs
                    .iter()
                    .any(|known| known.htlc_id == add.htlc_id)
            })
            .collect();

        let mut events: Vec<ChannelEvent> = lost
            .into_iter()
            .map(|add| ChannelEvent::AddRejectedLocally {
                add,
                reason: LocalReject::InPrincipleNotSendable,
            })
            .collect();
        events.push(ChannelEvent::ResolversNotified);

        let mut restored =
            HostedCommits::with(commits.remote_info.clone(), adopted.clone());
        restored.channel_update = commits.channel_update.clone();
        self.commits = Some(restored);
        self.stage = Lifecycle::Open;
        Ok(Reaction {
            persist: true,
            sends: vec![Messages::LastCrossSignedState(adopted)],
            events,
            ..Reaction::default()
        })
    }
}
