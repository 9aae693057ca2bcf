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

//! Runtime glue around the pure state machine: interfaces of the external
//! collaborators (persistence, peer transport, on-chain preimage scan) and a
//! per-channel runner applying [`Reaction`]s with the store-before-send
//! ordering guarantee.

use std::collections::BTreeSet;

use bitcoin_scripts::hlc::HashLock;
use hc2p::hosted::ERR_HOSTED_MANUAL_SUSPEND;
use hc2p::{ChannelId, Messages};
use secp256k1::PublicKey;

use crate::channel::hosted::{
    ChannelEvent, ChannelHosted, Event, Reaction, StoredChannel,
};
use crate::channel::Error;

/// Durable per-channel persistence. The store is shared between channels but
/// every key is owned by a single channel event loop, so implementations
/// need no per-key coordination.
pub trait ChannelStore {
    type Error: std::error::Error;

    /// Durably replaces the record of the given channel. Must complete
    /// before any message implied by the stored state is sent out.
    fn store(
        &mut self,
        channel_id: ChannelId,
        state: &StoredChannel,
    ) -> Result<(), Self::Error>;

    /// Loads the record of the given channel, if present
    fn load(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<StoredChannel>, Self::Error>;
}

/// Fire-and-forget ordered message delivery to the remote host.
/// Back-pressure and framing are the transport's concern.
pub trait PeerSender {
    /// Queues a message towards the given peer; messages of one peer are
    /// delivered in `send` call order
    fn send(&mut self, node_id: PublicKey, message: Messages);

    /// Drops the connection to the peer. The disconnect surfaces back as
    /// [`Event::SocketOffline`].
    fn disconnect(&mut self, node_id: PublicKey);
}

/// On-chain lookup of payment preimages, used to rescue outgoing HTLCs
/// which expired while the host was silent. Completion must re-enter the
/// channel event queue as [`Event::PreimagesRevealed`]; a completion
/// against a closed channel is a no-op.
pub trait PreimageCheck {
    /// Starts a scan for the given payment hashes
    fn request(&mut self, channel_id: ChannelId, hashes: BTreeSet<HashLock>);
}

/// Errors produced when driving a channel through its runtime
#[derive(Debug, Display, Error)]
#[display(doc_comments)]
pub enum RuntimeError<E>
where
    E: std::error::Error,
{
    /// channel state persistence has failed: {0}
    Store(E),

    /// {0}
    Channel(Error),
}

/// Per-channel runtime: owns the state machine and applies its reactions to
/// the external collaborators.
///
/// Events must be fed strictly serially; the runner guarantees that a new
/// state is durable before any message depending on it leaves the node, so
/// that after a restart the resync procedure re-emits whatever was implied
/// by the persisted state but never sent.
pub struct ChannelRunner<S, T, P>
where
    S: ChannelStore,
    T: PeerSender,
    P: PreimageCheck,
{
    channel: ChannelHosted,
    store: S,
    sender: T,
    preimages: P,
}

impl<S, T, P> ChannelRunner<S, T, P>
where
    S: ChannelStore,
    T: PeerSender,
    P: PreimageCheck,
{
    pub fn with(
        channel: ChannelHosted,
        store: S,
        sender: T,
        preimages: P,
    ) -> Self {
        ChannelRunner {
            channel,
            store,
            sender,
            preimages,
        }
    }

    /// Read access to the driven state machine
    #[inline]
    pub fn channel(&self) -> &ChannelHosted {
        &self.channel
    }

    /// Feeds one event through the state machine and applies the resulting
    /// side effects.
    ///
    /// Fatal protocol violations suspend the channel (the suspension itself
    /// is persisted and the failure message sent) and are then returned to
    /// the caller for surfacing.
    pub fn dispatch(
        &mut self,
        event: Event,
    ) -> Result<Vec<ChannelEvent>, RuntimeError<S::Error>> {
        match self.channel.process(event) {
            Ok(reaction) => self.apply(reaction),
            Err(err @ Error::Transition(_)) => {
                warn!(
                    "hosted channel {} suspends on a protocol violation: {}",
                    self.channel.channel_id(),
                    err
                );
                let reaction =
                    self.channel.local_suspend(ERR_HOSTED_MANUAL_SUSPEND);
                self.apply(reaction)?;
                Err(RuntimeError::Channel(err))
            }
            Err(err) => Err(RuntimeError::Channel(err)),
        }
    }

    fn apply(
        &mut self,
        reaction: Reaction,
    ) -> Result<Vec<ChannelEvent>, RuntimeError<S::Error>> {
        let channel_id = self.channel.channel_id();
        let node_id = self.channel.remote_node_id();

        // Persistence comes first: a message which reaches the host before
        // the state behind it is durable can not be explained after a crash
        if reaction.persist {
            if let Some(commits) = self.channel.commits() {
                self.store
                    .store(channel_id, &StoredChannel::with(commits.clone()))
                    .map_err(RuntimeError::Store)?;
            }
        }

        for message in reaction.sends {
            self.sender.send(node_id, message);
        }
        if let Some(hashes) = reaction.preimage_request {
            self.preimages.request(channel_id, hashes);
        }
        if reaction.disconnect {
            self.sender.disconnect(node_id);
        }

        Ok(reaction.events)
    }
}
