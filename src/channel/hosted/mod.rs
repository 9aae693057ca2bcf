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

mod channel;
mod commits;
mod keyset;
mod policy;
mod resync;
mod state;
#[cfg(test)]
pub(crate) mod testkit;
mod util;

pub use channel::ChannelHosted;
pub use commits::{CommitmentSpec, HostedCommits};
pub use keyset::{NodeSigner, RemoteNodeInfo};
pub use policy::{HostedPolicy, LocalReject, OverrideError, PolicyError};
pub use state::{StoredChannel, StoredStateError, HOSTED_STATE_VERSION};
pub use util::{
    BlockStamp, ChannelEvent, Command, Event, Lifecycle, Reaction,
    RemoteFulfill,
};
