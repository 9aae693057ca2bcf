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

//! Core state machine for hosted channels: bilateral off-chain payment
//! channels between a client and a trusted host whose state never touches a
//! blockchain. With no on-chain enforcement the correctness of a channel
//! reduces to the correctness of the cross-signing discipline implemented
//! here.
//!
//! The peer transport, the wire framing, the persistence backend and the
//! on-chain preimage lookup are external collaborators accessed through the
//! narrow interfaces in [`runtime`].

#![recursion_limit = "256"]
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code
)]

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate strict_encoding;
#[macro_use]
extern crate log;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

pub mod channel;
pub mod runtime;

pub use channel::hosted::{
    BlockStamp, ChannelEvent, ChannelHosted, Command, CommitmentSpec, Event,
    HostedCommits, HostedPolicy, Lifecycle, LocalReject, NodeSigner,
    OverrideError, PolicyError, Reaction, RemoteFulfill, RemoteNodeInfo,
    StoredChannel,
};
pub use channel::{Error, TransitionFail};
pub use runtime::{
    ChannelRunner, ChannelStore, PeerSender, PreimageCheck, RuntimeError,
};
