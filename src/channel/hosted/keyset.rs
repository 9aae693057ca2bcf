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

use hc2p::{ChannelId, LastCrossSignedState, ResizeChannel, ShortChannelId};
use secp256k1::{PublicKey, SecretKey, SECP256K1};

/// Narrow signing capability over the node-specific private key.
///
/// The key itself never leaves this type: the state machine can only obtain
/// signatures over cross-signed states and resize proposals.
#[derive(Clone)]
pub struct NodeSigner {
    key: SecretKey,
}

impl NodeSigner {
    /// Wraps the per-peer node-specific private key
    pub fn with(key: SecretKey) -> NodeSigner {
        NodeSigner { key }
    }

    /// Public key the remote host verifies our state signatures against
    pub fn pubkey(&self) -> PublicKey {
        PublicKey::from_secret_key(SECP256K1, &self.key)
    }

    /// Returns the state with `local_sig_of_remote` signing the reversed
    /// state view
    pub fn sign_state(
        &self,
        state: LastCrossSignedState,
    ) -> LastCrossSignedState {
        state.with_local_sig_of_remote(&self.key)
    }

    /// Produces a signed capacity-increase proposal
    pub fn sign_resize(&self, new_capacity_msat: u64) -> ResizeChannel {
        ResizeChannel::with(new_capacity_msat, &self.key)
    }
}

/// Identity of the remote host together with the local key used towards it
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[display("{alias} ({node_id})")]
pub struct RemoteNodeInfo {
    /// Remote node identity key
    pub node_id: PublicKey,

    /// Local per-peer key; the host verifies our state signatures against it
    pub node_specific_pubkey: PublicKey,

    /// Human-readable host alias
    pub alias: String,
}

impl RemoteNodeInfo {
    /// Channel id of the hosted channel towards this host
    #[inline]
    pub fn channel_id(&self) -> ChannelId {
        ChannelId::hosted(self.node_specific_pubkey, self.node_id)
    }

    /// Short channel id of the hosted channel towards this host
    #[inline]
    pub fn short_channel_id(&self) -> ShortChannelId {
        self.channel_id().short_channel_id()
    }
}
