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

pub mod hosted;

use hc2p::ChannelId;

use self::hosted::{Lifecycle, OverrideError, PolicyError};

/// Fatal per-channel protocol violation: an invalid signature, an impossible
/// balance, a counter regression or an unknown HTLC reference. The channel
/// can not process the offending input; the caller decides whether to
/// suspend.
#[derive(Clone, PartialEq, Eq, Debug, Display, Error)]
#[display("channel {channel_id} can not process the input: {details}")]
pub struct TransitionFail {
    /// Channel the violation happened on
    pub channel_id: ChannelId,

    /// Description of the offending input
    pub details: String,
}

impl TransitionFail {
    pub fn with(
        channel_id: ChannelId,
        details: impl ToString,
    ) -> TransitionFail {
        TransitionFail {
            channel_id,
            details: details.to_string(),
        }
    }
}

/// Errors returned by the hosted-channel state machine
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// {0}
    #[from]
    Transition(TransitionFail),

    /// {0}
    #[from]
    Policy(PolicyError),

    /// {0}
    #[from]
    Override(OverrideError),

    /// channel {0} is suspended and the requested operation is not permitted
    Suspended(ChannelId),

    /// channel {0} has no HTLC with id {1} matching the request
    UnknownHtlc(ChannelId, u64),

    /// channel has no commitments yet, the requested operation requires an
    /// established state
    NoCommitments,

    /// channel is in a state {current} incompatible with the requested
    /// operation
    LifecycleMismatch {
        current: Lifecycle,
        required: &'static [Lifecycle],
    },
}
