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

//! BOLT-1 control messages reused by the hosted-channel protocol

use std::fmt::{self, Display, Formatter};

use super::ChannelId;

/// For simplicity of diagnosis, it's often useful to tell a peer that
/// something is incorrect. For hosted channels a failure is terminal: the
/// channel becomes suspended and `data` carries one of the `ERR_HOSTED_*`
/// codes.
///
/// # Specification
/// <https://github.com/lightningnetwork/lightning-rfc/blob/master/01-messaging.md#the-error-message>
#[derive(Clone, PartialEq, Eq, Debug, Error, LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
pub struct Fail {
    /// The channel is referred to by channel_id, unless channel_id is 0 (i.e.
    /// all bytes are 0), in which case it refers to all channels.
    pub channel_id: ChannelId,

    /// Any specific error details, either as string or binary data
    pub data: Vec<u8>,
}

impl Fail {
    /// Constructs failure message carrying one of the `ERR_HOSTED_*` codes.
    pub fn with_code(channel_id: ChannelId, code: &str) -> Fail {
        Fail {
            channel_id,
            data: code.as_bytes().to_vec(),
        }
    }

    /// Returns error code carried by the message, if it is a printable string
    pub fn code(&self) -> Option<String> {
        String::from_utf8(self.data.clone()).ok()
    }
}

impl Display for Fail {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("channel failure")?;
        if self.channel_id.is_wildcard() {
            f.write_str(" on all channels")?;
        } else {
            write!(f, " on channel {}", self.channel_id)?;
        }
        // NB: if data is not composed solely of printable ASCII characters
        // (For reference: the printable character set includes byte values 32
        // through 126, inclusive) SHOULD NOT print out data verbatim.
        if let Some(msg) = self.code() {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

/// Non-terminal notice from the peer: the sender still considers the channel
/// usable.
#[derive(Clone, PartialEq, Eq, Debug, LightningEncode, LightningDecode)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
pub struct Warning {
    /// The channel the warning applies to; all-zero means all channels.
    pub channel_id: ChannelId,

    /// Any specific warning details, either as string or binary data
    pub data: Vec<u8>,
}

impl Display for Warning {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "warning on channel {}", self.channel_id)?;
        if let Ok(msg) = String::from_utf8(self.data.clone()) {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}
