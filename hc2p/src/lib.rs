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
extern crate internet2;
#[macro_use]
extern crate lightning_encoding;
#[cfg(feature = "serde")]
extern crate serde_crate as serde;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_with;
#[cfg(feature = "strict_encoding")]
#[macro_use]
extern crate strict_encoding;

macro_rules! dumb_pubkey {
    () => {
        secp256k1::PublicKey::from_secret_key(
            secp256k1::SECP256K1,
            &secp256k1::ONE_KEY,
        )
    };
}

mod bolt1;
mod bolt2;
mod bolt7;
pub mod hosted;
mod lcss;
mod types;

pub use bolt1::{Fail, Warning};
pub use bolt2::{
    UpdateAddHtlc, UpdateFailHtlc, UpdateFailMalformedHtlc, UpdateFulfillHtlc,
    UpdateMessage,
};
pub use bolt7::{ChannelUpdate, CHANNEL_UPDATE_OPTION_MAXIMUM_HTLC};
pub use hosted::{
    AnnouncementSignature, AskBrandingInfo, HostedChannelBranding,
    InitHostedChannel, InvokeHostedChannel, QueryPreimages,
    QueryPublicHostedChannels, ReplyPreimages, ReplyPublicHostedChannelsEnd,
    ResizeChannel, StateOverride, StateUpdate,
};
pub use lcss::{dumb_sig, LastCrossSignedState};
pub use types::{
    ChannelId, NodeColor, OnionPacket, ShortChannelId, ONION_HOP_DATA_LEN,
    ONION_PACKET_LEN,
};

use std::io;

use internet2::{CreateUnmarshaller, Payload, Unmarshall, Unmarshaller};
use lightning_encoding::{LightningDecode, LightningEncode};
use once_cell::sync::Lazy;

pub static HC2P_UNMARSHALLER: Lazy<Unmarshaller<Messages>> =
    Lazy::new(Messages::create_unmarshaller);

/// All messages a hosted-channel state machine consumes or produces: the
/// hosted-channel protocol set plus the BOLT messages it reuses. Hosted
/// messages use odd types descending from 65535 so they pass through
/// non-supporting nodes as unknown-odd.
#[derive(Clone, PartialEq, Debug, Display, Api)]
#[api(encoding = "lightning")]
#[non_exhaustive]
#[display(inner)]
pub enum Messages {
    // Part I: BOLT messages reused by the hosted-channel protocol
    // ===========================================================
    /// Non-terminal notice; the channel remains usable.
    #[api(type = 1)]
    Warning(Warning),

    /// Terminal failure: the hosted channel becomes suspended and the data
    /// field carries an `ERR_HOSTED_*` code.
    #[api(type = 17)]
    Fail(Fail),

    #[api(type = 128)]
    UpdateAddHtlc(UpdateAddHtlc),

    #[api(type = 130)]
    UpdateFulfillHtlc(UpdateFulfillHtlc),

    #[api(type = 131)]
    UpdateFailHtlc(UpdateFailHtlc),

    #[api(type = 135)]
    UpdateFailMalformedHtlc(UpdateFailMalformedHtlc),

    #[api(type = 258)]
    ChannelUpdate(ChannelUpdate),

    // Part II: hosted-channel establishment and state exchange
    // ========================================================
    #[api(type = 65535)]
    InvokeHostedChannel(InvokeHostedChannel),

    #[api(type = 65533)]
    InitHostedChannel(InitHostedChannel),

    #[api(type = 65531)]
    LastCrossSignedState(LastCrossSignedState),

    #[api(type = 65529)]
    StateUpdate(StateUpdate),

    #[api(type = 65527)]
    StateOverride(StateOverride),

    #[api(type = 65525)]
    HostedChannelBranding(HostedChannelBranding),

    #[api(type = 65523)]
    AnnouncementSignature(AnnouncementSignature),

    #[api(type = 65521)]
    ResizeChannel(ResizeChannel),

    #[api(type = 65519)]
    QueryPublicHostedChannels(QueryPublicHostedChannels),

    #[api(type = 65517)]
    ReplyPublicHostedChannelsEnd(ReplyPublicHostedChannelsEnd),

    #[api(type = 65515)]
    QueryPreimages(QueryPreimages),

    #[api(type = 65513)]
    ReplyPreimages(ReplyPreimages),

    #[api(type = 65511)]
    AskBrandingInfo(AskBrandingInfo),
}

impl From<UpdateMessage> for Messages {
    fn from(update: UpdateMessage) -> Messages {
        match update {
            UpdateMessage::AddHtlc(add) => Messages::UpdateAddHtlc(add),
            UpdateMessage::FulfillHtlc(fulfill) => {
                Messages::UpdateFulfillHtlc(fulfill)
            }
            UpdateMessage::FailHtlc(fail) => Messages::UpdateFailHtlc(fail),
            UpdateMessage::FailMalformedHtlc(fail) => {
                Messages::UpdateFailMalformedHtlc(fail)
            }
        }
    }
}

impl LightningEncode for Messages {
    fn lightning_encode<E: io::Write>(
        &self,
        e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        Payload::from(self.clone()).lightning_encode(e)
    }
}

impl LightningDecode for Messages {
    fn lightning_decode<D: io::Read>(
        d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        let message = &*HC2P_UNMARSHALLER
            .unmarshall(&*Vec::<u8>::lightning_decode(d)?)
            .map_err(|_| {
                lightning_encoding::Error::DataIntegrityError(s!(
                    "can't unmarshall hosted-channel message"
                ))
            })?;
        Ok(message.clone())
    }
}

#[cfg(test)]
mod test {
    use internet2::TypedEnum;

    use super::*;

    #[test]
    fn hosted_message_types() {
        let invoke = Messages::InvokeHostedChannel(InvokeHostedChannel {
            chain_hash: Default::default(),
            refund_script_pubkey: Default::default(),
            secret: vec![],
        });
        // Message type is a big-endian prefix of the serialized frame
        assert_eq!(&invoke.serialize()[..2], &0xFFFFu16.to_be_bytes());

        let ask = Messages::AskBrandingInfo(AskBrandingInfo {
            channel_id: Default::default(),
        });
        assert_eq!(&ask.serialize()[..2], &0xFFE7u16.to_be_bytes());
    }
}
