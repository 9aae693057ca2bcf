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

use std::io;

#[cfg(feature = "serde")]
use serde_with::{As, DisplayFromStr};

use amplify::hex::{self, FromHex};
use amplify::{DumbDefault, Slice32, Wrapper};
use bitcoin::hashes::{sha256, Hash, HashEngine};
use lightning_encoding::{LightningDecode, LightningEncode};
use secp256k1::PublicKey;
#[cfg(feature = "strict_encoding")]
use strict_encoding::{StrictDecode, StrictEncode};

/// Size of a sphinx onion routing packet carried by `update_add_htlc`:
/// version byte, 33-byte ephemeral key, 1300 bytes of hop data and a 32-byte
/// HMAC.
pub const ONION_PACKET_LEN: usize = 1366;

/// Size of the per-hop data blob inside [`OnionPacket`].
pub const ONION_HOP_DATA_LEN: usize = 1300;

/// Hosted channel id: since there is no funding transaction, the id is
/// derived as a hash committing to both peer identities.
#[cfg_attr(
    feature = "serde",
    serde_as,
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
#[derive(
    Wrapper,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Display,
    Default,
    From,
    LightningEncode,
    LightningDecode,
)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display(LowerHex)]
#[wrapper(FromStr, LowerHex, UpperHex)]
pub struct ChannelId(
    #[cfg_attr(feature = "serde", serde(with = "As::<DisplayFromStr>"))]
    Slice32,
);

impl FromHex for ChannelId {
    fn from_byte_iter<I>(iter: I) -> Result<Self, hex::Error>
    where
        I: Iterator<Item = Result<u8, hex::Error>>
            + ExactSizeIterator
            + DoubleEndedIterator,
    {
        Ok(Self(Slice32::from_byte_iter(iter)?))
    }
}

impl ChannelId {
    /// Computes hosted channel id as
    /// `sha256(node_specific_pubkey || remote_node_id)`.
    pub fn hosted(
        node_specific_pubkey: PublicKey,
        remote_node_id: PublicKey,
    ) -> ChannelId {
        let mut engine = sha256::Hash::engine();
        engine.input(&node_specific_pubkey.serialize());
        engine.input(&remote_node_id.serialize());
        let hash = sha256::Hash::from_engine(engine);
        ChannelId::from_inner(Slice32::from_inner(hash.into_inner()))
    }

    /// Returns short channel id used by hosted channels: the 64-bit
    /// truncation of the channel id hash.
    pub fn short_channel_id(&self) -> ShortChannelId {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.as_inner().as_inner()[..8]);
        ShortChannelId::from_inner(u64::from_be_bytes(buf))
    }

    /// With some lightning messages (like error) channel id consisting of all
    /// zeros has a special meaning of "applicable to all opened channels".
    /// This function allow to detect this kind of [`ChannelId`]
    pub fn is_wildcard(&self) -> bool {
        self.to_inner().to_inner() == [0u8; 32]
    }
}

/// Short channel id of a hosted channel.
///
/// Hosted channels have no funding output, so instead of the BOLT-7
/// `block x tx x vout` triple the short id is an opaque 64-bit truncation of
/// the channel id hash.
#[derive(
    Wrapper,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Display,
    Default,
    From,
    LightningEncode,
    LightningDecode,
)]
#[cfg_attr(feature = "strict_encoding", derive(StrictEncode, StrictDecode))]
#[display("{0:#018x}")]
pub struct ShortChannelId(u64);

/// RGB color used in hosted channel branding
#[derive(Wrapper, Clone, Copy, Debug, Default, From, PartialEq, Eq)]
pub struct NodeColor([u8; 3]);

impl NodeColor {
    fn encode<E: io::Write>(&self, mut e: E) -> Result<usize, io::Error> {
        let len = e.write(self.as_inner())?;
        Ok(len)
    }

    fn decode<D: io::Read>(mut d: D) -> Result<Self, io::Error> {
        let mut buf = [0u8; 3];
        d.read_exact(&mut buf)?;
        Ok(Self::from_inner(buf))
    }
}

impl LightningEncode for NodeColor {
    #[inline]
    fn lightning_encode<E: io::Write>(
        &self,
        e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        self.encode(e).map_err(lightning_encoding::Error::from)
    }
}

impl LightningDecode for NodeColor {
    #[inline]
    fn lightning_decode<D: io::Read>(
        d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        Self::decode(d).map_err(lightning_encoding::Error::from)
    }
}

#[cfg(feature = "strict_encoding")]
impl StrictEncode for NodeColor {
    #[inline]
    fn strict_encode<E: io::Write>(
        &self,
        e: E,
    ) -> Result<usize, strict_encoding::Error> {
        self.encode(e).map_err(strict_encoding::Error::from)
    }
}

#[cfg(feature = "strict_encoding")]
impl StrictDecode for NodeColor {
    #[inline]
    fn strict_decode<D: io::Read>(
        d: D,
    ) -> Result<Self, strict_encoding::Error> {
        Self::decode(d).map_err(strict_encoding::Error::from)
    }
}

/// Opaque sphinx onion routing packet.
///
/// The packet is constructed and decrypted outside of this library; the
/// channel state machine only moves it around, so nothing but the wire
/// framing is interpreted here.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct OnionPacket {
    /// Packet version; the only version known today is 0
    pub version: u8,

    /// Ephemeral public key of the onion construction
    pub public_key: PublicKey,

    /// Encrypted per-hop payload data
    pub hop_data: Box<[u8]>,

    /// HMAC over the whole packet committing to the payment hash
    pub hmac: Slice32,
}

impl DumbDefault for OnionPacket {
    fn dumb_default() -> Self {
        OnionPacket {
            version: 0,
            public_key: dumb_pubkey!(),
            hop_data: vec![0u8; ONION_HOP_DATA_LEN].into_boxed_slice(),
            hmac: Slice32::default(),
        }
    }
}

impl OnionPacket {
    fn encode<E: io::Write>(&self, mut e: E) -> Result<usize, io::Error> {
        let mut len = e.write(&[self.version])?;
        len += e.write(&self.public_key.serialize())?;
        len += e.write(&self.hop_data)?;
        len += e.write(self.hmac.as_inner())?;
        Ok(len)
    }

    fn decode<D: io::Read>(mut d: D) -> Result<Self, io::Error> {
        let mut version = [0u8; 1];
        d.read_exact(&mut version)?;
        let mut key_buf = [0u8; 33];
        d.read_exact(&mut key_buf)?;
        let public_key = PublicKey::from_slice(&key_buf)
            .map_err(|_| io::ErrorKind::InvalidData)?;
        let mut hop_data = vec![0u8; ONION_HOP_DATA_LEN];
        d.read_exact(&mut hop_data)?;
        let mut hmac = [0u8; 32];
        d.read_exact(&mut hmac)?;
        Ok(OnionPacket {
            version: version[0],
            public_key,
            hop_data: hop_data.into_boxed_slice(),
            hmac: Slice32::from_inner(hmac),
        })
    }
}

impl LightningEncode for OnionPacket {
    #[inline]
    fn lightning_encode<E: io::Write>(
        &self,
        e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        self.encode(e).map_err(lightning_encoding::Error::from)
    }
}

impl LightningDecode for OnionPacket {
    #[inline]
    fn lightning_decode<D: io::Read>(
        d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        Self::decode(d).map_err(lightning_encoding::Error::from)
    }
}

#[cfg(feature = "strict_encoding")]
impl StrictEncode for OnionPacket {
    #[inline]
    fn strict_encode<E: io::Write>(
        &self,
        e: E,
    ) -> Result<usize, strict_encoding::Error> {
        self.encode(e).map_err(strict_encoding::Error::from)
    }
}

#[cfg(feature = "strict_encoding")]
impl StrictDecode for OnionPacket {
    #[inline]
    fn strict_decode<D: io::Read>(
        d: D,
    ) -> Result<Self, strict_encoding::Error> {
        Self::decode(d).map_err(strict_encoding::Error::from)
    }
}
