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

use hc2p::InitHostedChannel;

/// The smallest in-flight HTLC value limit a host is allowed to impose, in
/// milli-satoshi
pub const HOSTED_MIN_MAX_HTLC_VALUE_IN_FLIGHT_MSAT: u64 = 100_000_000;

/// The largest minimum-HTLC requirement a host is allowed to impose, in
/// milli-satoshi
pub const HOSTED_MAX_HTLC_MINIMUM_MSAT: u64 = 546_000;

/// Errors from policy validation of host-proposed hosted-channel parameters
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Debug,
    Display,
    Error,
    StrictEncode,
    StrictDecode
)]
#[display(doc_comments)]
pub enum PolicyError {
    /// host-proposed initial client balance of {proposed} msat exceeds the
    /// channel capacity of {capacity} msat; rejecting the channel
    InitialBalanceExceedsCapacity { proposed: u64, capacity: u64 },

    /// host-proposed in-flight HTLC value limit of {proposed} msat is too
    /// small and below the required minimum of {required_minimum} msat;
    /// rejecting the channel
    HtlcInFlightMaximumTooSmall {
        proposed: u64,
        required_minimum: u64,
    },

    /// host-proposed HTLC minimum of {proposed} msat is too large and
    /// exceeds the allowed maximum of {allowed_maximum} msat; rejecting the
    /// channel
    HtlcMinimumTooLarge { proposed: u64, allowed_maximum: u64 },

    /// host-proposed limit on the number of in-flight HTLCs must be at least
    /// one; rejecting the channel
    NoAcceptedHtlcs,
}

/// Typed reasons for rejecting an outgoing HTLC before it leaves the
/// channel. Surfaced to upper layers through
/// [`super::ChannelEvent::AddRejectedLocally`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum LocalReject {
    /// channel is suspended or offline and can not currently send
    ChannelNotAbleToSend,

    /// payment can not be sent over this channel in principle
    InPrincipleNotSendable,

    /// HTLC amount is below the smallest amount the host accepts
    HtlcValueTooSmall,

    /// total in-flight HTLC value would exceed the channel limit
    HtlcValueInFlightTooHigh,

    /// number of in-flight HTLCs would exceed the channel limit
    TooManyAcceptedHtlcs,

    /// projected channel balance would become negative
    InsufficientBalance,

    /// HTLC expiry is too close to the current chain tip
    ExpiryTooSoon,
}

/// Reasons for refusing a host-proposed state override. The display strings
/// are part of the protocol diagnostics surfaced to the user.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum OverrideError {
    /// no override proposal from the remote host is present
    NoProposal,

    /// new local balance from remote host is larger than capacity
    BalanceExceedsCapacity,

    /// new local update number from remote host is wrong
    LocalUpdatesRegression,

    /// new remote update number from remote host is wrong
    RemoteUpdatesRegression,

    /// new block day from remote host is wrong
    BlockDayRegression,

    /// override signature from remote host is wrong
    InvalidSignature,
}

/// Policy a client applies to host-proposed channel parameters and outgoing
/// payments.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[derive(StrictEncode, StrictDecode)]
pub struct HostedPolicy {
    /// Minimum acceptable value for the host in-flight HTLC value limit, in
    /// milli-satoshi
    pub max_htlc_value_in_flight_msat_min: u64,

    /// Maximum acceptable value for the host per-HTLC minimum, in
    /// milli-satoshi
    pub htlc_minimum_msat_max: u64,

    /// Number of blocks an outgoing HTLC expiry must stay above the chain
    /// tip for the payment to be worth sending
    pub cltv_safety_delta: u32,
}

impl Default for HostedPolicy {
    /// Sets reasonable values for a hosted-channel client
    fn default() -> HostedPolicy {
        HostedPolicy {
            max_htlc_value_in_flight_msat_min:
                HOSTED_MIN_MAX_HTLC_VALUE_IN_FLIGHT_MSAT,
            htlc_minimum_msat_max: HOSTED_MAX_HTLC_MINIMUM_MSAT,
            // an HTLC which can time out while a block is being mined is not
            // worth relaying
            cltv_safety_delta: 18,
        }
    }
}

impl HostedPolicy {
    /// Validates parameters proposed by the host in `init_hosted_channel`
    /// against the policy
    pub fn validate_init(
        &self,
        init: &InitHostedChannel,
    ) -> Result<(), PolicyError> {
        if init.initial_client_balance_msat > init.channel_capacity_msat {
            return Err(PolicyError::InitialBalanceExceedsCapacity {
                proposed: init.initial_client_balance_msat,
                capacity: init.channel_capacity_msat,
            });
        }

        if init.max_htlc_value_in_flight_msat
            < self.max_htlc_value_in_flight_msat_min
        {
            return Err(PolicyError::HtlcInFlightMaximumTooSmall {
                proposed: init.max_htlc_value_in_flight_msat,
                required_minimum: self.max_htlc_value_in_flight_msat_min,
            });
        }

        if init.htlc_minimum_msat > self.htlc_minimum_msat_max {
            return Err(PolicyError::HtlcMinimumTooLarge {
                proposed: init.htlc_minimum_msat,
                allowed_maximum: self.htlc_minimum_msat_max,
            });
        }

        if init.max_accepted_htlcs < 1 {
            return Err(PolicyError::NoAcceptedHtlcs);
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn init() -> InitHostedChannel {
        InitHostedChannel {
            max_htlc_value_in_flight_msat: 90_000_000,
            htlc_minimum_msat: 1000,
            max_accepted_htlcs: 10,
            channel_capacity_msat: 100_000_000,
            initial_client_balance_msat: 0,
            features: vec![],
        }
    }

    #[test]
    fn init_validation() {
        let policy = HostedPolicy::default();

        let mut too_small_in_flight = init();
        assert_eq!(
            policy.validate_init(&too_small_in_flight),
            Err(PolicyError::HtlcInFlightMaximumTooSmall {
                proposed: 90_000_000,
                required_minimum: HOSTED_MIN_MAX_HTLC_VALUE_IN_FLIGHT_MSAT,
            })
        );
        too_small_in_flight.max_htlc_value_in_flight_msat = 100_000_000;
        assert_eq!(policy.validate_init(&too_small_in_flight), Ok(()));

        let mut overdrawn = init();
        overdrawn.max_htlc_value_in_flight_msat = 100_000_000;
        overdrawn.initial_client_balance_msat = 100_000_001;
        assert_eq!(
            policy.validate_init(&overdrawn),
            Err(PolicyError::InitialBalanceExceedsCapacity {
                proposed: 100_000_001,
                capacity: 100_000_000,
            })
        );

        let mut greedy_minimum = init();
        greedy_minimum.max_htlc_value_in_flight_msat = 100_000_000;
        greedy_minimum.htlc_minimum_msat = 1_000_000;
        assert_eq!(
            policy.validate_init(&greedy_minimum),
            Err(PolicyError::HtlcMinimumTooLarge {
                proposed: 1_000_000,
                allowed_maximum: HOSTED_MAX_HTLC_MINIMUM_MSAT,
            })
        );

        let mut no_htlcs = init();
        no_htlcs.max_htlc_value_in_flight_msat = 100_000_000;
        no_htlcs.max_accepted_htlcs = 0;
        assert_eq!(
            policy.validate_init(&no_htlcs),
            Err(PolicyError::NoAcceptedHtlcs)
        );
    }
}
