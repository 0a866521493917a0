//! The referral platform program.
//!
//! [`ReferralPlatform::create_referral`] is the only state-changing entry
//! point. It validates the new relationship, checks the reward pool, commits
//! the edge and pays the referrer. If the payout is refused the edge is rolled
//! back before returning, so callers see either both effects or neither.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::ledger::{Amount, TokenLedger};
use crate::referral::{GraphError, ReferralEdge, ReferralGraph, RewardPolicy};

/// Seed mixed with the deployer address to derive the platform account.
pub const PLATFORM_SEED: &[u8] = b"rifero-platform";

#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
pub enum ReferralError {
    #[error("invalid account")]
    InvalidAccount,
    #[error("cannot refer yourself")]
    SelfReference,
    #[error("already referred")]
    AlreadyReferred,
    #[error("cannot refer your referrer")]
    CircularReferral,
    #[error("insufficient reward pool")]
    InsufficientRewardPool,
    #[error("reward transfer failed")]
    RewardTransferFailed,
}

impl From<GraphError> for ReferralError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::SelfReference => ReferralError::SelfReference,
            GraphError::AlreadyReferred => ReferralError::AlreadyReferred,
            GraphError::CircularReferral => ReferralError::CircularReferral,
        }
    }
}

/// Stages of one `create_referral` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validating,
    Disbursing,
    Committing,
    Succeeded,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Validating => "validating",
            Phase::Disbursing => "disbursing",
            Phase::Committing => "committing",
            Phase::Succeeded => "succeeded",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferralReceipt {
    pub edge: ReferralEdge,
    pub reward: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReferralEvent {
    ReferralCreated {
        referrer: Account,
        referee: Account,
        reward: Amount,
        sequence: u64,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferralPlatform {
    account: Account,
    policy: RewardPolicy,
    graph: ReferralGraph,
    #[serde(default)]
    events: Vec<ReferralEvent>,
}

impl ReferralPlatform {
    pub fn new(account: Account, policy: RewardPolicy) -> Self {
        Self {
            account,
            policy,
            graph: ReferralGraph::new(),
            events: Vec::new(),
        }
    }

    /// Platform instance at the address derived from `deployer`.
    pub fn deploy(deployer: &Account, policy: RewardPolicy) -> Self {
        Self::new(Account::derive_program(PLATFORM_SEED, deployer), policy)
    }

    /// Account holding the reward pool.
    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn reward_per_referral(&self) -> Amount {
        self.policy.reward_per_referral()
    }

    pub fn graph(&self) -> &ReferralGraph {
        &self.graph
    }

    pub fn events(&self) -> &[ReferralEvent] {
        &self.events
    }

    /// `ledger` must be bound to the platform account: its `transfer` pays out
    /// of the reward pool.
    pub fn create_referral<L: TokenLedger>(
        &mut self,
        ledger: &mut L,
        caller: Account,
        referee: Account,
    ) -> Result<ReferralReceipt, ReferralError> {
        let result = self.run_create(ledger, caller, referee);
        match &result {
            Ok(receipt) => tracing::info!(
                referrer = %caller,
                %referee,
                reward = receipt.reward,
                sequence = receipt.edge.sequence,
                "referral created"
            ),
            Err(err) => tracing::warn!(referrer = %caller, %referee, %err, "referral rejected"),
        }
        result
    }

    fn run_create<L: TokenLedger>(
        &mut self,
        ledger: &mut L,
        caller: Account,
        referee: Account,
    ) -> Result<ReferralReceipt, ReferralError> {
        trace_phase(Phase::Validating, &caller, &referee);
        if referee.is_zero() || caller.is_zero() {
            return Err(ReferralError::InvalidAccount);
        }
        self.graph.check_link(&caller, &referee)?;

        trace_phase(Phase::Disbursing, &caller, &referee);
        let prospective = ReferralEdge {
            referrer: caller,
            referee,
            sequence: self.graph.len() as u64,
        };
        let reward = self.policy.reward_for(&prospective);
        let pool = ledger.balance_of(&self.account);
        if !RewardPolicy::can_afford(pool, reward) {
            return Err(ReferralError::InsufficientRewardPool);
        }

        trace_phase(Phase::Committing, &caller, &referee);
        let edge = self.graph.try_link(caller, referee)?;
        if !ledger.transfer(&caller, reward) {
            let reverted = self.graph.revert_link(&edge);
            debug_assert!(reverted, "freshly committed edge must be revertible");
            return Err(ReferralError::RewardTransferFailed);
        }

        trace_phase(Phase::Succeeded, &caller, &referee);
        self.events.push(ReferralEvent::ReferralCreated {
            referrer: caller,
            referee,
            reward,
            sequence: edge.sequence,
        });
        Ok(ReferralReceipt { edge, reward })
    }

    pub fn get_referrals(&self, account: &Account) -> Vec<Account> {
        self.graph.referrals_of(account).to_vec()
    }

    pub fn get_referrer(&self, account: &Account) -> Option<Account> {
        self.graph.parent_of(account)
    }

    pub fn pool_balance<L: TokenLedger>(&self, ledger: &L) -> Amount {
        ledger.balance_of(&self.account)
    }
}

fn trace_phase(phase: Phase, caller: &Account, referee: &Account) {
    tracing::debug!(%phase, referrer = %caller, %referee, "create_referral");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerState, TokenMetadata, TOKEN_DECIMALS, TOKEN_SCALE};

    const REWARD: Amount = 10 * TOKEN_SCALE;

    fn acct(byte: u8) -> Account {
        Account::new([byte; 20])
    }

    fn setup(pool: Amount) -> (ReferralPlatform, LedgerState) {
        let deployer = acct(0xd0);
        let platform = ReferralPlatform::deploy(&deployer, RewardPolicy::new(REWARD));
        let mut ledger = LedgerState::new(TokenMetadata {
            name: "RiferoToken".into(),
            symbol: "RFT".into(),
            decimals: TOKEN_DECIMALS,
        });
        ledger.mint(&deployer, 1_000_000 * TOKEN_SCALE).unwrap();
        if pool > 0 {
            ledger
                .transfer_between(&deployer, platform.account(), pool)
                .unwrap();
        }
        (platform, ledger)
    }

    fn refer(
        platform: &mut ReferralPlatform,
        ledger: &mut LedgerState,
        caller: Account,
        referee: Account,
    ) -> Result<ReferralReceipt, ReferralError> {
        let mut session = ledger.session(*platform.account());
        platform.create_referral(&mut session, caller, referee)
    }

    /// Ledger whose transfers always fail even though the pool looks funded.
    struct RefusingLedger;

    impl TokenLedger for RefusingLedger {
        fn balance_of(&self, _account: &Account) -> Amount {
            Amount::MAX
        }

        fn transfer(&mut self, _to: &Account, _amount: Amount) -> bool {
            false
        }
    }

    #[test]
    fn referral_records_edge_and_pays_referrer() {
        let (mut platform, mut ledger) = setup(100 * TOKEN_SCALE);
        let receipt = refer(&mut platform, &mut ledger, acct(1), acct(2)).unwrap();
        assert_eq!(receipt.reward, REWARD);
        assert_eq!(platform.get_referrals(&acct(1)), vec![acct(2)]);
        assert_eq!(platform.get_referrer(&acct(2)), Some(acct(1)));
        assert_eq!(ledger.balance(&acct(1)), REWARD);
        assert_eq!(ledger.balance(platform.account()), 90 * TOKEN_SCALE);
        assert_eq!(platform.events().len(), 1);
    }

    #[test]
    fn rewards_accumulate_per_referral() {
        let (mut platform, mut ledger) = setup(100 * TOKEN_SCALE);
        for referee in 2..7 {
            refer(&mut platform, &mut ledger, acct(1), acct(referee)).unwrap();
        }
        assert_eq!(ledger.balance(&acct(1)), 5 * REWARD);
        assert_eq!(
            platform.get_referrals(&acct(1)),
            vec![acct(2), acct(3), acct(4), acct(5), acct(6)]
        );
    }

    #[test]
    fn zero_referee_is_invalid() {
        let (mut platform, mut ledger) = setup(100 * TOKEN_SCALE);
        assert_eq!(
            refer(&mut platform, &mut ledger, acct(1), Account::ZERO).unwrap_err(),
            ReferralError::InvalidAccount
        );
        assert_eq!(ledger.balance(&acct(1)), 0);
    }

    #[test]
    fn graph_errors_surface_verbatim() {
        let (mut platform, mut ledger) = setup(100 * TOKEN_SCALE);
        refer(&mut platform, &mut ledger, acct(1), acct(2)).unwrap();
        refer(&mut platform, &mut ledger, acct(2), acct(3)).unwrap();
        assert_eq!(
            refer(&mut platform, &mut ledger, acct(4), acct(4)).unwrap_err(),
            ReferralError::SelfReference
        );
        assert_eq!(
            refer(&mut platform, &mut ledger, acct(2), acct(1)).unwrap_err(),
            ReferralError::CircularReferral
        );
        assert_eq!(
            refer(&mut platform, &mut ledger, acct(3), acct(1)).unwrap_err(),
            ReferralError::CircularReferral
        );
        assert_eq!(
            refer(&mut platform, &mut ledger, acct(5), acct(2)).unwrap_err(),
            ReferralError::AlreadyReferred
        );
        assert_eq!(ledger.balance(&acct(1)), REWARD);
        assert_eq!(ledger.balance(&acct(2)), REWARD);
        assert_eq!(ledger.balance(&acct(3)), 0);
        assert_eq!(ledger.balance(&acct(5)), 0);
    }

    #[test]
    fn graph_errors_take_precedence_over_empty_pool() {
        let (mut platform, mut ledger) = setup(0);
        assert_eq!(
            refer(&mut platform, &mut ledger, acct(1), acct(1)).unwrap_err(),
            ReferralError::SelfReference
        );
    }

    #[test]
    fn insufficient_pool_leaves_graph_untouched() {
        let (mut platform, mut ledger) = setup(REWARD - 1);
        assert_eq!(
            refer(&mut platform, &mut ledger, acct(1), acct(2)).unwrap_err(),
            ReferralError::InsufficientRewardPool
        );
        assert_eq!(platform.get_referrer(&acct(2)), None);
        assert!(platform.get_referrals(&acct(1)).is_empty());
        assert_eq!(ledger.balance(platform.account()), REWARD - 1);
    }

    #[test]
    fn pool_drains_exactly() {
        let (mut platform, mut ledger) = setup(2 * REWARD);
        refer(&mut platform, &mut ledger, acct(1), acct(2)).unwrap();
        refer(&mut platform, &mut ledger, acct(1), acct(3)).unwrap();
        assert_eq!(
            refer(&mut platform, &mut ledger, acct(1), acct(4)).unwrap_err(),
            ReferralError::InsufficientRewardPool
        );
        assert_eq!(platform.pool_balance(&ledger.session(*platform.account())), 0);
        assert_eq!(platform.get_referrer(&acct(4)), None);
    }

    #[test]
    fn refused_transfer_rolls_back_the_edge() {
        let mut platform = ReferralPlatform::new(acct(0xee), RewardPolicy::new(REWARD));
        let mut ledger = RefusingLedger;
        assert_eq!(
            platform
                .create_referral(&mut ledger, acct(1), acct(2))
                .unwrap_err(),
            ReferralError::RewardTransferFailed
        );
        assert_eq!(platform.get_referrer(&acct(2)), None);
        assert!(platform.graph().is_empty());
        assert!(platform.events().is_empty());
    }

    #[test]
    fn platform_account_is_derived_from_deployer() {
        let a = ReferralPlatform::deploy(&acct(1), RewardPolicy::new(1));
        let b = ReferralPlatform::deploy(&acct(1), RewardPolicy::new(1));
        let c = ReferralPlatform::deploy(&acct(2), RewardPolicy::new(1));
        assert_eq!(a.account(), b.account());
        assert_ne!(a.account(), c.account());
    }
}
