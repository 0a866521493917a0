use serde::{Deserialize, Serialize};

use crate::ledger::Amount;

use super::ReferralEdge;

/// Flat reward schedule: every accepted referral pays the referrer the same
/// amount, whatever the depth of the tree.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardPolicy {
    reward_per_referral: Amount,
}

impl RewardPolicy {
    pub fn new(reward_per_referral: Amount) -> Self {
        Self {
            reward_per_referral,
        }
    }

    pub fn reward_per_referral(&self) -> Amount {
        self.reward_per_referral
    }

    pub fn reward_for(&self, _edge: &ReferralEdge) -> Amount {
        self.reward_per_referral
    }

    pub fn can_afford(pool_balance: Amount, amount: Amount) -> bool {
        pool_balance >= amount
    }
}
