//! Referral relationships and the reward schedule attached to them.

mod graph;
mod policy;

pub use graph::{AncestorChain, GraphError, ReferralEdge, ReferralGraph};
pub use policy::RewardPolicy;
