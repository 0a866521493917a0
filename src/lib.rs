//! Rifero: a referral registry with flat token rewards.
//!
//! * [`referral`]: the append-only referral forest and the reward schedule.
//! * [`contracts`]: the platform program that validates, pays and commits a
//!   referral as one atomic step.
//! * [`ledger`]: the token ledger boundary and its in-memory implementation.
//! * [`host`]: a local ledger host that authenticates signed calls,
//!   serialises execution and persists world state.
//! * [`config`]: deployment parameters.

pub mod account;
pub mod config;
pub mod contracts;
pub mod host;
pub mod ledger;
pub mod referral;

pub use account::{Account, AccountParseError};
pub use config::{ConfigError, PlatformConfig};
pub use contracts::{ReferralError, ReferralPlatform, ReferralReceipt};
pub use host::{Host, HostError, Receipt, ReceiptOutcome};
pub use ledger::{Amount, LedgerState, TokenLedger};
pub use referral::{GraphError, ReferralEdge, ReferralGraph, RewardPolicy};
