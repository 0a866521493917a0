//! Fungible token ledger backing the referral reward pool.
//!
//! The referral program only depends on the [`TokenLedger`] boundary. The
//! [`LedgerState`] type is the in-memory token used by the local host and by
//! tests; it mirrors a fixed-supply token contract with 18 decimals.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::account::Account;

mod units;

pub use units::{format_units, parse_units, UnitsError};

pub type Amount = u128;

pub const TOKEN_DECIMALS: u8 = 18;
pub const TOKEN_SCALE: Amount = 1_000_000_000_000_000_000; // 1 token = 1e18 minimal units
/// Largest decimals value whose scale `10^decimals` fits in an [`Amount`].
pub const MAX_DECIMALS: u8 = 38;

/// Balance boundary consumed by the referral program.
///
/// A value implementing this trait is bound to one holder account; `transfer`
/// always debits that holder.
pub trait TokenLedger {
    fn balance_of(&self, account: &Account) -> Amount;

    /// Moves `amount` from the bound holder to `to`. Returns `false` and
    /// changes nothing when the move is impossible.
    fn transfer(&mut self, to: &Account, amount: Amount) -> bool;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient funds in account {account}: needed {needed}, available {available}")]
    InsufficientFunds {
        account: Account,
        needed: Amount,
        available: Amount,
    },
    #[error("balance overflow for account {account}")]
    Overflow { account: Account },
    #[error("token supply already minted")]
    AlreadyMinted,
    #[error("zero account cannot send or receive tokens")]
    ZeroAccount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    Mint {
        to: Account,
        amount: Amount,
    },
    Transfer {
        from: Account,
        to: Account,
        amount: Amount,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerState {
    metadata: TokenMetadata,
    total_supply: Amount,
    minted: bool,
    balances: BTreeMap<Account, Amount>,
    #[serde(default)]
    events: Vec<LedgerEvent>,
}

impl LedgerState {
    pub fn new(metadata: TokenMetadata) -> Self {
        Self {
            metadata,
            total_supply: 0,
            minted: false,
            balances: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn metadata(&self) -> &TokenMetadata {
        &self.metadata
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn symbol(&self) -> &str {
        &self.metadata.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.metadata.decimals
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn balance(&self, account: &Account) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> &BTreeMap<Account, Amount> {
        &self.balances
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// Issues the whole fixed supply to `to`. Only allowed once.
    pub fn mint(&mut self, to: &Account, amount: Amount) -> Result<(), LedgerError> {
        if self.minted {
            return Err(LedgerError::AlreadyMinted);
        }
        if to.is_zero() {
            return Err(LedgerError::ZeroAccount);
        }
        self.credit_account(to, amount)?;
        self.total_supply = amount;
        self.minted = true;
        self.events.push(LedgerEvent::Mint { to: *to, amount });
        Ok(())
    }

    fn credit_account(&mut self, account: &Account, amount: Amount) -> Result<(), LedgerError> {
        let balance = self.balances.entry(*account).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { account: *account })?;
        Ok(())
    }

    /// Moves tokens between two accounts. Either both balances change or neither does.
    pub fn transfer_between(
        &mut self,
        from: &Account,
        to: &Account,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if from.is_zero() || to.is_zero() {
            return Err(LedgerError::ZeroAccount);
        }
        let available = self.balance(from);
        let remaining = available
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientFunds {
                account: *from,
                needed: amount,
                available,
            })?;
        if from != to {
            let credited = self
                .balance(to)
                .checked_add(amount)
                .ok_or(LedgerError::Overflow { account: *to })?;
            self.balances.insert(*from, remaining);
            self.balances.insert(*to, credited);
        }
        self.events.push(LedgerEvent::Transfer {
            from: *from,
            to: *to,
            amount,
        });
        Ok(())
    }

    /// Binds the ledger to `holder` so it can be handed to code that only
    /// speaks [`TokenLedger`].
    pub fn session(&mut self, holder: Account) -> LedgerSession<'_> {
        LedgerSession {
            ledger: self,
            holder,
        }
    }
}

pub struct LedgerSession<'a> {
    ledger: &'a mut LedgerState,
    holder: Account,
}

impl LedgerSession<'_> {
    pub fn holder(&self) -> &Account {
        &self.holder
    }
}

impl TokenLedger for LedgerSession<'_> {
    fn balance_of(&self, account: &Account) -> Amount {
        self.ledger.balance(account)
    }

    fn transfer(&mut self, to: &Account, amount: Amount) -> bool {
        match self.ledger.transfer_between(&self.holder, to, amount) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(holder = %self.holder, %to, amount, %err, "token transfer refused");
                false
            }
        }
    }
}
