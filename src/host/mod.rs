//! Local stand-in for the hosting ledger.
//!
//! The host owns the whole world state (token ledger, referral platform and
//! per-account nonces) behind one mutex, so every call runs as a single
//! serialised all-or-nothing transaction. It authenticates callers from
//! signed calls, issues receipts and persists state as JSON.
//!
//! Across processes, [`Host::transact`] serialises load, execute and save on
//! one state file through an advisory lock on a `<state>.lock` sidecar.

use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::account::Account;
use crate::config::PlatformConfig;
use crate::contracts::{ReferralPlatform, ReferralReceipt};
use crate::ledger::{Amount, LedgerError, LedgerState, TokenMetadata, MAX_DECIMALS};
use crate::referral::{ReferralEdge, RewardPolicy};

mod call;

pub use call::{CallError, CallPayload, PlatformCall, SignedCall};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("call rejected before execution: {0}")]
    Call(#[from] CallError),
    #[error("nonce mismatch for {account}: expected {expected}, got {actual}")]
    NonceMismatch {
        account: Account,
        expected: u64,
        actual: u64,
    },
    #[error("genesis failed: {0}")]
    Genesis(#[from] LedgerError),
    #[error("state lock poisoned")]
    Poisoned,
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("state encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("state root mismatch: stored {stored}, computed {computed}")]
    StateRootMismatch { stored: String, computed: String },
    #[error("inconsistent state: {0}")]
    InvalidState(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChainMeta {
    pub height: u64,
    #[serde(default, with = "serde_hex_opt")]
    pub previous_receipt: Option<[u8; 32]>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorldState {
    pub meta: ChainMeta,
    pub ledger: LedgerState,
    pub platform: ReferralPlatform,
    #[serde(default)]
    pub nonces: BTreeMap<Account, u64>,
}

impl WorldState {
    pub fn state_root(&self) -> [u8; 32] {
        compute_state_root(self)
    }

    /// Checks that a loaded state is usable: token decimals stay within
    /// `u128` range and balances add up to the minted supply.
    pub fn validate(&self) -> Result<(), HostError> {
        let decimals = self.ledger.decimals();
        if decimals > MAX_DECIMALS {
            return Err(HostError::InvalidState(format!(
                "token decimals {decimals} exceed {MAX_DECIMALS}"
            )));
        }
        let held = self
            .ledger
            .balances()
            .values()
            .try_fold(0u128, |acc, v| acc.checked_add(*v));
        if held != Some(self.ledger.total_supply()) {
            return Err(HostError::InvalidState(format!(
                "balances do not add up to total supply {}",
                self.ledger.total_supply()
            )));
        }
        Ok(())
    }
}

/// Exclusive advisory lock on a state file, held through a `<state>.lock`
/// sidecar. Released when dropped.
pub struct StateLock {
    _file: fs::File,
}

impl StateLock {
    /// Blocks until no other holder, in this or another process, has the lock.
    pub fn acquire(state_path: &Path) -> Result<Self, HostError> {
        let path = sidecar(state_path, "lock");
        ensure_parent(&path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| io_error(&path, source))?;
        file.lock_exclusive()
            .map_err(|source| io_error(&path, source))?;
        Ok(Self { _file: file })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorldSnapshot {
    #[serde(with = "serde_hex_array")]
    pub state_root: [u8; 32],
    pub world: WorldState,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptOutcome {
    Referral(ReferralReceipt),
    Transfer { to: Account, amount: Amount },
    Rejected { reason: String },
}

impl ReceiptOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, ReceiptOutcome::Rejected { .. })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    #[serde(with = "serde_hex_array")]
    pub call_digest: [u8; 32],
    pub caller: Account,
    pub nonce: u64,
    pub height: u64,
    pub outcome: ReceiptOutcome,
}

impl Receipt {
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.call_digest);
        hasher.update(self.caller.as_bytes());
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        hasher.update(serde_json::to_vec(&self.outcome).expect("outcome encode"));
        hasher.finalize().into()
    }
}

pub struct Host {
    state: Mutex<WorldState>,
}

impl Host {
    /// Deploys the token and the referral platform: the full supply goes to
    /// `deployer`, who then funds the reward pool.
    pub fn genesis(config: &PlatformConfig, deployer: Account) -> Result<Self, HostError> {
        let mut ledger = LedgerState::new(config.token.metadata());
        ledger.mint(&deployer, config.token.initial_supply)?;
        let platform =
            ReferralPlatform::deploy(&deployer, RewardPolicy::new(config.reward_per_referral));
        if config.initial_pool > 0 {
            ledger.transfer_between(&deployer, platform.account(), config.initial_pool)?;
        }
        tracing::info!(
            %deployer,
            platform = %platform.account(),
            token = %config.token.symbol,
            supply = config.token.initial_supply,
            pool = config.initial_pool,
            "genesis complete"
        );
        Ok(Self::from_state(WorldState {
            meta: ChainMeta::default(),
            ledger,
            platform,
            nonces: BTreeMap::new(),
        }))
    }

    pub fn from_state(state: WorldState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, WorldState>, HostError> {
        self.state.lock().map_err(|_| HostError::Poisoned)
    }

    /// Runs one signed call as a single transaction. Calls that fail
    /// verification or carry a stale nonce never touch state. Calls the
    /// platform rejects still consume the nonce and yield a rejected receipt.
    pub fn execute(&self, call: &SignedCall) -> Result<Receipt, HostError> {
        let caller = call.verify()?;
        let mut state = self.lock()?;
        let expected = state.nonces.get(&caller).copied().unwrap_or(0);
        if call.payload.nonce != expected {
            return Err(HostError::NonceMismatch {
                account: caller,
                expected,
                actual: call.payload.nonce,
            });
        }

        let WorldState {
            ledger, platform, ..
        } = &mut *state;
        let outcome = match &call.payload.call {
            PlatformCall::CreateReferral { referee } => {
                let mut session = ledger.session(*platform.account());
                match platform.create_referral(&mut session, caller, *referee) {
                    Ok(receipt) => ReceiptOutcome::Referral(receipt),
                    Err(err) => ReceiptOutcome::Rejected {
                        reason: err.to_string(),
                    },
                }
            }
            PlatformCall::Transfer { to, amount } => {
                match ledger.transfer_between(&caller, to, *amount) {
                    Ok(()) => ReceiptOutcome::Transfer {
                        to: *to,
                        amount: *amount,
                    },
                    Err(err) => ReceiptOutcome::Rejected {
                        reason: err.to_string(),
                    },
                }
            }
        };

        state.nonces.insert(caller, expected + 1);
        state.meta.height += 1;
        let receipt = Receipt {
            call_digest: call.digest(),
            caller,
            nonce: expected,
            height: state.meta.height,
            outcome,
        };
        state.meta.previous_receipt = Some(receipt.digest());
        tracing::debug!(
            %caller,
            height = receipt.height,
            accepted = receipt.outcome.is_accepted(),
            "call executed"
        );
        Ok(receipt)
    }

    pub fn next_nonce(&self, account: &Account) -> Result<u64, HostError> {
        Ok(self.lock()?.nonces.get(account).copied().unwrap_or(0))
    }

    pub fn referrals(&self, account: &Account) -> Result<Vec<Account>, HostError> {
        Ok(self.lock()?.platform.get_referrals(account))
    }

    pub fn referrer(&self, account: &Account) -> Result<Option<Account>, HostError> {
        Ok(self.lock()?.platform.get_referrer(account))
    }

    pub fn balance(&self, account: &Account) -> Result<Amount, HostError> {
        Ok(self.lock()?.ledger.balance(account))
    }

    pub fn pool_balance(&self) -> Result<Amount, HostError> {
        let state = self.lock()?;
        Ok(state.ledger.balance(state.platform.account()))
    }

    pub fn platform_account(&self) -> Result<Account, HostError> {
        Ok(*self.lock()?.platform.account())
    }

    pub fn token(&self) -> Result<TokenMetadata, HostError> {
        Ok(self.lock()?.ledger.metadata().clone())
    }

    pub fn snapshot(&self) -> Result<WorldSnapshot, HostError> {
        let state = self.lock()?;
        Ok(WorldSnapshot {
            state_root: state.state_root(),
            world: state.clone(),
        })
    }

    /// Writes the snapshot to a temp file, syncs it and renames it over `path`,
    /// so readers only ever see a complete snapshot.
    pub fn save(&self, path: &Path) -> Result<(), HostError> {
        let snapshot = self.snapshot()?;
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        ensure_parent(path)?;
        atomic_write(path, &bytes).map_err(|source| io_error(path, source))?;
        tracing::info!(
            path = %path.display(),
            height = snapshot.world.meta.height,
            root = %hex::encode(snapshot.state_root),
            "state saved"
        );
        Ok(())
    }

    /// Loads a snapshot, replaying the referral edges and checking the state root.
    pub fn load(path: &Path) -> Result<Self, HostError> {
        let bytes = fs::read(path).map_err(|source| io_error(path, source))?;
        let snapshot: WorldSnapshot = serde_json::from_slice(&bytes)?;
        let computed = snapshot.world.state_root();
        if computed != snapshot.state_root {
            return Err(HostError::StateRootMismatch {
                stored: hex::encode(snapshot.state_root),
                computed: hex::encode(computed),
            });
        }
        snapshot.world.validate()?;
        tracing::info!(
            path = %path.display(),
            height = snapshot.world.meta.height,
            "state loaded"
        );
        Ok(Self::from_state(snapshot.world))
    }

    /// Loads the state at `path`, runs `f` and saves the result, all while
    /// holding the state lock. `f` failing leaves the file untouched.
    pub fn transact<R>(
        path: &Path,
        f: impl FnOnce(&Host) -> Result<R, HostError>,
    ) -> Result<R, HostError> {
        let _lock = StateLock::acquire(path)?;
        let host = Host::load(path)?;
        let out = f(&host)?;
        host.save(path)?;
        Ok(out)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> HostError {
    HostError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// `state.json` -> `state.json.<suffix>`
fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn ensure_parent(path: &Path) -> Result<(), HostError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|source| io_error(parent, source))
        }
        _ => Ok(()),
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = sidecar(path, "tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    // directory sync makes the rename durable on POSIX
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Ok(dir) = fs::File::open(dir) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

fn compute_state_root(world: &WorldState) -> [u8; 32] {
    let balances = world.ledger.balances();
    let edges: &[ReferralEdge] = world.platform.graph().edges();
    let mut leaves: Vec<[u8; 32]> =
        Vec::with_capacity(1 + balances.len() + edges.len() + world.nonces.len());

    let token = world.ledger.metadata();
    let mut hasher = Sha256::new();
    hasher.update(b"meta");
    hasher.update(world.meta.height.to_le_bytes());
    hasher.update(world.meta.previous_receipt.unwrap_or([0u8; 32]));
    hasher.update((token.name.len() as u64).to_le_bytes());
    hasher.update(token.name.as_bytes());
    hasher.update((token.symbol.len() as u64).to_le_bytes());
    hasher.update(token.symbol.as_bytes());
    hasher.update([token.decimals]);
    hasher.update(world.ledger.total_supply().to_le_bytes());
    hasher.update(world.platform.account().as_bytes());
    hasher.update(world.platform.reward_per_referral().to_le_bytes());
    leaves.push(hasher.finalize().into());

    for (account, balance) in balances {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(account.as_bytes());
        hasher.update(balance.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for edge in edges {
        let mut hasher = Sha256::new();
        hasher.update(b"edge");
        hasher.update(edge.referrer.as_bytes());
        hasher.update(edge.referee.as_bytes());
        hasher.update(edge.sequence.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (account, nonce) in &world.nonces {
        let mut hasher = Sha256::new();
        hasher.update(b"nonce");
        hasher.update(account.as_bytes());
        hasher.update(nonce.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"rifero-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

pub(crate) mod serde_hex {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}

mod serde_hex_array {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let mut out = [0u8; 32];
        hex::decode_to_slice(&encoded, &mut out).map_err(D::Error::custom)?;
        Ok(out)
    }
}

mod serde_hex_opt {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<[u8; 32]>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(encoded) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let mut out = [0u8; 32];
        hex::decode_to_slice(&encoded, &mut out).map_err(D::Error::custom)?;
        Ok(Some(out))
    }
}
