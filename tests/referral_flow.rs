use std::{sync::Arc, thread};

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use rifero::{
    host::{CallPayload, PlatformCall, SignedCall},
    ledger::TOKEN_SCALE,
    Account, Host, PlatformConfig, ReceiptOutcome,
};

const REWARD: u128 = 10 * TOKEN_SCALE;

struct Wallet {
    key: SigningKey,
}

impl Wallet {
    fn random() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    fn account(&self) -> Account {
        Account::from_verifying_key(&self.key.verifying_key())
    }

    fn refer(&self, host: &Host, referee: &Wallet) -> ReceiptOutcome {
        self.refer_account(host, referee.account())
    }

    fn refer_account(&self, host: &Host, referee: Account) -> ReceiptOutcome {
        let nonce = host.next_nonce(&self.account()).unwrap();
        let call = SignedCall::sign(
            &self.key,
            CallPayload {
                nonce,
                call: PlatformCall::CreateReferral { referee },
            },
        );
        host.execute(&call).unwrap().outcome
    }
}

fn deploy(config: PlatformConfig) -> (Host, Wallet) {
    let owner = Wallet::random();
    let host = Host::genesis(&config, owner.account()).unwrap();
    (host, owner)
}

fn rejected(reason: &str) -> ReceiptOutcome {
    ReceiptOutcome::Rejected {
        reason: reason.to_string(),
    }
}

#[test]
fn single_referral_rewards_referrer() {
    let (host, _) = deploy(PlatformConfig::default());
    let (a, b) = (Wallet::random(), Wallet::random());
    assert!(a.refer(&host, &b).is_accepted());
    assert_eq!(host.referrals(&a.account()).unwrap(), vec![b.account()]);
    assert_eq!(host.referrer(&b.account()).unwrap(), Some(a.account()));
    assert_eq!(host.balance(&a.account()).unwrap(), REWARD);
}

#[test]
fn multiple_referrals_keep_order_and_accumulate() {
    let (host, _) = deploy(PlatformConfig::default());
    let (a, b, c) = (Wallet::random(), Wallet::random(), Wallet::random());
    assert!(a.refer(&host, &b).is_accepted());
    assert!(a.refer(&host, &c).is_accepted());
    assert_eq!(
        host.referrals(&a.account()).unwrap(),
        vec![b.account(), c.account()]
    );
    assert_eq!(host.balance(&a.account()).unwrap(), 2 * REWARD);
}

#[test]
fn referee_cannot_refer_their_referrer() {
    let (host, _) = deploy(PlatformConfig::default());
    let (a, b) = (Wallet::random(), Wallet::random());
    a.refer(&host, &b);
    assert_eq!(b.refer(&host, &a), rejected("cannot refer your referrer"));
    assert_eq!(host.balance(&b.account()).unwrap(), 0);
}

#[test]
fn three_step_cycle_is_rejected() {
    let (host, _) = deploy(PlatformConfig::default());
    let (a, b, c) = (Wallet::random(), Wallet::random(), Wallet::random());
    a.refer(&host, &b);
    b.refer(&host, &c);
    assert_eq!(c.refer(&host, &a), rejected("cannot refer your referrer"));
    assert_eq!(host.referrer(&a.account()).unwrap(), None);
}

#[test]
fn referee_has_only_one_referrer() {
    let (host, _) = deploy(PlatformConfig::default());
    let (a, b, c) = (Wallet::random(), Wallet::random(), Wallet::random());
    a.refer(&host, &b);
    assert_eq!(c.refer(&host, &b), rejected("already referred"));
    assert_eq!(a.refer(&host, &b), rejected("already referred"));
    assert_eq!(host.referrer(&b.account()).unwrap(), Some(a.account()));
}

#[test]
fn zero_referee_is_invalid() {
    let (host, _) = deploy(PlatformConfig::default());
    let a = Wallet::random();
    assert_eq!(
        a.refer_account(&host, Account::ZERO),
        rejected("invalid account")
    );
}

#[test]
fn exhausted_pool_leaves_referee_unlinked() {
    let config = PlatformConfig {
        initial_pool: REWARD,
        ..PlatformConfig::default()
    };
    let (host, _) = deploy(config);
    let (a, b, c) = (Wallet::random(), Wallet::random(), Wallet::random());
    assert!(a.refer(&host, &b).is_accepted());
    assert_eq!(a.refer(&host, &c), rejected("insufficient reward pool"));
    assert_eq!(host.referrer(&c.account()).unwrap(), None);
    assert_eq!(host.pool_balance().unwrap(), 0);
    assert_eq!(host.balance(&a.account()).unwrap(), REWARD);
}

#[test]
fn rewards_are_conserved() {
    let (host, owner) = deploy(PlatformConfig::default());
    let referrer = Wallet::random();
    let n = 7u128;
    for _ in 0..n {
        assert!(referrer.refer(&host, &Wallet::random()).is_accepted());
    }
    assert_eq!(host.balance(&referrer.account()).unwrap(), n * REWARD);
    assert_eq!(host.pool_balance().unwrap(), 100 * TOKEN_SCALE - n * REWARD);
    let total = host.balance(&owner.account()).unwrap()
        + host.pool_balance().unwrap()
        + host.balance(&referrer.account()).unwrap();
    assert_eq!(total, 1_000_000 * TOKEN_SCALE);
}

#[test]
fn racing_referrers_commit_exactly_once() {
    let (host, _) = deploy(PlatformConfig::default());
    let host = Arc::new(host);
    let referee = Wallet::random().account();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let host = Arc::clone(&host);
            thread::spawn(move || {
                let wallet = Wallet::random();
                (wallet.account(), wallet.refer_account(&host, referee))
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = outcomes
        .iter()
        .filter(|(_, outcome)| outcome.is_accepted())
        .collect();
    assert_eq!(winners.len(), 1);
    for (_, outcome) in outcomes.iter().filter(|(_, o)| !o.is_accepted()) {
        assert_eq!(*outcome, rejected("already referred"));
    }
    let winner = winners[0].0;
    assert_eq!(host.referrer(&referee).unwrap(), Some(winner));
    assert_eq!(host.balance(&winner).unwrap(), REWARD);
    assert_eq!(host.pool_balance().unwrap(), 100 * TOKEN_SCALE - REWARD);
}
