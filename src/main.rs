use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tracing_subscriber::EnvFilter;

use rifero::{
    host::{CallPayload, PlatformCall, SignedCall, StateLock},
    ledger::{format_units, parse_units},
    Account, Host, PlatformConfig,
};

/// Referral registry with flat token rewards, backed by a local ledger host.
#[derive(Parser, Debug)]
#[command(name = "rifero", author, version, about, long_about = None)]
struct Cli {
    /// World state file
    #[arg(long, default_value = "rifero_state.json", env = "RIFERO_STATE", global = true)]
    state: PathBuf,

    /// Deployment config (JSON); defaults are used when absent
    #[arg(long, env = "RIFERO_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy the token and the referral platform, funding the reward pool
    Init {
        /// Deployer secret key (32 bytes hex)
        #[arg(long, env = "RIFERO_SK_HEX")]
        sk_hex: String,
        /// Overwrite an existing state file
        #[arg(long)]
        force: bool,
    },
    /// Generate an Ed25519 keypair and print its account
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Print the account controlled by a secret key
    Address {
        #[arg(long, env = "RIFERO_SK_HEX")]
        sk_hex: String,
    },
    /// Refer a new account as the signer
    Refer {
        #[arg(long, env = "RIFERO_SK_HEX")]
        sk_hex: String,
        referee: Account,
    },
    /// Send tokens from the signer
    Transfer {
        #[arg(long, env = "RIFERO_SK_HEX")]
        sk_hex: String,
        #[arg(long)]
        to: Account,
        /// Decimal token amount, e.g. 12.5
        #[arg(long)]
        amount: String,
    },
    /// List accounts referred by ACCOUNT, oldest first
    Referrals { account: Account },
    /// Show who referred ACCOUNT
    Referrer { account: Account },
    /// Token balance of ACCOUNT
    Balance { account: Account },
    /// Remaining reward pool
    Pool,
    /// Dump the world snapshot as JSON
    Snapshot,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Init { sk_hex, force } => {
            init_cmd(&cli.state, cli.config.as_deref(), &sk_hex, force)
        }
        Command::Keygen { out_dir } => keygen_cmd(&out_dir),
        Command::Address { sk_hex } => {
            let sk = signing_key(&sk_hex)?;
            println!("{}", Account::from_verifying_key(&sk.verifying_key()));
            Ok(())
        }
        Command::Refer { sk_hex, referee } => {
            submit(&cli.state, &sk_hex, PlatformCall::CreateReferral { referee })
        }
        Command::Transfer { sk_hex, to, amount } => {
            let host = Host::load(&cli.state)?;
            let decimals = host.token()?.decimals;
            let amount = parse_units(&amount, decimals).context("invalid --amount")?;
            drop(host);
            submit(&cli.state, &sk_hex, PlatformCall::Transfer { to, amount })
        }
        Command::Referrals { account } => {
            let host = Host::load(&cli.state)?;
            let referrals = host.referrals(&account)?;
            if referrals.is_empty() {
                println!("No referrals yet");
            }
            for referee in referrals {
                println!("{referee}");
            }
            Ok(())
        }
        Command::Referrer { account } => {
            let host = Host::load(&cli.state)?;
            match host.referrer(&account)? {
                Some(referrer) => println!("{referrer}"),
                None => println!("none"),
            }
            Ok(())
        }
        Command::Balance { account } => {
            let host = Host::load(&cli.state)?;
            let token = host.token()?;
            let balance = host.balance(&account)?;
            println!("{} {}", format_units(balance, token.decimals), token.symbol);
            Ok(())
        }
        Command::Pool => {
            let host = Host::load(&cli.state)?;
            let token = host.token()?;
            println!(
                "{} {} held by {}",
                format_units(host.pool_balance()?, token.decimals),
                token.symbol,
                host.platform_account()?
            );
            Ok(())
        }
        Command::Snapshot => {
            let host = Host::load(&cli.state)?;
            println!("{}", serde_json::to_string_pretty(&host.snapshot()?)?);
            Ok(())
        }
    }
}

fn signing_key(sk_hex: &str) -> Result<SigningKey> {
    let bytes = hex::decode(sk_hex.trim()).context("secret key is not valid hex")?;
    let raw: [u8; 32] = match bytes.as_slice().try_into() {
        Ok(raw) => raw,
        Err(_) => bail!("secret key must be 32 bytes (64 hex chars), got {}", bytes.len()),
    };
    Ok(SigningKey::from_bytes(&raw))
}

fn init_cmd(state: &Path, config: Option<&Path>, sk_hex: &str, force: bool) -> Result<()> {
    let _lock = StateLock::acquire(state)?;
    if state.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", state.display());
    }
    let config = PlatformConfig::load_or_default(config)?;
    let deployer = Account::from_verifying_key(&signing_key(sk_hex)?.verifying_key());
    let host = Host::genesis(&config, deployer)?;
    host.save(state)?;
    println!("Deployed platform {} → {}", host.platform_account()?, state.display());
    Ok(())
}

fn keygen_cmd(out_dir: &Path) -> Result<()> {
    let sk = SigningKey::generate(&mut OsRng);
    fs::create_dir_all(out_dir).with_context(|| format!("mkdir {}", out_dir.display()))?;
    fs::write(out_dir.join("secret.hex"), hex::encode(sk.to_bytes()))?;
    fs::write(
        out_dir.join("public.hex"),
        hex::encode(sk.verifying_key().to_bytes()),
    )?;
    println!("{}", Account::from_verifying_key(&sk.verifying_key()));
    Ok(())
}

fn submit(state: &Path, sk_hex: &str, call: PlatformCall) -> Result<()> {
    let sk = signing_key(sk_hex)?;
    let caller = Account::from_verifying_key(&sk.verifying_key());
    let receipt = Host::transact(state, |host| {
        let nonce = host.next_nonce(&caller)?;
        host.execute(&SignedCall::sign(&sk, CallPayload { nonce, call }))
    })?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    if !receipt.outcome.is_accepted() {
        std::process::exit(1);
    }
    Ok(())
}
