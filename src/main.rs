use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use aureon_ledger::{
    config::{LedgerConfig, DEFAULT_CONTRACTS_DIR, DEFAULT_STATE_FILE},
    contracts::DEFAULT_GAS_LIMIT,
    identity::{transfer_message, Address, MessagePolicy},
    ledger::{LedgerOperation, OperationReceipt, StakeRequest},
    request::{self, RequestError},
    wallet::{sign_message, Wallet},
    ServiceError,
};

//==================== CLI ====================//

#[derive(Parser, Debug)]
#[command(name = "aureon", version, about = "Aureon account ledger")]
struct Cli {
    /// Ledger snapshot file.
    #[arg(long, env = "AUREON_STATE", default_value = DEFAULT_STATE_FILE, global = true)]
    state: PathBuf,

    /// Directory for uploaded contract bytecode.
    #[arg(long, env = "AUREON_CONTRACTS", default_value = DEFAULT_CONTRACTS_DIR, global = true)]
    contracts_dir: PathBuf,

    /// `canonical` requires transfer messages of the form "transfer <amount> to <address>".
    #[arg(long, env = "AUREON_MESSAGE_POLICY", default_value_t = MessagePolicy::Canonical, global = true)]
    message_policy: MessagePolicy,

    /// More log output (-v info, -vv debug). AUREON_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Service status.
    Health,
    #[command(subcommand)]
    Wallet(WalletCommand),
    /// Sign a message with a base64 private key.
    Sign {
        #[arg(long)]
        private_key: String,
        #[arg(long)]
        message: String,
    },
    /// Print the message to sign for a transfer.
    TransferMessage {
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        to: Address,
    },
    Balance { address: Address },
    Staked { address: Address },
    /// Transfer from a JSON payload file, or `-` for stdin.
    Transfer { payload: PathBuf },
    Stake(StakeArgs),
    Unstake(StakeArgs),
    /// Mint into an address (setup only).
    Fund {
        #[arg(long)]
        address: Address,
        #[arg(long)]
        amount: u64,
    },
    #[command(subcommand)]
    Contract(ContractCommand),
}

#[derive(Subcommand, Debug)]
enum WalletCommand {
    New,
    Import {
        #[arg(long)]
        private_key: String,
    },
}

#[derive(Subcommand, Debug)]
enum ContractCommand {
    /// Upload bytecode; it is stored, never executed.
    Deploy {
        file: PathBuf,
        #[arg(long)]
        creator: String,
        #[arg(long, default_value_t = DEFAULT_GAS_LIMIT)]
        gas_limit: u64,
    },
}

#[derive(Args, Debug)]
struct StakeArgs {
    #[arg(long)]
    address: Address,
    #[arg(long, allow_negative_numbers = true)]
    amount: i64,
}

impl StakeArgs {
    fn into_request(self) -> StakeRequest {
        StakeRequest {
            address: self.address,
            amount: self.amount,
        }
    }
}

impl Cli {
    fn config(&self) -> LedgerConfig {
        LedgerConfig {
            state_path: self.state.clone(),
            contracts_dir: self.contracts_dir.clone(),
            message_policy: self.message_policy,
        }
    }
}

//==================== utils ====================//

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_env("AUREON_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn read_payload(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        io::stdin()
            .read_to_end(&mut buf)
            .context("read payload from stdin")?;
        return Ok(buf);
    }
    fs::read(path).with_context(|| format!("read payload {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_receipt(receipt: &OperationReceipt) -> Result<()> {
    let msg = match receipt {
        OperationReceipt::Transfer { .. } => "Transfer accepted",
        OperationReceipt::Stake { .. } => "Stake accepted",
        OperationReceipt::Unstake { .. } => "Unstake accepted",
    };
    print_json(&json!({ "msg": msg, "data": receipt }))
}

//==================== commands ====================//

fn execute(config: &LedgerConfig, operation: LedgerOperation) -> Result<()> {
    let ledger = config.open_ledger().context("open ledger")?;
    let receipt = ledger.execute(&operation)?;
    print_receipt(&receipt)
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.config();
    match cli.command {
        Command::Health => print_json(&json!({
            "status": "ok",
            "service": "Aureon ledger",
            "state": config.state_path,
            "message_policy": config.message_policy,
        })),
        Command::Wallet(WalletCommand::New) => print_json(&Wallet::generate()),
        Command::Wallet(WalletCommand::Import { private_key }) => {
            print_json(&Wallet::import(&private_key).context("import wallet")?)
        }
        Command::Sign {
            private_key,
            message,
        } => {
            let signature = sign_message(&private_key, message.as_bytes())?;
            print_json(&json!({ "message": message, "signature": signature }))
        }
        Command::TransferMessage { amount, to } => {
            println!("{}", transfer_message(amount, &to));
            Ok(())
        }
        Command::Balance { address } => {
            let ledger = config.open_ledger().context("open ledger")?;
            print_json(&json!({ "address": address, "balance": ledger.balance_of(&address) }))
        }
        Command::Staked { address } => {
            let ledger = config.open_ledger().context("open ledger")?;
            print_json(&json!({ "address": address, "staked": ledger.staked_of(&address) }))
        }
        Command::Transfer { payload } => {
            let body = read_payload(&payload)?;
            execute(&config, request::parse_transfer(&body)?)
        }
        Command::Stake(args) => execute(&config, LedgerOperation::Stake(args.into_request())),
        Command::Unstake(args) => execute(&config, LedgerOperation::Unstake(args.into_request())),
        Command::Fund { address, amount } => {
            let ledger = config.open_ledger().context("open ledger")?;
            let balance = ledger.fund(&address, amount)?;
            print_json(&json!({ "address": address, "balance": balance }))
        }
        Command::Contract(ContractCommand::Deploy {
            file,
            creator,
            gas_limit,
        }) => {
            let bytecode =
                fs::read(&file).with_context(|| format!("read contract {}", file.display()))?;
            let deployed = config
                .contract_store()
                .deploy(&bytecode, &creator, gas_limit)?;
            print_json(&deployed)
        }
    }
}

/// 2 for requests the ledger or the request parser refused, 1 for everything else.
fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<RequestError>().is_some()
        || matches!(
            err.downcast_ref::<ServiceError>(),
            Some(ServiceError::Rejected(_))
        )
    {
        2
    } else {
        1
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}
