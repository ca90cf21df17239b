//! SkillForge escrow CLI
//!
//! Builds the unsigned escrow transactions for tutoring sessions and keeps
//! the session and escrow records in a local JSON store.

use clap::{Parser, Subcommand};
use skillforge_escrow::cli::{self, AppState, CliResult};
use skillforge_escrow::config::AppConfig;
use skillforge_escrow::escrow::{InitEscrow, MintSessionToken, NewSession, Party};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "skillforge")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Escrow and session token transactions for SkillForge sessions", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "SKILLFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the session store
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Session operations
    Session {
        #[command(subcommand)]
        action: SessionCommands,
    },

    /// Escrow operations
    Escrow {
        #[command(subcommand)]
        action: EscrowCommands,
    },

    /// Proof-of-session token
    Nft {
        #[command(subcommand)]
        action: NftCommands,
    },

    /// Store maintenance
    Store {
        #[command(subcommand)]
        action: StoreCommands,
    },

    /// Address utilities
    Address {
        #[command(subcommand)]
        action: AddressCommands,
    },

    /// Datum utilities
    Datum {
        #[command(subcommand)]
        action: DatumCommands,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Create a new session
    Create {
        #[arg(long)]
        learner: String,

        /// Mentor offering the session
        #[arg(long)]
        provider: String,

        #[arg(long)]
        skill: String,

        /// Session budget in lovelace
        #[arg(long)]
        budget: u64,

        /// Duration in minutes
        #[arg(long)]
        duration: Option<u32>,
    },

    /// Show a session
    Show {
        #[arg(short, long)]
        session: Uuid,
    },

    /// List all sessions
    List,
}

#[derive(Subcommand)]
enum EscrowCommands {
    /// Build the transaction locking the session price
    Init {
        #[arg(short, long)]
        session: Uuid,

        #[arg(long)]
        learner_address: String,

        #[arg(long)]
        mentor_address: String,

        /// Price in lovelace
        #[arg(long)]
        price: u64,
    },

    /// Record the submitted lock transaction
    Confirm {
        #[arg(short, long)]
        session: Uuid,

        #[arg(long)]
        tx_id: String,

        /// Lock output as `txhash#index`, defaults to output 0
        #[arg(long)]
        utxo: Option<String>,
    },

    /// Show escrow status
    Status {
        #[arg(short, long)]
        session: Uuid,
    },

    /// Build an attestation for the learner or the mentor
    Attest {
        #[arg(short, long)]
        session: Uuid,

        /// `learner` or `mentor`
        #[arg(short, long)]
        party: Party,
    },

    /// Build the claim paying out the escrow
    Claim {
        #[arg(short, long)]
        session: Uuid,
    },

    /// Build the refund returning the escrow to the learner
    Refund {
        #[arg(short, long)]
        session: Uuid,
    },

    /// Record a submitted attest, claim or refund
    ConfirmSpend {
        #[arg(short, long)]
        session: Uuid,

        #[arg(long)]
        tx_id: String,
    },

    /// Drop a built spend that will not be submitted
    Abandon {
        #[arg(short, long)]
        session: Uuid,
    },
}

#[derive(Subcommand)]
enum NftCommands {
    /// Build the session token mint
    Mint {
        #[arg(short, long)]
        session: Uuid,

        /// Wallet paying for and receiving the token
        #[arg(long)]
        recipient: String,

        #[arg(long)]
        image_cid: Option<String>,

        #[arg(long)]
        metadata_cid: Option<String>,
    },

    /// Record the submitted mint
    Confirm {
        #[arg(short, long)]
        session: Uuid,

        #[arg(long)]
        tx_id: String,
    },
}

#[derive(Subcommand)]
enum StoreCommands {
    /// Show store statistics
    Stats,

    /// Restore a backup
    Restore {
        #[arg(short, long, default_value = "0")]
        index: usize,
    },
}

#[derive(Subcommand)]
enum AddressCommands {
    /// Decode a bech32 address
    Inspect { address: String },
}

#[derive(Subcommand)]
enum DatumCommands {
    /// Decode a hex-encoded datum
    Decode { cbor_hex: String },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Offline commands don't need configuration or a runtime
    match &cli.command {
        Commands::Address {
            action: AddressCommands::Inspect { address },
        } => return cli::cmd_address_inspect(address),
        Commands::Datum {
            action: DatumCommands::Decode { cbor_hex },
        } => return cli::cmd_datum_decode(cbor_hex),
        _ => {}
    }

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config, cli.command))
}

async fn run(config: AppConfig, command: Commands) -> CliResult<()> {
    let state = AppState::new(config).await?;

    match command {
        Commands::Address { .. } | Commands::Datum { .. } => unreachable!(),

        Commands::Session { action } => match action {
            SessionCommands::Create {
                learner,
                provider,
                skill,
                budget,
                duration,
            } => {
                let request = NewSession {
                    learner_id: learner,
                    provider_id: provider,
                    skill,
                    budget_lovelace: budget,
                    duration_minutes: duration,
                };
                cli::cmd_session_create(&state, request).await?;
            }
            SessionCommands::Show { session } => {
                cli::cmd_session_show(&state, session).await?;
            }
            SessionCommands::List => {
                cli::cmd_session_list(&state).await?;
            }
        },

        Commands::Escrow { action } => match action {
            EscrowCommands::Init {
                session,
                learner_address,
                mentor_address,
                price,
            } => {
                let request = InitEscrow {
                    session_id: session,
                    learner_address,
                    mentor_address,
                    price_lovelace: price,
                };
                cli::cmd_escrow_init(&state, request).await?;
            }
            EscrowCommands::Confirm {
                session,
                tx_id,
                utxo,
            } => {
                cli::cmd_escrow_confirm(&state, session, &tx_id, utxo.as_deref()).await?;
            }
            EscrowCommands::Status { session } => {
                cli::cmd_escrow_status(&state, session).await?;
            }
            EscrowCommands::Attest { session, party } => {
                cli::cmd_escrow_attest(&state, session, party).await?;
            }
            EscrowCommands::Claim { session } => {
                cli::cmd_escrow_claim(&state, session).await?;
            }
            EscrowCommands::Refund { session } => {
                cli::cmd_escrow_refund(&state, session).await?;
            }
            EscrowCommands::ConfirmSpend { session, tx_id } => {
                cli::cmd_escrow_confirm_spend(&state, session, &tx_id).await?;
            }
            EscrowCommands::Abandon { session } => {
                cli::cmd_escrow_abandon(&state, session).await?;
            }
        },

        Commands::Nft { action } => match action {
            NftCommands::Mint {
                session,
                recipient,
                image_cid,
                metadata_cid,
            } => {
                let request = MintSessionToken {
                    session_id: session,
                    recipient_address: recipient,
                    image_cid,
                    metadata_cid,
                };
                cli::cmd_nft_mint(&state, request).await?;
            }
            NftCommands::Confirm { session, tx_id } => {
                cli::cmd_nft_confirm(&state, session, &tx_id).await?;
            }
        },

        Commands::Store { action } => match action {
            StoreCommands::Stats => {
                cli::cmd_store_stats(&state).await?;
            }
            StoreCommands::Restore { index } => {
                cli::cmd_store_restore(&state, index).await?;
            }
        },
    }

    Ok(())
}
