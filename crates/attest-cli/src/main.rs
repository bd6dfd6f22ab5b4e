use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{keys, order};

#[derive(Parser)]
#[command(name = "attest")]
#[command(about = "Attestation order service CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> deployment -> local ...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Attestation order commands (Postgres-backed)
    Order {
        #[command(subcommand)]
        cmd: OrderCmd,
    },

    /// Generate an ed25519 signing key and print its address
    Keygen,

    /// Produce a (signed-message:...) block for the verification flow
    Sign {
        /// 32-byte ed25519 secret key, hex
        #[arg(long = "secret-hex")]
        secret_hex: String,

        /// Attribute pair key=value (repeatable)
        #[arg(long = "data")]
        data: Vec<String>,

        #[arg(long)]
        provider: Option<String>,

        /// Override the ownership message (defaults to the key's own address)
        #[arg(long)]
        message: Option<String>,
    },

    /// Audit trail utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply embedded SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
pub(crate) enum OrderCmd {
    /// Get-or-create an order for the given attribute set
    Create {
        /// Attribute pair key=value (repeatable)
        #[arg(long = "data", required = true)]
        data: Vec<String>,

        #[arg(long)]
        provider: Option<String>,

        /// Pre-bind a wallet address
        #[arg(long)]
        address: Option<String>,

        #[arg(long)]
        device: Option<String>,

        /// Return an existing open order instead of failing ALREADY_EXISTS
        #[arg(long, default_value_t = false)]
        allow_duplicates: bool,
    },

    Show {
        #[arg(long)]
        id: i64,
    },

    List {
        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        device: Option<String>,

        /// Hide attested orders
        #[arg(long, default_value_t = false)]
        open_only: bool,
    },

    Bind {
        #[command(flatten)]
        target: order::Target,

        #[arg(long)]
        address: String,
    },

    Unbind {
        #[command(flatten)]
        target: order::Target,
    },

    /// Point an order at a different endpoint
    SetDevice {
        #[arg(long)]
        id: i64,

        #[arg(long)]
        device: String,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Verify the hash chain of a JSONL audit log
    Verify { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = attest_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = attest_db::status(&pool).await?;
                    println!("db_ok={} has_orders_table={}", s.ok, s.has_orders_table);
                    if s.has_orders_table {
                        let c = attest_db::count_orders_by_status(&pool).await?;
                        println!(
                            "pending={} addressed={} attested={}",
                            c.pending, c.addressed, c.attested
                        );
                    }
                }
                DbCmd::Migrate => {
                    attest_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = attest_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Order { cmd } => order::run(cmd).await?,

        Commands::Keygen => keys::keygen(),

        Commands::Sign {
            secret_hex,
            data,
            provider,
            message,
        } => keys::sign(&secret_hex, &data, provider, message)?,

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Verify { path } => match attest_audit::verify_hash_chain(&path)? {
                attest_audit::VerifyResult::Valid { lines } => {
                    println!("audit_chain=valid lines={lines}");
                }
                attest_audit::VerifyResult::Broken { line, reason } => {
                    anyhow::bail!("AUDIT_CHAIN_BROKEN line={line} reason={reason}");
                }
            },
        },
    }

    Ok(())
}
