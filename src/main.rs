use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use zeroize::Zeroizing;

use keepassword::dialogs::DEFAULT_DATABASE_NAME;
use keepassword::format::VaultFormat;
use keepassword::generator::{generate, GeneratorOptions, MAX_LENGTH, MIN_LENGTH};
use keepassword::host::{FileHost, LocalHost};
use keepassword::session::Session;
use keepassword::{app, logging, storage};

#[derive(Parser)]
#[command(name = "keepassword", version, args_conflicts_with_subcommands = true)]
#[command(about = "Terminal client for encrypted credential databases", long_about = None)]
struct Cli {
    /// Database to open on start
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a random password
    Generate {
        #[arg(short, long)]
        length: Option<usize>,

        /// Leave out symbols
        #[arg(long)]
        no_symbols: bool,

        /// Leave out look-alike characters such as 0/O and 1/l
        #[arg(long)]
        unambiguous: bool,
    },

    /// Create an empty database without starting the UI
    New {
        /// Target file; relative paths land in the database directory
        path: String,

        #[arg(short, long, default_value = DEFAULT_DATABASE_NAME)]
        name: String,

        /// Optional key file combined with the passphrase
        #[arg(short, long)]
        key_file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = storage::load_config()?;
    if let Err(e) = logging::init(&storage::log_path()?) {
        eprintln!("warning: {e}");
    }

    match cli.command {
        Some(Commands::Generate {
            length,
            no_symbols,
            unambiguous,
        }) => {
            let mut options = config.generator;
            if let Some(length) = length {
                options.length = length.clamp(MIN_LENGTH, MAX_LENGTH);
            }
            options.symbols &= !no_symbols;
            options.exclude_ambiguous |= unambiguous;
            print_password(&options);
            Ok(())
        }
        Some(Commands::New {
            path,
            name,
            key_file,
        }) => create_database(&config, &path, &name, key_file),
        None => app::run(config, cli.database),
    }
}

fn print_password(options: &GeneratorOptions) {
    let password = Zeroizing::new(generate(options));
    println!("{}", password.as_str());
}

fn create_database(
    config: &storage::Config,
    raw_path: &str,
    name: &str,
    key_file: Option<PathBuf>,
) -> Result<()> {
    let host = LocalHost::new(config.database_dir()?);
    let path = host.resolve_save_path(raw_path);
    if path.exists() {
        return Err(anyhow!("{} already exists", path.display()));
    }

    let passphrase = Zeroizing::new(rpassword::prompt_password("New passphrase: ")?);
    let confirm = Zeroizing::new(rpassword::prompt_password("Confirm passphrase: ")?);
    if passphrase.is_empty() {
        return Err(anyhow!("Passphrase cannot be empty"));
    }
    if *passphrase != *confirm {
        return Err(anyhow!("Passphrases do not match"));
    }
    let key = match &key_file {
        Some(file) => Some(Zeroizing::new(host.read_bytes(file)?)),
        None => None,
    };

    let mut session = Session::new(VaultFormat::default());
    session.create(
        &host,
        path.clone(),
        name,
        &passphrase,
        key.as_ref().map(|k| k.as_slice()),
    )?;
    session.lock();
    info!(path = %path.display(), "database created from the command line");
    println!("Created {}", path.display());
    Ok(())
}
