//! redit - Edit database records as JSON files in your $EDITOR.
//!
//! # Usage
//!
//! ```bash
//! redit mydb users        # every record, one file each
//! redit mydb users 1      # just record "1"
//! redit --host db.internal --save
//! ```

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use redit::config::{
    ConfigFlags, SessionInputs, clear_config_flags, global_config_path, load_config_flags,
    local_override_path, save_config_flags,
};
use redit::console::Console;
use redit::error::SessionError;
use redit::session;
use redit::store::RethinkConnector;

/// Edit RethinkDB records as JSON files in your $EDITOR
#[derive(Parser, Debug)]
#[command(name = "redit", version, about, long_about = None)]
struct Cli {
    /// Database to edit
    #[arg(value_name = "DB")]
    database: Option<String>,

    /// Table to edit
    #[arg(value_name = "TABLE")]
    table: Option<String>,

    /// Edit only the record with this id
    #[arg(value_name = "ID")]
    id: Option<String>,

    /// RethinkDB host [default: localhost]
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// RethinkDB driver port [default: 28015]
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// User to log in as [default: admin]
    #[arg(long, value_name = "USER")]
    user: Option<String>,

    /// Password for --user [default: empty]
    #[arg(long, value_name = "PASSWORD")]
    password: Option<String>,

    /// Seconds to wait for the connection [default: 20]
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u64>,

    /// How often scratch files are checked for changes, in milliseconds [default: 100]
    #[arg(long, value_name = "MS")]
    poll_interval: Option<u64>,

    /// Save the connection flags given here as defaults
    #[arg(long)]
    save: bool,

    /// Clear saved defaults
    #[arg(long)]
    clear: bool,
}

impl Cli {
    fn flags(&self) -> ConfigFlags {
        ConfigFlags {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            connect_timeout_secs: self.connect_timeout,
            poll_interval_ms: self.poll_interval,
        }
    }
}

fn main() -> ExitCode {
    // Initialize logging; stdout belongs to the console lines
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let console = Console::detect();
    match run(Cli::parse(), console) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<SessionError>() {
                Some(session_err) => console.error(session_err),
                None => console.error(&format!("{err:#}")),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, console: Console) -> Result<()> {
    let global_path = global_config_path();
    let local_path = local_override_path();
    let cli_flags = cli.flags();

    if cli.clear {
        clear_config_flags(&global_path)?;
    }
    if cli.save {
        save_config_flags(&global_path, &cli_flags)?;
    }
    if (cli.save || cli.clear) && cli.database.is_none() {
        return Ok(());
    }

    let file_flags = if cli.clear {
        ConfigFlags::default()
    } else {
        let global_flags = load_config_flags(&global_path)?;
        let local_flags = load_config_flags(&local_path)?;
        global_flags.union(&local_flags)
    };

    let inputs = SessionInputs {
        database: cli.database,
        table: cli.table,
        record_id: cli.id,
        editor: std::env::var("EDITOR").ok(),
        flags: file_flags.union(&cli_flags),
    };
    session::run(inputs, &RethinkConnector, console)?;
    console.success();
    Ok(())
}
