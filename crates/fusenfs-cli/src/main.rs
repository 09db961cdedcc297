use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use fusenfs_config::MountConfig;

mod commands;
mod errors;
mod logging;

#[derive(Parser)]
#[command(name = "fuse-nfs", version, about = "fuse-nfs - mount a remote export with FUSE")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount a remote export and serve it until interrupted
    Mount(commands::mount::MountArgs),
    /// Unmount a fuse-nfs mount point
    Unmount {
        /// Mount point to unmount
        mountpoint: PathBuf,
        /// Force unmount even if busy
        #[arg(short, long)]
        force: bool,
    },
    /// Validate configuration file
    Validate,
    /// Show effective configuration
    Config,
}

fn find_config() -> Option<PathBuf> {
    // 1. FUSENFS_CONFIG environment variable
    if let Ok(path) = std::env::var("FUSENFS_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. fuse-nfs.yaml in current directory
    let cwd_config = PathBuf::from("fuse-nfs.yaml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. ~/.config/fuse-nfs/config.yaml
    if let Some(home) = dirs_next::home_dir() {
        let home_config = home.join(".config/fuse-nfs/config.yaml");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = cli.config.or_else(find_config);

    match cli.command {
        Commands::Validate => {
            let config_path = config_path.ok_or(
                "No configuration file found. Use --config, set FUSENFS_CONFIG, or create fuse-nfs.yaml",
            )?;
            commands::validate::run(&config_path)
        }
        Commands::Config => {
            let config = load(config_path)?;
            commands::validate::print_effective(&config)
        }
        Commands::Unmount { mountpoint, force } => {
            let args = commands::unmount::UnmountArgs { mountpoint, force };
            commands::unmount::run(args)
        }
        Commands::Mount(args) => {
            // Flags alone are enough to mount; a config file is optional.
            let mut config = load(config_path)?;
            args.apply_to(&mut config);
            config.apply_defaults();

            let _guard = logging::init(&config.logging, args.debug)?;
            commands::mount::run(config).await
        }
    }
}

fn load(path: Option<PathBuf>) -> Result<MountConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(MountConfig::from_file(&path)?),
        None => Ok(MountConfig::default()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            let code = err.exit_code();
            let code = if code < 0 {
                1u8
            } else if code > 255 {
                255u8
            } else {
                code as u8
            };
            return ExitCode::from(code);
        }
    };

    if let Err(e) = run(cli).await {
        errors::print_error(e.as_ref());
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
