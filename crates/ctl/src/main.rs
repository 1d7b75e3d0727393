//! Lumix Webcam control CLI
//!
//! Stands in for the control app: picks the camera and resolution the
//! extension streams, toggles streaming and installs the virtual device.

mod activation;
mod commands;
mod exit_codes;

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use lumix_capture::CameraProvider;
use lumix_extension::{
    config::ExtensionConfig,
    logging::LOG_ENV,
    notify::SocketNotifier,
    prefs::{JsonFileStore, MemoryStore, PreferenceStore, SharedSelection},
};
use tracing_subscriber::EnvFilter;

use activation::LoopbackInstaller;
use commands::{Context, Output};
use exit_codes::ExitCode;

/// lumixctl - Lumix virtual webcam control
#[derive(Parser, Debug)]
#[command(name = "lumixctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Extension config file (defaults to $LUMIX_CONFIG or the platform config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List connected cameras, Lumix bodies first
    Cameras,
    /// Choose the camera the extension streams from
    SelectCamera {
        /// Camera id (use 'lumixctl cameras' to find); omit to pick the first Lumix
        id: Option<String>,

        /// Persist the id even if the camera is not connected
        #[arg(long)]
        force: bool,
    },
    /// Stream the test pattern instead of a camera
    ClearCamera,
    /// Show or set the output resolution
    Resolution {
        /// WIDTHxHEIGHT, one of 3840x2160, 1920x1080, 1280x720
        size: Option<String>,
    },
    /// Start streaming
    Start,
    /// Stop streaming
    Stop,
    /// Show installation and streaming status
    Status,
    /// Install the virtual camera
    Activate,
    /// Remove the virtual camera
    Deactivate,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn camera_provider(config: &ExtensionConfig) -> Arc<dyn CameraProvider> {
    #[cfg(feature = "v4l2")]
    {
        Arc::new(lumix_capture::v4l2_backend::V4l2Provider::new(config.frame_rate))
    }
    #[cfg(not(feature = "v4l2"))]
    {
        let _ = config;
        Arc::new(lumix_capture::memory::MemoryProvider::new())
    }
}

fn load_config(explicit: Option<&PathBuf>) -> anyhow::Result<ExtensionConfig> {
    let config = match explicit {
        Some(path) => ExtensionConfig::load_from(path)?,
        None => ExtensionConfig::load()?,
    };
    Ok(config)
}

fn build_context(cli: &Cli) -> anyhow::Result<(Context, PathBuf)> {
    let config = load_config(cli.config.as_ref())?;
    let store_path = config.resolved_store_path();
    let store: Arc<dyn PreferenceStore> = match &store_path {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => {
            tracing::warn!("no data directory; selection will not persist");
            Arc::new(MemoryStore::new())
        }
    };
    let installer = LoopbackInstaller::new(config.loopback_device.clone());
    let device = installer.device().to_path_buf();
    let context = Context {
        selection: SharedSelection::new(store),
        notifier: SocketNotifier::new(config.resolved_notify_dir()),
        provider: camera_provider(&config),
        installer: Box::new(installer),
        store_path,
        output: Output {
            json: cli.json,
            quiet: cli.quiet,
        },
    };
    Ok((context, device))
}

fn run(cli: Cli) -> ExitCode {
    let (ctx, device) = match build_context(&cli) {
        Ok(built) => built,
        Err(err) => {
            if !cli.quiet {
                eprintln!("error: {err:#}");
            }
            return ExitCode::GeneralError;
        }
    };
    match cli.command {
        Commands::Cameras => commands::cameras(&ctx),
        Commands::SelectCamera { id, force } => commands::select_camera(&ctx, id.as_deref(), force),
        Commands::ClearCamera => commands::clear_camera(&ctx),
        Commands::Resolution { size } => commands::resolution(&ctx, size.as_deref()),
        Commands::Start => commands::set_streaming(&ctx, true),
        Commands::Stop => commands::set_streaming(&ctx, false),
        Commands::Status => commands::status(&ctx, device),
        Commands::Activate => commands::activation(&ctx, true),
        Commands::Deactivate => commands::activation(&ctx, false),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let exit_code = run(cli);
    std::process::exit(exit_code.as_i32());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    /// Verify the CLI definition is valid
    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_cameras() {
        let cli = Cli::try_parse_from(["lumixctl", "cameras"]).unwrap();
        assert!(!cli.json);
        assert!(!cli.quiet);
        assert!(matches!(cli.command, Commands::Cameras));
    }

    #[test]
    fn parse_select_camera_with_force() {
        let cli = Cli::try_parse_from(["lumixctl", "select-camera", "usb-3", "--force"]).unwrap();
        match cli.command {
            Commands::SelectCamera { id, force } => {
                assert_eq!(id.as_deref(), Some("usb-3"));
                assert!(force);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parse_select_camera_without_id() {
        let cli = Cli::try_parse_from(["lumixctl", "select-camera"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::SelectCamera { id: None, force: false }
        ));
    }

    #[test]
    fn parse_resolution_with_global_flags() {
        let cli = Cli::try_parse_from(["lumixctl", "resolution", "1280x720", "--json"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Resolution { size } => assert_eq!(size.as_deref(), Some("1280x720")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parse_config_path() {
        let cli =
            Cli::try_parse_from(["lumixctl", "status", "--config", "/tmp/extension.json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/extension.json")));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["lumixctl", "record"]).is_err());
    }
}
