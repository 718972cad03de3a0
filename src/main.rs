#[macro_use]
extern crate tracing;

use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use calloop::EventLoop;
use clap::Parser;
use directories::ProjectDirs;
use rose::cli::{Cli, Sub};
use rose::rose::State;
use rose::utils::version;
use rose_config::{Config, ConfigPath};
use smithay::utils::Size;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let directives = env::var("RUST_LOG").unwrap_or_else(|_| "rose=debug,info".to_owned());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .init();

    let cli = Cli::parse();

    if let Some(subcommand) = cli.subcommand {
        match subcommand {
            Sub::Validate { config } => {
                tracy_client::Client::start();

                let path = config_path(config);
                match path.load() {
                    Ok(Some(_)) => info!("config is valid"),
                    Ok(None) => info!("no config file found, the default config will be used"),
                    Err(err) => {
                        error!("{err:?}");
                        process::exit(1);
                    }
                }
                return Ok(());
            }
        }
    }

    let _client = tracy_client::Client::start();

    info!("starting version {}", &version());

    let config = match config_path(cli.config).load() {
        Ok(Some(config)) => config,
        Ok(None) => {
            info!("no config file found, using the default config");
            Config::default()
        }
        Err(err) => {
            warn!("{err:?}");
            Config::default()
        }
    };

    let mut event_loop = EventLoop::<State>::try_new()?;
    let mut state = State::new(config, event_loop.handle())?;

    let (w, h) = cli.headless_size;
    state
        .rose
        .add_output(String::from("headless-1"), Size::from((w, h)))?;

    event_loop.run(None, &mut state, |state| {
        let _span = tracy_client::span!("loop callback");

        // Without a real renderer every buffer is fresh, so redraw everything.
        for (output, frame) in state.rose.redraw_outputs(0, Instant::now()) {
            trace!(
                "{output:?}: {} elements, damage {:?}",
                frame.elements.len(),
                frame.damage
            );
        }
    })?;

    Ok(())
}

fn config_path(cli_path: Option<PathBuf>) -> ConfigPath {
    if let Some(path) = cli_path.or_else(|| env::var_os("ROSE_CONFIG").map(PathBuf::from)) {
        return ConfigPath::Explicit(path);
    }

    let system_path = PathBuf::from("/etc/rose/config.kdl");
    let user_path = ProjectDirs::from("", "", "rose")
        .map(|dirs| dirs.config_dir().join("config.kdl"))
        .unwrap_or_else(|| system_path.clone());

    ConfigPath::Regular {
        user_path,
        system_path,
    }
}
