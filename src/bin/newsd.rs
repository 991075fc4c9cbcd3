//! The `newsd` binary: parses the CLI, either runs an admin action and
//! exits or loads the backend and starts serving (§6).

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use newsd::backend::Backend;
use newsd::config::{AdminCommand, Cli, verbosity_filter};
use newsd::listener::{self, ListenerConfig};
use newsd::model::{BaseGroupInfo, Config as ServerConfig, ModInfo};

#[tokio::main]
async fn main() -> anyhow_compat::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(verbosity_filter(cli.verbose))
        .init();

    let backend = Backend::load(&cli.db).await?;

    if let Some(admin) = cli.admin {
        run_admin(&backend, admin).await?;
        return Ok(());
    }

    let backend = Arc::new(backend);
    let config = backend.config().await;

    let serve_fut = listener::serve(
        backend,
        ListenerConfig {
            addr: cli.listen,
            server_name: cli.server_name,
            throttle_window: Duration::from_secs(config.throt_cmd_window_seconds),
            throttle_interval: Duration::from_millis(config.throt_cmd_interval_millis),
            cooldown_capacity: 1000,
        },
    );

    tokio::select! {
        result = serve_fut => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received, stopping accept loop");
        }
    }

    Ok(())
}

async fn run_admin(backend: &Backend, admin: AdminCommand) -> newsd::Result<()> {
    match admin {
        AdminCommand::Group {
            name,
            desc,
            posting,
            max_lives,
            max_post_size,
        } => {
            backend
                .create_or_update_group(BaseGroupInfo {
                    name,
                    desc,
                    posting: posting.into(),
                    max_lives,
                    max_post_size,
                    create_time: newsd::model::unix_now() as i64,
                })
                .await?;
        }
        AdminCommand::Mod { email, password } => {
            backend.toggle_moderator(ModInfo { email, password }).await?;
        }
        AdminCommand::Blacklist { name, cidr } => {
            backend.toggle_blacklist(&name, &cidr).await?;
        }
        AdminCommand::Config {
            max_post_size,
            throt_cmd_window_seconds,
            throt_cmd_interval_millis,
            post_interval_seconds,
        } => {
            backend
                .set_config(ServerConfig {
                    max_post_size,
                    throt_cmd_window_seconds,
                    throt_cmd_interval_millis,
                    post_interval_seconds,
                })
                .await?;
        }
    }
    Ok(())
}

/// A minimal `anyhow`-shaped alias so `main` can use `?` across both
/// `newsd::ServerError` and `std::io::Error` without pulling in a crate
/// the rest of the server never otherwise needs.
mod anyhow_compat {
    pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;
}
