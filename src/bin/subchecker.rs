#![forbid(unsafe_code)]

//! HTTP front for the subscription checker. Listens for the Twitch OAuth
//! callback on `/auth` and answers with a redirect or an inline page.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use anyhow::{Context, Result, anyhow};
use subchecker::{
    config::{ServerOverrides, ServerSettings, resolve_server_settings},
    server::{AppState, CALLBACK_PATH, router},
    twitch::TwitchApi,
};
use tokio::signal;
use tracing::{error, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ServerArgs {
    overrides: ServerOverrides,
}

impl ServerArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut overrides = ServerOverrides::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some((flag, value)) = arg.split_once('=') {
                apply_flag(&mut overrides, flag, value.to_string())?;
                continue;
            }
            match arg.as_str() {
                "--host" | "--port" | "--api-base" | "--properties" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("{arg} requires a value"))?;
                    apply_flag(&mut overrides, &arg, value)?;
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }
        Ok(Self { overrides })
    }
}

fn apply_flag(overrides: &mut ServerOverrides, flag: &str, value: String) -> Result<()> {
    match flag {
        "--host" => overrides.host = Some(value),
        "--port" => overrides.port = Some(parse_port_arg(&value)?),
        "--api-base" => overrides.api_base = Some(value),
        "--properties" => overrides.properties_path = Some(PathBuf::from(value)),
        _ => return Err(anyhow!("unknown argument: {flag}")),
    }
    Ok(())
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn listen_addr(settings: &ServerSettings) -> Result<SocketAddr> {
    let ip = settings
        .host
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/SUBCHECKER_HOST")?;
    Ok(SocketAddr::new(ip, settings.port))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        error!("fatal: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let ServerArgs { overrides } = ServerArgs::parse()?;
    let settings = resolve_server_settings(overrides)?;
    let addr = listen_addr(&settings)?;

    let state = AppState::new(
        TwitchApi::new(settings.api_base.clone()),
        settings.properties_path.clone(),
    );
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!(
        properties = %settings.properties_path.display(),
        api_base = %settings.api_base,
        "subchecker listening on http://{addr}{CALLBACK_PATH}"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running subchecker server")?;

    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        error!("failed to install Ctrl+C handler: {err}");
    }
}
