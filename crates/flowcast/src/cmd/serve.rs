//! Serve command - Run the flowcast server
//!
//! Wires one `OutputManager` per channel to its listeners, attaches the
//! static outputs, and runs the Event and Dispatch Loops until a shutdown
//! signal or a fatal dispatch error.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use flowcast_config::{AuthConfig, AuthMode, ChannelKind, Config, EngineConfig, ListenConfig};
use flowcast_output::{
    AccessList, AuthPolicy, Channel, DispatchLoop, EventLoop, ListenerSpec, OutputConfig,
    OutputManager, OutputTarget, SessionLimits, TokenAuthenticator,
};
use flowcast_protocol::{SourceIdentity, WireFormat, WireVersion, decode_all};

/// How long each loop gets to finish after the shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve command arguments
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to configuration file (defaults to configs/flowcast.toml if present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Native record file pushed into the data channel at startup
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,
}

/// A validated configuration and where it came from
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    pub source: Option<PathBuf>,
}

/// Load the configuration named on the command line, or the first default
/// path that exists, or a single data listener on the default port
pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = path {
        // User explicitly provided config path - must exist
        if !path.exists() {
            return Err(anyhow::anyhow!("config file not found: {}", path.display()));
        }
        let config = Config::from_file(path).context("failed to load configuration")?;
        return Ok(LoadedConfig {
            config,
            source: Some(path.to_path_buf()),
        });
    }

    let default_paths = [
        PathBuf::from("configs/flowcast.toml"),
        PathBuf::from("flowcast.toml"),
    ];
    for path in default_paths {
        if path.exists() {
            let config = Config::from_file(&path).context("failed to load configuration")?;
            return Ok(LoadedConfig {
                config,
                source: Some(path),
            });
        }
    }

    Ok(LoadedConfig {
        config: Config {
            listen: vec![ListenConfig::default()],
            ..Config::default()
        },
        source: None,
    })
}

/// Run the serve command
pub async fn run(args: ServeArgs, loaded: LoadedConfig) -> Result<()> {
    let config_path = loaded
        .source
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(default)".to_string());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        platform = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        config = %config_path,
        "flowcast starting"
    );
    if loaded.source.is_none() {
        info!("no config file found, serving the data channel on 0.0.0.0:561");
    }

    if let Err(e) = run_server(loaded.config, args.replay.as_deref()).await {
        error!(error = %e, "server error");
        return Err(e);
    }

    info!("flowcast shutdown complete");
    Ok(())
}

/// A channel's manager and the loops serving it
struct ChannelTasks {
    manager: Arc<OutputManager>,
    dispatch: JoinHandle<flowcast_output::Result<()>>,
    event_loop: Option<JoinHandle<()>>,
}

/// Main server run loop
async fn run_server(config: Config, replay: Option<&Path>) -> Result<()> {
    let output_config = output_config(&config.engine)?;
    let auth = auth_policy(&config.auth);
    let access = AccessList::parse(&config.access.allow).context("invalid access list")?;

    let data = Arc::new(
        OutputManager::new(Channel::Data, output_config.clone())
            .with_auth(auth.clone())
            .with_access(access.clone()),
    );

    // Static outputs must all open before anything is served
    for output in &config.outputs {
        let target = OutputTarget::parse(&output.target)
            .with_context(|| format!("invalid output target '{}'", output.target))?;
        let opened = target
            .open()
            .await
            .with_context(|| format!("failed to open output {target}"))?;
        data.attach(opened.sink, opened.format, opened.label, opened.initial_mar);
    }

    let data_specs = listener_specs(&config.listen, ChannelKind::Data).await?;
    let control_specs = listener_specs(&config.listen, ChannelKind::Control).await?;

    let mut channels = vec![start_channel(Arc::clone(&data), &data_specs).await?];
    // Never cancelled when there is no control channel
    let mut control_stopped = CancellationToken::new();
    if !control_specs.is_empty() {
        let control = Arc::new(
            OutputManager::new(Channel::Control, output_config)
                .with_auth(auth)
                .with_access(access)
                .with_status_source(Arc::clone(&data)),
        );
        control_stopped = control.shutdown_token();
        channels.push(start_channel(control, &control_specs).await?);
    }

    if let Some(path) = replay {
        replay_file(&data, path).await?;
    }

    info!(
        data_listeners = data_specs.len(),
        control_listeners = control_specs.len(),
        outputs = config.outputs.len(),
        "flowcast running"
    );

    // A dispatch loop only stops on its own after a fatal error
    let data_stopped = data.shutdown_token();
    tokio::select! {
        _ = wait_for_shutdown() => info!("shutdown signal received, stopping server..."),
        _ = data_stopped.cancelled() => warn!("data dispatch loop stopped, shutting down"),
        _ = control_stopped.cancelled() => warn!("control dispatch loop stopped, shutting down"),
    }

    for channel in &channels {
        channel.manager.shutdown();
    }

    let mut failure = None;
    for channel in channels {
        let name = channel.manager.channel();
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, channel.dispatch).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                error!(channel = %name, error = %e, "dispatch loop failed");
                if failure.is_none() {
                    failure = Some(anyhow::Error::new(e).context(format!("{name} channel")));
                }
            }
            Ok(Err(e)) => {
                error!(channel = %name, error = %e, "dispatch loop panicked");
                if failure.is_none() {
                    failure = Some(anyhow::anyhow!("{name} dispatch loop panicked: {e}"));
                }
            }
            Err(_) => warn!(channel = %name, "dispatch loop did not finish within timeout"),
        }

        if let Some(task) = channel.event_loop {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(channel = %name, error = %e, "event loop panicked"),
                Err(_) => warn!(channel = %name, "event loop did not finish within timeout"),
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Bind a channel's listeners and spawn its loops
async fn start_channel(
    manager: Arc<OutputManager>,
    specs: &[ListenerSpec],
) -> Result<ChannelTasks> {
    let channel = manager.channel();
    let event_loop = if specs.is_empty() {
        None
    } else {
        let event_loop = EventLoop::bind(Arc::clone(&manager), specs)
            .await
            .with_context(|| format!("failed to bind {channel} listeners"))?;
        Some(tokio::spawn(event_loop.run()))
    };

    let dispatch = DispatchLoop::new(Arc::clone(&manager))
        .with_context(|| format!("failed to start {channel} dispatch loop"))?;
    Ok(ChannelTasks {
        manager,
        dispatch: tokio::spawn(dispatch.run()),
        event_loop,
    })
}

/// Decode a native record file and push every record into the data channel
async fn replay_file(manager: &OutputManager, path: &Path) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read replay file {}", path.display()))?;
    let records = decode_all(&bytes)
        .with_context(|| format!("failed to decode replay file {}", path.display()))?;

    let total = records.len();
    let mut pushed = 0;
    for decoded in records {
        // refused once shutdown has begun
        if !manager.push(decoded.record) {
            break;
        }
        pushed += 1;
    }
    info!(file = %path.display(), records = total, pushed, "replay queued");
    Ok(())
}

/// Translate the `[engine]` section into output manager settings
pub(crate) fn output_config(engine: &EngineConfig) -> Result<OutputConfig> {
    let source_id = match engine.source_id.as_deref() {
        Some(id) => id
            .parse::<SourceIdentity>()
            .with_context(|| format!("invalid engine.source_id '{id}'"))?,
        None => SourceIdentity::default(),
    };

    let limits = SessionLimits::default()
        .with_queue_depth(engine.max_queue_depth, engine.resume_queue_depth)
        .with_drop_batch(engine.drop_batch)
        .with_max_writes_per_cycle(engine.max_writes_per_cycle)
        .with_max_consecutive_errors(engine.max_consecutive_errors);

    Ok(OutputConfig::default()
        .with_source_id(source_id)
        .with_mar_interval(engine.mar_interval)
        .with_max_clients(engine.max_clients)
        .with_limits(limits)
        .with_startup_timeout(engine.startup_timeout)
        .with_scan_interval(engine.scan_interval)
        .with_idle_wait(engine.idle_wait))
}

/// Build the negotiation policy from the `[auth]` section
pub(crate) fn auth_policy(auth: &AuthConfig) -> AuthPolicy {
    let policy = match auth.mode {
        AuthMode::None => AuthPolicy::none(),
        AuthMode::Token => {
            AuthPolicy::new(Arc::new(TokenAuthenticator::new(auth.token.clone())))
        }
    };
    policy.with_trust_loopback(auth.trust_loopback)
}

/// Resolve the listeners serving one channel
pub(crate) async fn listener_specs(
    listen: &[ListenConfig],
    channel: ChannelKind,
) -> Result<Vec<ListenerSpec>> {
    let mut specs = Vec::new();
    for entry in listen.iter().filter(|l| l.channel == channel) {
        let version = WireVersion::from_u8(entry.version)
            .with_context(|| format!("unsupported wire version {}", entry.version))?;
        let address = resolve(&entry.socket_addr()).await?;
        specs.push(ListenerSpec::new(address, WireFormat::Native(version)));
    }
    Ok(specs)
}

async fn resolve(address: &str) -> Result<SocketAddr> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    tokio::net::lookup_host(address)
        .await
        .with_context(|| format!("failed to resolve listen address {address}"))?
        .next()
        .with_context(|| format!("listen address {address} resolved to nothing"))
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
#[path = "serve_test.rs"]
mod tests;
