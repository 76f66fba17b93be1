use crate::backend::CloudWatchBackend;
use crate::config::{load_config, validate_config, Config, ConfigError, OutputFormat};
use crate::matcher::StreamMatcher;
use crate::poller::{EventPoller, PollerError, PollerSettings, RestartSignal};
use crate::sink::WriterSink;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_types::region::Region;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("AWS credentials unavailable{}: {message}", profile_hint(.profile))]
    Credentials {
        profile: Option<String>,
        message: String,
    },

    #[error("poller error: {0}")]
    Poller(#[from] PollerError),

    #[error("signal handler error: {0}")]
    Signal(#[from] std::io::Error),
}

fn profile_hint(profile: &Option<String>) -> String {
    profile
        .as_ref()
        .map(|p| format!(" for profile '{}'", p))
        .unwrap_or_default()
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct TailOverrides {
    pub log_group: Option<String>,
    pub stream_pattern: Option<String>,
    pub refresh_streams: bool,
    pub filter_pattern: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub output: Option<OutputFormat>,
}

impl TailOverrides {
    pub fn apply(self, config: &mut Config) {
        if let Some(log_group) = self.log_group {
            config.log_group = log_group;
        }
        if let Some(pattern) = self.stream_pattern {
            config.stream_pattern = pattern;
        }
        if self.refresh_streams {
            config.refresh_streams = true;
        }
        if self.filter_pattern.is_some() {
            config.filter_pattern = self.filter_pattern;
        }
        if self.start_time.is_some() {
            config.start_time = self.start_time;
        }
        if self.end_time.is_some() {
            config.end_time = self.end_time;
        }
        if let Some(region) = self.region {
            config.aws.region = region;
        }
        if self.profile.is_some() {
            config.aws.profile = self.profile;
        }
        if let Some(format) = self.output {
            config.output.format = format;
        }
    }
}

pub async fn run(
    config_path: Option<PathBuf>,
    overrides: TailOverrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &config_path {
        Some(path) => {
            info!(config_path = %path.display(), "Loading configuration");
            load_config(path).map_err(RunError::from)?
        }
        None => Config::default(),
    };
    overrides.apply(&mut config);

    if config.log_group.trim().is_empty() && config_path.is_none() {
        eprintln!("Error: no log group given and no config file found");
        eprintln!("Searched locations:");
        eprintln!("  ~/.config/cwtail/config.yml");
        eprintln!("  /etc/cwtail/config.yml");
        eprintln!("\nUse --log-group-name <name>, --config <path>, or run 'cwtail config init' to generate a config.");
        std::process::exit(1);
    }

    tail(config).await.map_err(|e| e.into())
}

async fn tail(config: Config) -> Result<(), RunError> {
    let resolved = validate_config(config, chrono::Utc::now())?;
    let config = resolved.config;

    let sdk_config = load_aws_config(&config).await?;
    let backend = Arc::new(CloudWatchBackend::from_sdk_config(&sdk_config));

    let settings = PollerSettings::from(&config);
    let matcher = StreamMatcher::new(backend, config.log_group.clone(), resolved.pattern)
        .with_lookback(config.poller.discovery_lookback)
        .with_retry_delay(config.poller.retry_delay);

    let restart = RestartSignal::new();
    let mut poller = EventPoller::new(matcher, resolved.window, settings)
        .with_restart_signal(restart.clone());

    let shutdown = CancellationToken::new();
    let ctrl_c = tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));
    let hangup = spawn_restart_on_hangup(restart)?;

    let format = config.output.format.line_format(resolved.window.is_live());
    let mut sink = WriterSink::new(std::io::stdout(), format);

    info!(
        log_group = %config.log_group,
        region = %config.aws.region,
        live = resolved.window.is_live(),
        "Tailing log group, press Ctrl+C to stop"
    );

    let result = poller.run(&mut sink, shutdown).await;

    ctrl_c.abort();
    if let Some(hangup) = hangup {
        hangup.abort();
    }

    match result {
        Ok(summary) => {
            info!(
                termination = ?summary.termination,
                cycles = summary.cycles,
                discoveries = summary.discoveries,
                events = summary.events_emitted,
                "Tail finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Tail failed");
            Err(e.into())
        }
    }
}

async fn load_aws_config(config: &Config) -> Result<aws_config::SdkConfig, RunError> {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.aws.region.clone()));
    if let Some(profile) = &config.aws.profile {
        loader = loader.profile_name(profile);
    }
    let sdk_config = loader.load().await;

    let credentials_error = |message: String| RunError::Credentials {
        profile: config.aws.profile.clone(),
        message,
    };

    let provider = sdk_config
        .credentials_provider()
        .ok_or_else(|| credentials_error("no credentials provider configured".to_string()))?;
    provider
        .provide_credentials()
        .await
        .map_err(|e| credentials_error(e.to_string()))?;

    Ok(sdk_config)
}

async fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
        Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
    }
}

#[cfg(unix)]
fn spawn_restart_on_hangup(
    restart: RestartSignal,
) -> Result<Option<tokio::task::JoinHandle<()>>, RunError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    Ok(Some(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, restarting stream discovery");
            restart.request();
        }
    })))
}

#[cfg(not(unix))]
fn spawn_restart_on_hangup(
    _restart: RestartSignal,
) -> Result<Option<tokio::task::JoinHandle<()>>, RunError> {
    Ok(None)
}
