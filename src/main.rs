use clap::{Args, Parser, Subcommand, ValueEnum};
use cwtail::cli::run::TailOverrides;
use cwtail::config::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cwtail")]
#[command(about = "Tail CloudWatch Logs across matching log streams", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    tail: TailArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[derive(Args)]
struct TailArgs {
    /// Log group to read from
    #[arg(long = "log-group-name", short = 'g', global = true)]
    log_group: Option<String>,

    /// Only streams whose name contains this text ('*' matches anything)
    #[arg(long = "log-stream-like", short = 's', global = true)]
    stream_pattern: Option<String>,

    /// Periodically rediscover matching streams
    #[arg(long = "log-stream-refresh", global = true)]
    refresh_streams: bool,

    /// CloudWatch filter pattern applied to events
    #[arg(long, short = 'f', global = true)]
    filter_pattern: Option<String>,

    /// Start of the range (now, RFC 3339, -15m, epoch millis)
    #[arg(long, global = true)]
    start_time: Option<String>,

    /// End of the range; omit or pass 'open' to keep tailing
    #[arg(long, global = true)]
    end_time: Option<String>,

    #[arg(long, global = true)]
    region: Option<String>,

    #[arg(long, global = true)]
    profile: Option<String>,

    #[arg(long, value_enum, global = true)]
    output: Option<OutputArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputArg {
    Auto,
    Short,
    Full,
    Json,
}

impl From<OutputArg> for OutputFormat {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::Auto => OutputFormat::Auto,
            OutputArg::Short => OutputFormat::Short,
            OutputArg::Full => OutputFormat::Full,
            OutputArg::Json => OutputFormat::Json,
        }
    }
}

impl From<TailArgs> for TailOverrides {
    fn from(args: TailArgs) -> Self {
        Self {
            log_group: args.log_group,
            stream_pattern: args.stream_pattern,
            refresh_streams: args.refresh_streams,
            filter_pattern: args.filter_pattern,
            start_time: args.start_time,
            end_time: args.end_time,
            region: args.region,
            profile: args.profile,
            output: args.output.map(OutputFormat::from),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Diagnostics go to stderr; stdout carries log events
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cwtail=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config_path = cwtail::config::resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            cwtail::cli::run::run(config_path, cli.tail.into()).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                cwtail::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                cwtail::cli::config::validate(config_path)?;
            }
        },
    }

    Ok(())
}
