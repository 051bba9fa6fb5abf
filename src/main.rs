use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hwprogd::core::{
    FlashFlags, FlashJob, JobSpec, ListDetail, ListJob, LiveEvent, ProgramJob, TargetRef,
};
use hwprogd::logging::{self, LogConfig};
use hwprogd::web::WebServer;
use hwprogd::{config, context};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "hwprogd")]
#[command(about = "FPGA and flash programming job daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./hwprogd.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the job API until interrupted
    Daemon(ServerArgs),
    /// Run a single job in the foreground and print its output
    Run(RunArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args, Serialize)]
struct ServerArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    http_bind: Option<SocketAddr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    script_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long)]
    verbose: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long)]
    json_logs: bool,
}

#[derive(Args)]
struct RunArgs {
    #[command(subcommand)]
    job: RunJob,

    /// Print raw newline-delimited JSON events instead of plain lines
    #[arg(long, global = true)]
    ndjson: bool,
}

#[derive(Subcommand)]
enum RunJob {
    /// Program a bitstream
    Program {
        #[arg(long)]
        server: String,
        #[arg(long)]
        bitstream: PathBuf,
        #[arg(long)]
        probes: Option<PathBuf>,
        /// TARGET=DEVICE; defaults to the server's address-book targets
        #[arg(long = "target")]
        targets: Vec<TargetRef>,
    },
    /// Program configuration flash
    Flash {
        #[arg(long)]
        server: String,
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        blank_check: bool,
        #[arg(long)]
        erase: bool,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        cfg_program: bool,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        verify: bool,
        /// TARGET=DEVICE; defaults to the server's address-book targets
        #[arg(long = "target")]
        targets: Vec<TargetRef>,
    },
    /// List targets and devices
    List {
        #[arg(long)]
        server: String,
        /// Also dump every device property to the job log
        #[arg(long)]
        full: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Daemon(args) => config::AppConfig::new(cli.config.as_deref(), Some(args))?,
        _ => config::AppConfig::new(cli.config.as_deref(), None::<&ServerArgs>)?,
    };

    match cli.command {
        Commands::Daemon(_) => {
            logging::init(LogConfig {
                json: config.json_logs,
                verbose: config.verbose,
            });
            let ctx = context::AppContext::new(config)?;
            run_daemon(ctx).await.context("Failed to run daemon")?
        }
        Commands::Run(args) => {
            logging::init(LogConfig {
                json: config.json_logs,
                verbose: config.verbose,
            });
            let ctx = context::AppContext::new(config)?;
            run_job(ctx, args).await.context("Failed to run job")?
        }
        Commands::Config => print_config(&config)?,
    }

    Ok(())
}

async fn run_daemon(ctx: context::AppContext) -> Result<()> {
    let server = Arc::new(WebServer::new(ctx.clone(), ctx.config.http_bind));

    let web = tokio::spawn({
        let server = server.clone();
        async move { server.start().await }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    server.shutdown();
    ctx.jobs.shutdown().await;
    web.await.context("Web server task failed")??;

    Ok(())
}

async fn run_job(ctx: context::AppContext, args: RunArgs) -> Result<()> {
    let spec = build_spec(&ctx.config, args.job);
    let mut handle = ctx.jobs.submit(spec).await?;

    while let Some(event) = handle.next_event().await {
        if args.ndjson {
            print!("{}", event.to_ndjson());
            continue;
        }
        match event {
            LiveEvent::Log { line } => println!("{}", line),
            LiveEvent::Tree { tree } => {
                println!("{}", tree.server);
                for target in &tree.targets {
                    println!("  {}", target.name);
                    for device in &target.devices {
                        println!("    {}", device);
                    }
                }
            }
        }
    }

    ctx.jobs.shutdown().await;
    Ok(())
}

fn build_spec(config: &config::AppConfig, job: RunJob) -> JobSpec {
    let targets_or_book = |targets: Vec<TargetRef>, server: &str| {
        if targets.is_empty() {
            config.targets_for(server)
        } else {
            targets
        }
    };

    match job {
        RunJob::Program {
            server,
            bitstream,
            probes,
            targets,
        } => JobSpec::Program(ProgramJob {
            targets: targets_or_book(targets, &server),
            server,
            bitstream,
            probes,
        }),
        RunJob::Flash {
            server,
            image,
            blank_check,
            erase,
            cfg_program,
            verify,
            targets,
        } => JobSpec::Flash(FlashJob {
            targets: targets_or_book(targets, &server),
            server,
            image,
            flags: FlashFlags {
                blank_check,
                erase,
                cfg_program,
                verify,
            },
            memory_part: config.flash_memory_part.clone(),
        }),
        RunJob::List { server, full } => JobSpec::List(ListJob {
            expected: config.targets_for(&server),
            server,
            detail: if full {
                ListDetail::Full
            } else {
                ListDetail::Brief
            },
        }),
    }
}

fn print_config(config: &config::AppConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to serialize config")?;
    print!("{}", rendered);
    Ok(())
}
