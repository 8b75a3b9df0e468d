use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use fabricbench::config::Config;
use fabricbench::hostlist::HostListStore;
use fabricbench::params::{BenchParams, DebugLevel, SizeSpec};
use fabricbench::run::{BenchTransport, HttpTransport, RunCoordinator, RunMode, RunState};
use fabricbench::script::render_script;

#[derive(Parser)]
#[command(
    name = "fabricbench",
    about = "GPU fabric benchmark launcher and streaming client",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control server (API + job runner)
    Serve {
        /// Bind address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Launch a benchmark run and follow its output
    Run {
        /// Control server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,

        /// Stored host list to run against
        #[arg(long)]
        hostlist: String,

        /// Wait for the full result instead of streaming
        #[arg(long)]
        no_stream: bool,

        /// mpirun rank placement, e.g. ppr:8:node
        #[arg(long)]
        map_by: Option<String>,

        /// Out-of-band control interface
        #[arg(long)]
        oob_interface: Option<String>,

        /// TCP data-path interface
        #[arg(long)]
        data_interface: Option<String>,

        #[arg(long)]
        ib_gid_index: Option<u32>,

        #[arg(long)]
        min_channels: Option<u32>,

        #[arg(long)]
        qps_per_connection: Option<u32>,

        /// Smallest message size, e.g. 1, 8K, 1M
        #[arg(long)]
        size_begin: Option<SizeSpec>,

        /// Largest message size
        #[arg(long)]
        size_end: Option<SizeSpec>,

        /// Iterations per size step
        #[arg(long)]
        iters: Option<u32>,

        /// Blocking-mode timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Enable collective-library debug output
        #[arg(long)]
        debug: bool,

        /// Debug verbosity: WARN, INFO, or TRACE
        #[arg(long)]
        debug_level: Option<DebugLevel>,
    },

    /// Ask the control server to cancel the current run
    Stop {
        /// Control server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
    },

    /// Check GPU occupancy on every node of a host list
    Precheck {
        /// Control server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,

        /// Stored host list to check
        #[arg(long)]
        hostlist: String,
    },

    /// Print the mpirun invocation a parameter set would produce
    Script {
        /// Hostfile path to embed in the invocation
        #[arg(long, default_value = "hosts/default")]
        hostfile: PathBuf,

        /// Smallest message size, e.g. 1, 8K, 1M
        #[arg(long)]
        size_begin: Option<SizeSpec>,

        /// Largest message size
        #[arg(long)]
        size_end: Option<SizeSpec>,

        /// Iterations per size step
        #[arg(long)]
        iters: Option<u32>,

        /// Enable collective-library debug output
        #[arg(long)]
        debug: bool,
    },

    /// Manage stored host lists
    Hosts {
        #[command(subcommand)]
        action: HostsAction,
    },
}

#[derive(Subcommand)]
enum HostsAction {
    /// List stored host lists, newest first
    List,

    /// Print the hosts in a list
    Show {
        /// Host list name
        name: String,
    },

    /// Create or replace a host list from stdin (one host per line)
    Set {
        /// Host list name
        name: String,
    },

    /// Delete a host list
    Remove {
        /// Host list name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting FabricBench control server");
            fabricbench::serve(config).await?;
        }
        Commands::Run {
            server,
            hostlist,
            no_stream,
            map_by,
            oob_interface,
            data_interface,
            ib_gid_index,
            min_channels,
            qps_per_connection,
            size_begin,
            size_end,
            iters,
            timeout_secs,
            debug,
            debug_level,
        } => {
            let mut params = BenchParams::default();
            params.hostlist = Some(hostlist);
            if let Some(v) = map_by {
                params.map_by = v;
            }
            if let Some(v) = oob_interface {
                params.oob_interface = v;
            }
            if let Some(v) = data_interface {
                params.data_interface = v;
            }
            if let Some(v) = ib_gid_index {
                params.ib_gid_index = v;
            }
            if let Some(v) = min_channels {
                params.min_channels = v;
            }
            if let Some(v) = qps_per_connection {
                params.qps_per_connection = v;
            }
            if size_begin.is_some() {
                params.size_begin = size_begin;
            }
            if size_end.is_some() {
                params.size_end = size_end;
            }
            if iters.is_some() {
                params.iters = iters;
            }
            if let Some(v) = timeout_secs {
                params.timeout_secs = v;
            }
            params.enable_debug = debug;
            if let Some(v) = debug_level {
                params.debug_level = v;
            }

            let mode = if no_stream {
                RunMode::Blocking
            } else {
                RunMode::Stream
            };
            run_and_follow(&server, params, mode).await?;
        }
        Commands::Stop { server } => {
            let transport = HttpTransport::new(server);
            let resp = transport.stop().await?;
            match resp.message {
                Some(message) => println!("{}: {message}", resp.status),
                None => println!("{}", resp.status),
            }
        }
        Commands::Precheck { server, hostlist } => {
            let transport = HttpTransport::new(server);
            let report = transport.precheck(&hostlist).await?;
            println!(
                "{} node(s): {} busy, {} unreachable",
                report.total_nodes, report.busy_count, report.error_count
            );
            for node in &report.busy_nodes {
                println!("  {} : {} compute process(es)", node.ip, node.process_count);
            }
            for node in &report.error_nodes {
                let err = node.error.as_deref().unwrap_or("check failed");
                println!("  {} : {}", node.ip, err);
            }
        }
        Commands::Script {
            hostfile,
            size_begin,
            size_end,
            iters,
            debug,
        } => {
            let mut params = BenchParams::default();
            if size_begin.is_some() {
                params.size_begin = size_begin;
            }
            if size_end.is_some() {
                params.size_end = size_end;
            }
            if iters.is_some() {
                params.iters = iters;
            }
            params.enable_debug = debug;
            println!("{}", render_script(&params, &hostfile, &config.launcher));
        }
        Commands::Hosts { action } => {
            let store = HostListStore::new(&config.server.data_dir);
            store.ensure()?;
            match action {
                HostsAction::List => {
                    let lists = store.list()?;
                    if lists.is_empty() {
                        println!("No host lists found.");
                    } else {
                        println!("{:<24} | {:<20} | Size", "Name", "Modified");
                        println!("{:-<24}-|-{:-<20}-|-{:-<8}", "", "", "");
                        for entry in lists {
                            println!(
                                "{:<24} | {:<20} | {}",
                                entry.name,
                                entry.modified.format("%Y-%m-%d %H:%M:%S"),
                                entry.size
                            );
                        }
                    }
                }
                HostsAction::Show { name } => {
                    for host in store.read(&name)? {
                        println!("{host}");
                    }
                }
                HostsAction::Set { name } => {
                    let mut input = String::new();
                    std::io::Read::read_to_string(&mut std::io::stdin(), &mut input)?;
                    let hosts: Vec<String> = input
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string)
                        .collect();
                    store.write(&name, &hosts)?;
                    println!("Host list '{}' saved ({} hosts).", name, hosts.len());
                }
                HostsAction::Remove { name } => {
                    store.delete(&name)?;
                    println!("Host list '{}' removed.", name);
                }
            }
        }
    }

    Ok(())
}

/// Drive a run against the control server, echoing output as it arrives.
async fn run_and_follow(server: &str, params: BenchParams, mode: RunMode) -> Result<()> {
    let transport = HttpTransport::new(server);
    let coordinator = Arc::new(RunCoordinator::new(transport));
    let watch = coordinator.watch();

    let driver = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.start(&params, mode).await })
    };

    let mut printed = 0usize;
    let mut command_shown = false;
    loop {
        let finished = driver.is_finished();

        if !command_shown {
            let command = watch.command();
            if !command.is_empty() {
                println!("$ {command}");
                command_shown = true;
            }
        }
        let output = watch.output();
        if output.len() > printed {
            print!("{}", &output[printed..]);
            printed = output.len();
        }

        if finished {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let state = driver.await??;
    match state {
        RunState::Success => {
            let records = watch.records();
            if records.is_empty() {
                println!("Run finished; no bandwidth table found in output.");
            } else {
                println!();
                println!(
                    "{:>12} | {:>6} | {:<10} | {:>10} | {:>10}",
                    "Size (B)", "Count", "Type", "Out bus BW", "In bus BW"
                );
                for rec in &records {
                    println!(
                        "{:>12} | {:>6} | {:<10} | {:>10.2} | {:>10.2}",
                        rec.size, rec.count, rec.type_label, rec.out_bus_bw, rec.in_bus_bw
                    );
                }
            }
        }
        RunState::Busy => {
            println!("Nodes busy; run refused:");
            for node in watch.busy_nodes() {
                match node.error {
                    Some(err) => println!("  {} : check failed ({err})", node.ip),
                    None => println!("  {} : {} compute process(es)", node.ip, node.process_count),
                }
            }
        }
        RunState::Stopped => println!("Run stopped."),
        other => {
            let message = watch.message().unwrap_or_else(|| "run failed".to_string());
            anyhow::bail!("run ended in state '{other}': {message}");
        }
    }

    Ok(())
}
