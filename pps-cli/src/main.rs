//! pps - command line client for PPS nodes
//!
//!   - read:  print the current content of a node
//!   - write: publish attributes to a node
//!   - watch: print every publish until interrupted
//!   - send:  publish a server message (msg / id / dat)

mod format;

use clap::{Args, Parser, Subcommand};
use console::style;
use log::{debug, LevelFilter};
use pps_channel::{ChannelConfig, FsTransport, OpenMode, PpsChannel, PpsError};
use std::process::ExitCode;
use std::time::Duration;

/// Wait slice while watching without an idle limit
const WATCH_TICK: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "pps")]
#[command(about = "Read and publish PPS nodes", long_about = None)]
struct Cli {
    /// Resolve node paths below this directory instead of the filesystem root
    #[arg(long, global = true)]
    root: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct NodeArgs {
    /// Node path, e.g. /pps/services/demo/status
    path: String,

    /// Largest publish accepted, in KB
    #[arg(long, default_value = "64")]
    max_size: usize,

    /// Poll interval for blocking waits, in milliseconds
    #[arg(long, default_value = "10")]
    poll_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current content of a node
    Read {
        #[command(flatten)]
        node: NodeArgs,

        /// Print the wire text instead of a decoded table
        #[arg(long)]
        raw: bool,

        /// Wait for a publish if the node is empty
        #[arg(short, long)]
        wait: bool,
    },

    /// Publish `name:type:value` attributes
    Write {
        #[command(flatten)]
        node: NodeArgs,

        /// Attributes in wire form: `state::up`, `count:n:3`, `tags:json:["a"]`
        #[arg(required = true)]
        attrs: Vec<String>,

        /// Object name header
        #[arg(long)]
        object: Option<String>,

        /// Create the node if it does not exist
        #[arg(short, long)]
        create: bool,
    },

    /// Print every publish until interrupted
    Watch {
        #[command(flatten)]
        node: NodeArgs,

        /// Stop after this many seconds without a publish
        #[arg(long)]
        idle_secs: Option<u64>,
    },

    /// Publish a server message
    Send {
        #[command(flatten)]
        node: NodeArgs,

        /// Message name
        msg: String,

        /// Message payload as JSON
        #[arg(long, default_value = "null")]
        dat: String,

        /// Correlation id
        #[arg(long)]
        id: Option<String>,
    },
}

/// `--max-size` in bytes, saturating instead of wrapping
fn max_object_size(kb: usize) -> usize {
    kb.saturating_mul(1024)
}

fn channel(root: &Option<String>, node: &NodeArgs, blocking: bool) -> PpsChannel<FsTransport> {
    let transport = match root {
        Some(root) => FsTransport::with_root(root),
        None => FsTransport::new(),
    };
    let config = ChannelConfig {
        blocking,
        max_object_size: max_object_size(node.max_size),
        poll_interval: Duration::from_millis(node.poll_ms),
    };
    PpsChannel::with_transport(node.path.clone(), transport, config)
}

fn run(cli: Cli) -> Result<(), PpsError> {
    match cli.command {
        Commands::Read { node, raw, wait } => {
            let mut ch = channel(&cli.root, &node, wait);
            ch.open(OpenMode::READ)?;
            let bytes = ch.read()?;
            if raw {
                println!("{}", String::from_utf8_lossy(&bytes));
            } else {
                let record = pps_channel::decode(&bytes)?;
                print!("{}", format::render(&record));
            }
        }
        Commands::Write { node, attrs, object, create } => {
            let record = format::parse_attributes(object.as_deref(), &attrs)?;
            let mut ch = channel(&cli.root, &node, true);
            let mut mode = OpenMode::WRITE;
            if create {
                mode |= OpenMode::CREATE;
            }
            ch.open(mode)?;
            ch.write_record(&record)?;
            println!("{} {} attribute(s) -> {}", style("✓").green(), record.len(), node.path);
        }
        Commands::Watch { node, idle_secs } => {
            let mut ch = channel(&cli.root, &node, false);
            ch.open(OpenMode::READ)?;
            println!("{} {}", style("Watching").cyan().bold(), node.path);
            let idle = idle_secs.map(Duration::from_secs);
            loop {
                if !ch.wait_ready(idle.unwrap_or(WATCH_TICK))? {
                    match idle {
                        Some(idle) => {
                            debug!("no publish for {:?}, stopping", idle);
                            break;
                        }
                        None => continue,
                    }
                }
                match ch.read_record() {
                    Ok(record) => print!("{}", format::render(&record)),
                    Err(e) if e.is_would_block() => continue,
                    Err(e) => eprintln!("{} {}", style("!").yellow(), e),
                }
                println!();
            }
        }
        Commands::Send { node, msg, dat, id } => {
            let dat = format::parse_json(&dat)?;
            let mut ch = channel(&cli.root, &node, true);
            ch.open(OpenMode::WRITE)?;
            match id {
                Some(id) => ch.send_message_with_id(&msg, &id, &dat)?,
                None => ch.send_message(&msg, &dat)?,
            }
            println!("{} sent '{}' -> {}", style("✓").green(), msg, node.path);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_would_block() => {
            eprintln!("{}", style("Nothing published yet (use --wait to block)").yellow());
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("{} {}", style("❌").red(), e);
            ExitCode::FAILURE
        }
    }
}
