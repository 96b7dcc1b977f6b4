use anyhow::Context;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "scpd",
    version,
    about = "Remote-side scp engine - speaks the scp wire protocol on stdin/stdout",
    long_about = "`scpd` is the remote half of an scp transfer: the process an SSH server \
executes when the far end runs `scp`. It speaks the classic rcp/scp wire protocol on \
stdin/stdout and logs to stderr, so it can be wired straight into an \"exec\" channel.

When invoked as a forced command with no mode flag, the original `scp <flags> <path>` \
request is taken from the SSH_ORIGINAL_COMMAND environment variable.

EXAMPLES:
    # Receive files into /data (what `scp file host:/data` execs remotely)
    scpd -t /data

    # Serve a directory tree to the peer (what `scp -r host:/data .` execs)
    scpd -r -f /data

    # Preserve modes and timestamps, require the target to be a directory
    scpd -p -d -t /data"
)]
struct Args {
    /// Act as the sink: receive from the peer into PATH
    #[arg(short = 't', long = "to", help_heading = "Mode")]
    to: bool,

    /// Act as the source: send PATH(s) to the peer
    #[arg(short = 'f', long = "from", help_heading = "Mode", conflicts_with = "to")]
    from: bool,

    /// Recurse into directories
    #[arg(short, long, help_heading = "Transfer options")]
    recursive: bool,

    /// Preserve modification times, access times and modes
    #[arg(short, long, help_heading = "Transfer options")]
    preserve: bool,

    /// Target must be an existing directory (sink only)
    #[arg(short = 'd', long = "target-directory", help_heading = "Transfer options")]
    target_directory: bool,

    /// Copy buffer size
    #[arg(
        long,
        default_value = "8KiB",
        value_name = "SIZE",
        help_heading = "Transfer options"
    )]
    buffer_size: bytesize::ByteSize,

    /// Print a transfer summary to stderr at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    // ARGUMENTS
    /// Target path (sink) or source pattern(s)
    #[arg()]
    paths: Vec<String>,
}

/// What this process was asked to do, from flags or a forced command.
#[derive(Debug)]
enum Invocation {
    Sink {
        settings: scpd::sink::Settings,
        target: String,
    },
    Source {
        settings: scpd::source::Settings,
        patterns: Vec<String>,
    },
}

fn resolve_invocation(args: &Args) -> anyhow::Result<Invocation> {
    let buffer_size = args.buffer_size.0 as usize;
    if args.to || args.from {
        if args.paths.is_empty() {
            return Err(anyhow::anyhow!("no paths given"));
        }
        if args.to {
            if args.paths.len() != 1 {
                return Err(anyhow::anyhow!("the sink takes exactly one target path"));
            }
            return Ok(Invocation::Sink {
                settings: scpd::sink::Settings {
                    recursive: args.recursive,
                    must_be_directory: args.target_directory,
                    preserve: args.preserve,
                    buffer_size,
                },
                target: args.paths[0].clone(),
            });
        }
        return Ok(Invocation::Source {
            settings: scpd::source::Settings {
                recursive: args.recursive,
                preserve: args.preserve,
                buffer_size,
            },
            patterns: args.paths.clone(),
        });
    }
    // forced-command deployments carry the peer's request in the environment
    if let Ok(original) = std::env::var("SSH_ORIGINAL_COMMAND") {
        let command = scpd::command::parse(&original)
            .with_context(|| format!("cannot serve forced command {original:?}"))?;
        tracing::info!("serving forced command {:?}", original);
        return Ok(match command.direction {
            scpd::command::Direction::Sink => Invocation::Sink {
                settings: command.sink_settings(buffer_size),
                target: command.target,
            },
            scpd::command::Direction::Source => Invocation::Source {
                settings: command.source_settings(buffer_size),
                patterns: vec![command.target],
            },
        });
    }
    Err(anyhow::anyhow!("one of -t or -f is required"))
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    // stdout carries the protocol; all human output goes to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let invocation = resolve_invocation(&args)?;
    let counters = common::events::Counters::new();
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let result = match invocation {
        Invocation::Sink { settings, target } => {
            let receiver = scpd::sink::Receiver::with_observer(stdin, stdout, settings, &counters);
            receiver
                .run(std::path::Path::new(&target))
                .await
                .context("receive failed")
        }
        Invocation::Source { settings, patterns } => {
            let sender = scpd::source::Sender::with_observer(stdin, stdout, settings, &counters);
            sender.run(&patterns).await.context("send failed")
        }
    };
    if args.summary {
        eprintln!("{}", counters.summary());
    }
    result
}
