//! Pyrope command-line front-end.
//!
//! The binary is the tooling surface of the profiler: it renders folded
//! stack traces into flame graphs (`--parse`), replays scripted scenarios
//! through the full sampling stack (`--simulate`), and manages the user
//! configuration file. Profiling a real program happens through the
//! embedding runtime, which drives `pyrope-engine` directly; every sampler
//! knob is accepted here so a rewritten child argv or a config file can
//! carry the complete session configuration.
//!
//! Exit codes: 0 success, 1 user/runtime error, 2 argument error.

mod config;
mod output;
mod render;
mod simulate;

use clap::Parser;
use pyrope_engine::{SamplerConfig, SaveOptions, SessionConfig, TimerSource};

use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pyrope")]
#[command(about = "Statistical sampling profiler for managed runtimes")]
#[command(version)]
struct Cli {
    /// Input file: a folded stack trace with --parse, or a program for a
    /// pyrope-enabled runtime
    input: Option<PathBuf>,

    /// Parse folded stack data and generate a flame graph SVG
    /// (e.g. `pyrope -p result.folded`)
    #[arg(short, long)]
    parse: bool,

    /// Run a code string instead of a file
    #[arg(short = 'c', value_name = "CODE")]
    code: Option<String>,

    /// Run a module instead of a file
    #[arg(short = 'm', value_name = "MODULE")]
    module: Option<String>,

    /// Sampling interval in microseconds (minimum 5)
    #[arg(long, default_value_t = 8000)]
    interval: u64,

    /// Print diagnostics and the sampler metrics table
    #[arg(long)]
    debug: bool,

    /// Chatty progress output (default)
    #[arg(long, overrides_with = "no_verbose")]
    verbose: bool,

    /// Suppress progress output
    #[arg(long)]
    no_verbose: bool,

    /// Keep full source paths in the flame graph
    #[arg(long)]
    full_path: bool,

    /// Drop frames from the runtime's frozen bootstrap modules
    #[arg(long)]
    ignore_frozen: bool,

    /// Keep the profiler's own frames in the stack traces
    #[arg(long)]
    include_pyrope: bool,

    /// Keep user code only: drop runtime-install and package frames
    #[arg(long)]
    focus_mode: bool,

    /// Keep only frames matching at least one pattern (repeatable)
    #[arg(long, value_name = "PATTERN")]
    regex_patterns: Vec<String>,

    /// Also save the folded stack text
    #[arg(long)]
    folded_save: bool,

    /// Destination of the folded stack text
    #[arg(long, default_value = "result.folded")]
    folded_file: PathBuf,

    /// Output file for the rendered SVG
    #[arg(short, long, default_value = "result.svg")]
    output: PathBuf,

    /// Merge child-process profiles into the root graph (default)
    #[arg(long, overrides_with = "no_merge")]
    merge: bool,

    /// Keep per-process outputs separate
    #[arg(long)]
    no_merge: bool,

    /// Seconds the root waits for child profiles
    #[arg(long, default_value_t = 10.0)]
    timeout: f64,

    /// Label frames with their call-site line instead of the definition
    /// line, splitting distinct call sites of the same function
    #[arg(long)]
    tree_mode: bool,

    /// Draw the flame graph upside down (icicle)
    #[arg(long)]
    inverted: bool,

    /// Timer source: "cpu" counts on-CPU time, "wall" counts real time
    #[arg(long, default_value = "cpu", value_name = "SOURCE")]
    time: String,

    /// Reverse the frame order of every stack when rendering
    #[arg(short, long)]
    reverse: bool,

    /// Print errors without the error chain
    #[arg(long)]
    disable_traceback: bool,

    /// Write an example configuration file and exit
    #[arg(long)]
    create_config: bool,

    /// Profile a scripted scenario JSON end-to-end (diagnostics aid)
    #[arg(long, value_name = "SCENARIO")]
    simulate: Option<PathBuf>,

    /// Internal: this process is a profiled spawn child
    #[arg(long, hide = true)]
    mp: bool,

    /// Internal: this process hosts the child-creation server
    #[arg(long, hide = true)]
    fork_server: bool,
}

impl Cli {
    fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let timer_source: TimerSource = self.time.parse()?;
        Ok(SessionConfig {
            sampler: SamplerConfig {
                interval_us: self.interval,
                ignore_frozen: self.ignore_frozen,
                ignore_self: !self.include_pyrope,
                tree_mode: self.tree_mode,
                focus_mode: self.focus_mode,
                regex_patterns: self.regex_patterns.clone(),
                timer_source,
            },
            save: SaveOptions {
                full_path: self.full_path,
                inverted: self.inverted,
                output: self.output.clone(),
                folded_save: self.folded_save,
                folded_file: self.folded_file.clone(),
                merge: self.merge || !self.no_merge,
                timeout: Duration::from_secs_f64(self.timeout),
                ..SaveOptions::default()
            },
            mp: self.mp,
            fork_server: self.fork_server,
            verbose: self.verbose || !self.no_verbose,
            debug: self.debug,
        })
    }
}

fn main() {
    env_logger::init();

    let mut argv: Vec<String> = std::env::args().collect();
    let merged = config::merge_with_args(&argv.split_off(1));
    let args = match Cli::try_parse_from(argv.into_iter().chain(merged)) {
        Ok(args) => args,
        Err(err) => err.exit(), // clap uses exit code 2 for usage errors
    };

    match run(&args) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            if args.disable_traceback {
                output::error(&err.to_string());
            } else {
                output::error(&format!("{err:#}"));
            }
            std::process::exit(1);
        }
    }
}

fn run(args: &Cli) -> anyhow::Result<i32> {
    if args.create_config {
        let path = config::create_example_config(false)?;
        output::success(&format!("created example configuration at {}", path.display()));
        return Ok(0);
    }

    if args.parse {
        let Some(input) = &args.input else {
            output::error("--parse needs a folded input file, e.g. `pyrope -p result.folded`");
            return Ok(2);
        };
        render::execute(input, &args.output, args.reverse, args.inverted)?;
        return Ok(0);
    }

    if let Some(scenario) = &args.simulate {
        let session = match args.session_config() {
            Ok(session) => session,
            Err(err) => {
                output::error(&err.to_string());
                return Ok(2);
            }
        };
        simulate::execute(scenario, session, args.debug)?;
        return Ok(0);
    }

    if args.input.is_some() || args.code.is_some() || args.module.is_some() {
        anyhow::bail!(
            "program execution is driven by the embedding runtime; \
             use a pyrope-enabled runtime to profile a program, \
             `--parse` to render a folded trace, or `--simulate` to \
             exercise the sampler"
        );
    }

    output::error("nothing to do: pass an input with --parse, or --simulate / --create-config");
    Ok(2)
}
