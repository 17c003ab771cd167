use clap::{Args, Parser, Subcommand};

/// Library modules accepted by `--debug`
pub const DEBUG_MODULES: [&str; 9] = [
    "reader",
    "segmenter",
    "session",
    "source",
    "buffer",
    "stats",
    "parser",
    "controller",
    "all",
];

#[derive(Parser)]
#[command(
    name = "utm-logger",
    version,
    about = "Universal testing machine data logger",
    long_about = "Read measurements from a universal testing machine over a serial link or socket,\n\
                  split them into tests by gap timing and print per-test statistics.\n\
                  Sources can also be given with $UTM_PORT, $UTM_HOST or $UTM_SOCKET."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Enable debug logging for library modules (e.g. reader,segmenter or all)
    #[arg(long, value_delimiter = ',', value_parser = DEBUG_MODULES, global = true)]
    pub debug: Vec<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Acquire samples and print tests as they happen
    Read(ReadArgs),
    /// List available serial ports
    Ports(PortsArgs),
    /// Print the resolved configuration
    Config(ConfigArgs),
}

/// Source selection and tuning shared by `read` and `config`
#[derive(Args, Default)]
pub struct SettingsArgs {
    /// JSON configuration file; flags override its values
    #[arg(long)]
    pub config: Option<String>,

    /// Serial port of the machine (e.g. /dev/ttyACM0)
    #[arg(long, env = "UTM_PORT")]
    pub serial: Option<String>,

    /// Serial baud rate [default: 9600]
    #[arg(long, env = "UTM_BAUD")]
    pub baud: Option<u32>,

    /// TCP source as HOST:PORT
    #[arg(long, env = "UTM_HOST")]
    pub tcp: Option<String>,

    /// Unix domain socket of a machine simulator
    #[arg(long, env = "UTM_SOCKET")]
    pub socket: Option<String>,

    /// Replay a recorded session, one value per line
    #[arg(long)]
    pub file: Option<String>,

    /// Delay between replayed lines in milliseconds
    #[arg(long, default_value_t = 100)]
    pub interval_ms: u64,

    /// Use a fixed gap threshold in milliseconds instead of the adaptive one
    #[arg(long, conflicts_with = "expected_interval_ms")]
    pub threshold_ms: Option<u64>,

    /// Nominal interval between samples in milliseconds
    #[arg(long)]
    pub expected_interval_ms: Option<u64>,

    /// Gap threshold as a multiple of the sample interval
    #[arg(long)]
    pub multiplier: Option<f64>,

    /// Keep the initial gap threshold for the whole test
    #[arg(long, default_value_t = false)]
    pub no_adaptive: bool,

    /// Do not reconnect after the source disconnects
    #[arg(long, default_value_t = false)]
    pub no_reconnect: bool,

    /// Delay between reconnect attempts in milliseconds
    #[arg(long)]
    pub reconnect_interval_ms: Option<u64>,

    /// Give up after this many reconnect attempts
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Consumer poll interval in milliseconds
    #[arg(long)]
    pub poll_ms: Option<u64>,
}

#[derive(Args)]
pub struct ReadArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Print only a JSON summary of all tests at exit
    #[arg(long, default_value_t = false)]
    pub json_summary: bool,

    /// Do not print individual samples
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct PortsArgs {
    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Output as JSON (usable with --config)
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
