use clap::Parser;

mod cli;
mod commands;
mod exit_codes;
mod output;
mod settings;

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level).format_timestamp(None);
    for module in &cli.debug {
        let target = match module.as_str() {
            "all" => "utm_stream".to_string(),
            name => format!("utm_stream::{}", name),
        };
        builder.filter_module(&target, log::LevelFilter::Debug);
    }
    builder.init();

    let exit_code = match cli.command {
        cli::Command::Read(args) => commands::read::execute(args).await,
        cli::Command::Ports(args) => commands::ports::execute(args),
        cli::Command::Config(args) => commands::config::execute(args),
    };

    std::process::exit(exit_code);
}
