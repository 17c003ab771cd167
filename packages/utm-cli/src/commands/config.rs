use crate::cli::ConfigArgs;
use crate::exit_codes;
use crate::output;
use crate::settings;
use utm_stream::{LoggerConfig, SourceConfig};

pub fn execute(args: ConfigArgs) -> i32 {
    let config = match settings::resolve(&args.settings) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    if args.json {
        if let Err(e) = output::print_json(&config) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    } else {
        print_config(&config);
    }

    exit_codes::SUCCESS
}

fn print_config(config: &LoggerConfig) {
    let source = config
        .source
        .as_ref()
        .map(SourceConfig::describe)
        .unwrap_or_else(|| "none".to_string());
    println!("Source: {}", source);

    let seg = &config.segmentation;
    println!();
    println!("Segmentation:");
    match seg.expected_interval_ms {
        Some(interval) => println!("  Expected interval: {} ms", interval),
        None => println!("  Expected interval: unknown"),
    }
    println!(
        "  Initial threshold: {} ms",
        seg.initial_threshold().as_millis()
    );
    println!("  Multiplier: {}", seg.multiplier);
    println!(
        "  Threshold range: {}..{} ms",
        seg.min_threshold_ms, seg.max_threshold_ms
    );
    println!(
        "  Adaptive: {}",
        if seg.adaptive { "yes" } else { "no" }
    );

    let reconnect = &config.reconnect;
    println!();
    if reconnect.enabled {
        let attempts = reconnect
            .max_attempts
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unlimited".to_string());
        println!(
            "Reconnect: every {} ms, {} attempts",
            reconnect.interval_ms, attempts
        );
    } else {
        println!("Reconnect: disabled");
    }
    println!("Queue: {} events before warning", config.queue.capacity);
    println!("Poll interval: {} ms", config.poll_interval_ms);
}
