use crate::cli::ReadArgs;
use crate::exit_codes;
use crate::output::{self, format_secs};
use crate::settings;
use utm_stream::{Event, ReaderStats, StreamController, StreamError, TestSummary};

pub async fn execute(args: ReadArgs) -> i32 {
    let config = match settings::resolve(&args.settings) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let mut controller = match StreamController::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    if !args.json_summary {
        let session = controller.session();
        let quiet = args.quiet;
        controller.set_event_callback(move |event| {
            let sample_count = |id| {
                session
                    .read()
                    .get_test(id)
                    .map(|test| test.stats().count)
                    .unwrap_or(0)
            };
            if let Some(line) = format_event(event, quiet, sample_count) {
                println!("{}", line);
            }
        });
    }

    if let Err(e) = controller.start() {
        eprintln!("Error: {}", e);
        return error_exit_code(&e);
    }

    let cancel_token = controller.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, stopping acquisition");
            cancel_token.cancel();
        }
    });

    let result = controller.wait().await;

    let summaries = controller.session().read().summaries();
    let reader_stats = controller.reader_stats();
    if args.json_summary {
        if let Err(e) = output::print_json(&summaries) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    } else {
        print_summary(&summaries, &reader_stats);
    }

    match result {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            error_exit_code(&e)
        }
    }
}

/// One line per event, or `None` for events that are not shown
fn format_event(
    event: &Event,
    quiet: bool,
    sample_count: impl Fn(u64) -> u64,
) -> Option<String> {
    match event {
        Event::ConnectionChanged { state, detail } => Some(match detail {
            Some(detail) => format!("[CONNECTION] {} ({})", state, detail),
            None => format!("[CONNECTION] {}", state),
        }),
        Event::TestStarted { test_id, at } => Some(format!(
            "[TEST_START] Test {} @ {}",
            test_id,
            format_secs(at.as_secs_f64())
        )),
        Event::SampleReceived { test_id, sample } => (!quiet).then(|| {
            format!(
                "[SAMPLE] {} @ {} | Test {}",
                sample.value,
                format_secs(sample.at.as_secs_f64()),
                test_id
            )
        }),
        Event::TestCompleted {
            test_id,
            at,
            reason,
        } => Some(format!(
            "[TEST_COMPLETE] Test {} | {} samples | {} @ {}",
            test_id,
            sample_count(*test_id),
            reason,
            format_secs(at.as_secs_f64())
        )),
    }
}

fn print_summary(summaries: &[TestSummary], reader: &ReaderStats) {
    println!();
    println!(
        "{} test{}",
        summaries.len(),
        if summaries.len() == 1 { "" } else { "s" }
    );
    for summary in summaries {
        let stats = &summary.stats;
        let span = match summary.ended_at {
            Some(end) => format!(
                "{} - {}",
                format_secs(summary.started_at.as_secs_f64()),
                format_secs(end.as_secs_f64())
            ),
            None => format!("{} - active", format_secs(summary.started_at.as_secs_f64())),
        };
        println!(
            "  Test {}: n={} mean={:.4} peak={:.4} low={:.4} stdev={:.4} [{}]",
            summary.id, stats.count, stats.mean, stats.peak, stats.low, stats.stdev, span
        );
        if let Some(rate) = summary.estimated_rate_hz {
            println!("    ~{:.2} Hz", rate);
        }
    }
    println!(
        "Lines read: {}, samples: {}, rejected: {}, over-long: {}, connections: {}, reconnect attempts: {}",
        reader.lines_read,
        reader.samples_accepted,
        reader.lines_rejected,
        reader.lines_discarded,
        reader.connections,
        reader.reconnect_attempts
    );
}

fn error_exit_code(error: &StreamError) -> i32 {
    match error {
        StreamError::Connection(_)
        | StreamError::Network(_)
        | StreamError::Serial(_)
        | StreamError::Disconnected(_)
        | StreamError::Fatal(_)
        | StreamError::Io(_) => exit_codes::CONNECTION_ERROR,
        StreamError::InvalidConfig(_) | StreamError::Config(_) => exit_codes::INPUT_ERROR,
        _ => exit_codes::EXECUTION_ERROR,
    }
}
