use crate::cli::PortsArgs;
use crate::exit_codes;
use crate::output;

pub fn execute(args: PortsArgs) -> i32 {
    let ports = match utm_stream::list_serial_ports() {
        Ok(ports) => ports,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::CONNECTION_ERROR;
        }
    };

    if args.json {
        if let Err(e) = output::print_json(&ports) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    } else if ports.is_empty() {
        println!("No serial ports found");
    } else {
        for port in &ports {
            println!("{}", port);
        }
    }

    exit_codes::SUCCESS
}
