use crate::cli::SettingsArgs;
use utm_stream::source::DEFAULT_BAUD_RATE;
use utm_stream::{LoggerConfig, SegmentationConfig, SourceConfig};

/// Parse a `HOST:PORT` pair.
pub fn parse_host_port(value: &str) -> Result<(String, u16), String> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("Expected HOST:PORT, got '{}'", value))?;
    if host.is_empty() {
        return Err(format!("Missing host in '{}'", value));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| format!("Invalid port in '{}'", value))?;
    Ok((host.trim_matches(|c| c == '[' || c == ']').to_string(), port))
}

/// Source selected by flags, if any.
pub fn source_from_args(args: &SettingsArgs) -> Result<Option<SourceConfig>, String> {
    let given = [
        args.serial.is_some(),
        args.tcp.is_some(),
        args.socket.is_some(),
        args.file.is_some(),
    ]
    .iter()
    .filter(|given| **given)
    .count();
    if given > 1 {
        return Err("Only one of --serial, --tcp, --socket, --file may be given".to_string());
    }

    if let Some(port) = &args.serial {
        return Ok(Some(SourceConfig::serial(
            port.clone(),
            args.baud.unwrap_or(DEFAULT_BAUD_RATE),
        )));
    }
    if let Some(address) = &args.tcp {
        let (host, port) = parse_host_port(address)?;
        return Ok(Some(SourceConfig::Tcp { host, port }));
    }
    if let Some(path) = &args.socket {
        return Ok(Some(SourceConfig::Unix { path: path.clone() }));
    }
    if let Some(path) = &args.file {
        return Ok(Some(SourceConfig::File {
            path: path.clone(),
            interval_ms: args.interval_ms,
        }));
    }
    Ok(None)
}

/// Build and validate the acquisition config from a config file and flags.
pub fn resolve(args: &SettingsArgs) -> Result<LoggerConfig, String> {
    let mut config = match &args.config {
        Some(path) => LoggerConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => LoggerConfig::default(),
    };

    if let Some(source) = source_from_args(args)? {
        config.source = Some(source);
    }
    // A recording is replayed once, wherever it was configured
    if matches!(config.source, Some(SourceConfig::File { .. })) {
        config.reconnect.enabled = false;
    }
    if let (Some(baud), Some(SourceConfig::Serial { baud_rate, .. })) =
        (args.baud, config.source.as_mut())
    {
        *baud_rate = baud;
    }

    if let Some(threshold) = args.threshold_ms {
        config.segmentation = SegmentationConfig {
            multiplier: args.multiplier.unwrap_or(config.segmentation.multiplier),
            ..SegmentationConfig::fixed(std::time::Duration::from_millis(threshold))
        };
    }
    if let Some(interval) = args.expected_interval_ms {
        config.segmentation.expected_interval_ms = Some(interval);
    }
    if let Some(multiplier) = args.multiplier {
        config.segmentation.multiplier = multiplier;
    }
    if args.no_adaptive {
        config.segmentation.adaptive = false;
    }

    if args.no_reconnect {
        config.reconnect.enabled = false;
    }
    if let Some(interval) = args.reconnect_interval_ms {
        config.reconnect.interval_ms = interval;
    }
    if args.max_attempts.is_some() {
        config.reconnect.max_attempts = args.max_attempts;
    }
    if let Some(poll) = args.poll_ms {
        config.poll_interval_ms = poll;
    }

    if config.source.is_none() {
        return Err(
            "No source given. Use --serial, --tcp, --socket, --file or a --config file"
                .to_string(),
        );
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_host_port() {
        assert_eq!(
            parse_host_port("localhost:5000").unwrap(),
            ("localhost".to_string(), 5000)
        );
        assert_eq!(
            parse_host_port("[::1]:7000").unwrap(),
            ("::1".to_string(), 7000)
        );
        assert!(parse_host_port("localhost").is_err());
        assert!(parse_host_port(":5000").is_err());
        assert!(parse_host_port("host:99999").is_err());
    }

    #[test]
    fn test_serial_source_with_default_baud() {
        let args = SettingsArgs {
            serial: Some("/dev/ttyACM0".to_string()),
            ..Default::default()
        };
        let config = resolve(&args).unwrap();
        assert_eq!(
            config.source,
            Some(SourceConfig::serial("/dev/ttyACM0", 9600))
        );
        assert!(config.reconnect.enabled);
    }

    #[test]
    fn test_conflicting_sources_rejected() {
        let args = SettingsArgs {
            serial: Some("/dev/ttyACM0".to_string()),
            socket: Some("/tmp/utm.sock".to_string()),
            ..Default::default()
        };
        assert!(resolve(&args).is_err());
    }

    #[test]
    fn test_missing_source_rejected() {
        let err = resolve(&SettingsArgs::default()).unwrap_err();
        assert!(err.contains("No source"));
    }

    #[test]
    fn test_file_source_disables_reconnect() {
        let args = SettingsArgs {
            file: Some("run.txt".to_string()),
            interval_ms: 20,
            threshold_ms: Some(250),
            ..Default::default()
        };
        let config = resolve(&args).unwrap();
        assert!(!config.reconnect.enabled);
        assert!(!config.segmentation.adaptive);
        assert_eq!(config.segmentation.initial_threshold_ms, 250);
    }

    #[test]
    fn test_file_source_from_config_file_disables_reconnect() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "source": {{ "type": "file", "path": "run.txt", "interval_ms": 5 }},
                "reconnect": {{ "enabled": true, "interval_ms": 2000 }}
            }}"#
        )
        .unwrap();

        let args = SettingsArgs {
            config: Some(file.path().display().to_string()),
            ..Default::default()
        };
        let config = resolve(&args).unwrap();
        assert!(matches!(config.source, Some(SourceConfig::File { .. })));
        assert!(!config.reconnect.enabled);
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "source": {{ "type": "serial", "port": "/dev/ttyUSB0", "baud_rate": 9600 }},
                "segmentation": {{ "multiplier": 4.0, "max_threshold_ms": 800 }}
            }}"#
        )
        .unwrap();

        let args = SettingsArgs {
            config: Some(file.path().display().to_string()),
            baud: Some(115_200),
            multiplier: Some(2.5),
            no_reconnect: true,
            poll_ms: Some(50),
            ..Default::default()
        };
        let config = resolve(&args).unwrap();
        assert_eq!(
            config.source,
            Some(SourceConfig::serial("/dev/ttyUSB0", 115_200))
        );
        assert_eq!(config.segmentation.multiplier, 2.5);
        assert_eq!(config.segmentation.max_threshold_ms, 800);
        assert!(!config.reconnect.enabled);
        assert_eq!(config.poll_interval_ms, 50);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let args = SettingsArgs {
            tcp: Some("127.0.0.1:5000".to_string()),
            multiplier: Some(0.5),
            ..Default::default()
        };
        assert!(resolve(&args).is_err());
    }
}
