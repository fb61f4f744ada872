//! `flightlink` - CLI for the flight recorder maintenance link
//!
//! This binary runs the device side of the link as a TCP simulator, and
//! provides companion commands to query a device and download its flights.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::Context;
use clap::Parser;

use flightlink::cli::{
    Cli, Command, ConfigCommand, DownloadCommand, ExportFormat, InfoCommand, InspectCommand,
    ListCommand, ServeCommand,
};
use flightlink::transport::TcpSerialPort;
use flightlink::{init_logging, server, Config, FlightFile, Kml, MaintenanceClient, Transport};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    let config_path = cli.config;
    let load = || Config::load_from(config_path.clone());

    match cli.command {
        Command::Serve(cmd) => handle_serve(load()?, cmd),
        Command::Info(cmd) => handle_info(&load()?, &cmd),
        Command::List(cmd) => handle_list(&load()?, &cmd),
        Command::Download(cmd) => handle_download(&load()?, &cmd),
        Command::Inspect(cmd) => handle_inspect(&cmd),
        // `config validate` reports problems itself instead of failing to load
        Command::Config(ConfigCommand::Validate { file }) => {
            handle_validate(file.or_else(|| config_path.clone()))
        }
        Command::Config(cmd) => handle_config(&load()?, cmd),
    }
}

fn connect(config: &Config, addr: Option<&str>) -> anyhow::Result<MaintenanceClient<TcpSerialPort>> {
    let addr = addr.unwrap_or(config.client.connect.as_str());
    let port = TcpSerialPort::connect(addr)?;
    Ok(MaintenanceClient::new(
        Transport::new(port, config.inter_byte_timeout()),
        config.response_timeout(),
    ))
}

fn handle_serve(mut config: Config, cmd: ServeCommand) -> anyhow::Result<()> {
    if let Some(listen) = cmd.listen {
        config.server.listen = listen;
    }
    if let Some(root) = cmd.root {
        config.storage.root = Some(root);
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    runtime.block_on(server::run_until_shutdown(config))?;
    Ok(())
}

fn handle_info(config: &Config, cmd: &InfoCommand) -> anyhow::Result<()> {
    let info = connect(config, cmd.connect.as_deref())?.device_infos()?;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("Device:    {}", info.name);
        println!("Board:     {}", info.board);
        println!("Firmware:  {}", info.firmware_version);
    }
    Ok(())
}

fn handle_list(config: &Config, cmd: &ListCommand) -> anyhow::Result<()> {
    let flights = connect(config, cmd.connect.as_deref())?.list_flights()?;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&flights)?);
    } else if flights.is_empty() {
        println!("No flights recorded.");
    } else {
        println!("{:<40} {:>10}", "NAME", "SIZE");
        for flight in &flights {
            println!("{:<40} {:>10}", flight.name, flight.size);
        }
    }
    Ok(())
}

fn handle_download(config: &Config, cmd: &DownloadCommand) -> anyhow::Result<()> {
    let flight = connect(config, cmd.connect.as_deref())?.read_flight(&cmd.name)?;
    let export = match cmd.format {
        ExportFormat::Json => flight.to_json()?,
        ExportFormat::Kml => flight.to_kml(),
    };
    match &cmd.output {
        Some(path) => {
            std::fs::write(path, export)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!(
                "Saved {} samples ({}s) to {}",
                flight.samples.len(),
                flight.duration().as_secs(),
                path.display()
            );
        }
        None => println!("{export}"),
    }
    Ok(())
}

fn handle_inspect(cmd: &InspectCommand) -> anyhow::Result<()> {
    let file = File::open(&cmd.file)
        .with_context(|| format!("failed to open {}", cmd.file.display()))?;
    let mut flight = FlightFile::from_reader(Path::new(&cmd.file), BufReader::new(file))?;
    let header = flight.header().clone();

    if cmd.kml {
        let entries = flight.collect::<std::io::Result<Vec<_>>>()?;
        println!("{}", Kml::new(&header, entries.iter().map(|entry| &entry.gnss)));
        return Ok(());
    }

    let entries = flight
        .by_ref()
        .take(cmd.limit)
        .collect::<std::io::Result<Vec<_>>>()?;
    let remaining = flight.count();
    let total = entries.len() + remaining;

    if cmd.json {
        let report = serde_json::json!({
            "start": header.timestamp.to_datetime(),
            "header": header,
            "entry_count": total,
            "entries": entries,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Flight log {}", cmd.file.display());
    println!("-----------{}", "-".repeat(cmd.file.display().to_string().len()));
    println!("Start:      {}", header.timestamp);
    println!("Glider:     {}", header.glider);
    println!("Period:     {} ms", header.period_ms);
    println!("Entries:    {total}");
    println!();
    for (i, entry) in entries.iter().enumerate() {
        println!(
            "{i:>5}  {:>10.5} {:>10.5}  alt {:>7.1} m  baro {:>7.1} m  {:>6.1} C  vz {:>5} cm/s",
            entry.gnss.latitude,
            entry.gnss.longitude,
            f64::from(entry.gnss.altitude) / 10.0,
            f64::from(entry.baro.altitude) / 10.0,
            f64::from(entry.baro.temperature) / 10.0,
            entry.sink_rate,
        );
    }
    if remaining > 0 {
        println!("  ... {remaining} more");
    }
    Ok(())
}

fn handle_validate(file: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = file.unwrap_or_else(Config::default_config_path);
    match Config::load_from(Some(path.clone())) {
        Ok(_) => {
            println!("Configuration is valid: {}", path.display());
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("{}: {e}", path.display())),
    }
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Device]");
                println!("  Name:                 {}", config.device.name);
                println!("  Board:                {}", config.device.board);
                println!();
                println!("[Link]");
                println!("  Inter-byte timeout:   {} ms", config.link.inter_byte_timeout_ms);
                println!(
                    "  Continuation timeout: {} ms",
                    config.link.continuation_timeout_ms
                );
                println!("  Idle poll:            {} ms", config.link.idle_poll_ms);
                println!("  Response timeout:     {} ms", config.link.response_timeout_ms);
                println!();
                println!("[Storage]");
                println!("  Root:                 {}", config.storage_root().display());
                println!();
                println!("[Network]");
                println!("  Listen:               {}", config.server.listen);
                println!("  Connect:              {}", config.client.connect);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => return handle_validate(file),
    }
    Ok(())
}
