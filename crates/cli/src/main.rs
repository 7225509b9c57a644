//! hilctl - ECU test specification runner
//!
//! Loads bus/calibration descriptions and a test specification, connects a
//! transport backend and a device under test, and executes the
//! specification to a pass/fail verdict. The process exits non-zero
//! whenever a step failed or an unrecoverable error occurred.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]

mod error;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use openhil_adapters::sim::{SimDevice, SimTransport};
use openhil_adapters::{AdapterError, AdapterKind, DeviceInfo, DeviceUnderTest, TransportAdapter};
use openhil_bus_protocol::{BusDescription, BusMessageDef};
use openhil_calibration::CalibrationDescription;
use openhil_engine::{RunError, RunnerConfig, TestRunner};
use openhil_spec::{SpecError, TestSpecRecord, TestSpecification, resolve_signals};

use crate::error::CliError;

#[derive(Parser)]
#[command(name = "hilctl")]
#[command(about = "OpenHIL test runner - drive ECU test specifications over a CAN-like bus")]
#[command(version)]
struct Cli {
    /// Test specification JSON file
    #[arg(long)]
    spec: PathBuf,

    /// Bus description JSON file (repeatable)
    #[arg(long = "bus", required = true)]
    bus: Vec<PathBuf>,

    /// Calibration description JSON file
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Transport backend
    #[arg(long, default_value = "sim")]
    adapter: String,

    /// Serial number of the device under test
    #[arg(long)]
    serial: String,

    /// CAN channel the device is attached to
    #[arg(long, default_value = "can0")]
    channel: String,

    /// Bus source address of the device under test
    #[arg(long, default_value = "27")]
    address: String,

    /// Apply end-to-end protection to outgoing frames
    #[arg(long)]
    e2e_protection: bool,

    /// Serial number of the gateway device handling protected frames
    #[arg(long)]
    e2e_gateway: Option<String>,

    /// Directory receiving the run log and telemetry CSV
    #[arg(long, default_value = "logs")]
    log_path: PathBuf,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("hilctl={log_level},openhil={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match execute(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("test failed");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<CliError>().is_some() || err.downcast_ref::<SpecError>().is_some() {
        return 2;
    }
    if err.downcast_ref::<AdapterError>().is_some() {
        return 3;
    }
    if let Some(run) = err.downcast_ref::<RunError>() {
        return match run {
            RunError::Adapter(_) => 3,
            _ => 4,
        };
    }
    1
}

fn read_to_string(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::ReadFile {
        path: path.display().to_string(),
        source,
    })
}

fn load_bus_descriptions(paths: &[PathBuf]) -> Result<Vec<BusDescription>, CliError> {
    paths
        .iter()
        .map(|path| {
            let source = path
                .file_name()
                .map_or_else(|| path.display().to_string(), |name| {
                    name.to_string_lossy().into_owned()
                });
            let json = read_to_string(path)?;
            BusDescription::from_json(&source, &json).map_err(|parse| CliError::ParseFile {
                path: path.display().to_string(),
                source: parse,
            })
        })
        .collect()
}

fn load_calibration(path: &Path) -> Result<CalibrationDescription, CliError> {
    let source = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |name| {
            name.to_string_lossy().into_owned()
        });
    let json = read_to_string(path)?;
    CalibrationDescription::from_json(&source, &json).map_err(|parse| CliError::ParseFile {
        path: path.display().to_string(),
        source: parse,
    })
}

fn load_specification(
    path: &Path,
    buses: &[BusDescription],
    calibration: Option<&CalibrationDescription>,
) -> Result<TestSpecification> {
    let json = read_to_string(path)?;
    let record: TestSpecRecord =
        serde_json::from_str(&json).map_err(|parse| CliError::ParseFile {
            path: path.display().to_string(),
            source: parse,
        })?;
    let signals = resolve_signals(&record.used_signals, buses, calibration)?;
    Ok(TestSpecification::from_record(&record, &signals)?)
}

fn connect_backend(
    kind: AdapterKind,
    cli: &Cli,
) -> Result<(Arc<dyn TransportAdapter>, Arc<dyn DeviceUnderTest>, Option<Arc<dyn DeviceUnderTest>>), AdapterError>
{
    match kind {
        AdapterKind::Sim => {
            let transport: Arc<dyn TransportAdapter> = SimTransport::new();
            let dut: Arc<dyn DeviceUnderTest> = SimDevice::new(DeviceInfo {
                serial: cli.serial.clone(),
                channel: cli.channel.clone(),
                source_address: cli.address.clone(),
                product: "sim".to_string(),
                firmware: "sim".to_string(),
            });
            let gateway = cli.e2e_gateway.as_ref().map(|serial| {
                SimDevice::new(DeviceInfo {
                    serial: serial.clone(),
                    channel: cli.channel.clone(),
                    source_address: format!("{}-gw", cli.address),
                    product: "sim".to_string(),
                    firmware: "sim".to_string(),
                }) as Arc<dyn DeviceUnderTest>
            });
            Ok((transport, dut, gateway))
        }
        // The remaining backends live in external adapter processes.
        other => Err(AdapterError::UnsupportedBackend(other.to_string())),
    }
}

fn execute(cli: &Cli) -> Result<bool> {
    let buses = load_bus_descriptions(&cli.bus)?;
    let calibration = cli
        .calibration
        .as_deref()
        .map(load_calibration)
        .transpose()?;
    let spec = load_specification(&cli.spec, &buses, calibration.as_ref())?;

    let mut catalog: BTreeMap<String, BusMessageDef> = BTreeMap::new();
    let mut descriptions = Vec::with_capacity(buses.len());
    for bus in buses {
        descriptions.push(bus.source.clone());
        catalog.extend(bus.messages);
    }

    let kind = AdapterKind::from_str(&cli.adapter)?;
    let (transport, dut, gateway) = connect_backend(kind, cli)?;

    let config = RunnerConfig {
        log_dir: cli.log_path.clone(),
        e2e_protection: cli.e2e_protection,
        read_interval_ms: 100,
    };
    let mut runner = TestRunner::new(config, transport, dut, catalog, descriptions);
    if let Some(gateway) = gateway {
        runner = runner.with_gateway(gateway);
    }

    info!(test = %spec.id, "executing specification");
    let report = runner.run(spec)?;
    info!(
        passed = report.passed,
        run_log = %report.run_log.display(),
        telemetry_log = %report.telemetry_log.display(),
        "run complete"
    );
    for outcome in &report.step_outcomes {
        info!(
            step = outcome.number,
            action = %outcome.action,
            passed = outcome.passed,
            faults = outcome.faults.len(),
            "step outcome"
        );
    }
    Ok(report.passed)
}
