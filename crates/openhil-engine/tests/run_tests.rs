//! End-to-end runs against the in-process sim backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use openhil_adapters::sim::{SimDevice, SimDeviceCall, SimTransport};
use openhil_adapters::{DeviceInfo, SendingTask, TelemetryRecord};
use openhil_bus_protocol::{BusDescription, BusMessageDef};
use openhil_engine::{RunError, RunnerConfig, TestRunner};
use openhil_spec::{TestSpecRecord, TestSpecification, resolve_signals};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const BUS_SOURCE: &str = "powertrain.dbc";

fn bus_description() -> Result<BusDescription, serde_json::Error> {
    BusDescription::from_json(
        BUS_SOURCE,
        r#"{
            "EngineCmd": {
                "name": "EngineCmd", "id": 256, "length": 8, "class": "output",
                "period_ms": 20,
                "signals": {
                    "Torque": {
                        "name": "Torque", "position": 0, "length": 16,
                        "factor": 0.5, "offset": 0.0, "min": 0.0, "max": 1000.0
                    },
                    "EngineCmd_CNT": {
                        "name": "EngineCmd_CNT", "position": 48, "length": 4,
                        "factor": 1.0, "offset": 0.0, "min": 0.0, "max": 15.0
                    },
                    "EngineCmd_CRC": {
                        "name": "EngineCmd_CRC", "position": 56, "length": 8,
                        "factor": 1.0, "offset": 0.0, "min": 0.0, "max": 255.0
                    }
                }
            },
            "EngineStatus": {
                "name": "EngineStatus", "id": 257, "length": 8, "class": "input",
                "signals": {
                    "Rpm": {
                        "name": "Rpm", "position": 0, "length": 16,
                        "factor": 1.0, "offset": 0.0, "min": 0.0, "max": 8000.0
                    }
                }
            }
        }"#,
    )
}

fn calibration() -> Result<openhil_calibration::CalibrationDescription, serde_json::Error> {
    openhil_calibration::CalibrationDescription::from_json(
        "engine.a2l",
        r#"{
            "IdleRpm": {
                "name": "IdleRpm", "address": "0x4000", "lower_limit": "600",
                "upper_limit": "1100", "record_layout": "Scalar_U16"
            }
        }"#,
    )
}

fn catalog() -> Result<BTreeMap<String, BusMessageDef>, serde_json::Error> {
    Ok(bus_description()?.messages)
}

fn load_spec(json: &str) -> Result<TestSpecification, Box<dyn std::error::Error>> {
    let record: TestSpecRecord = serde_json::from_str(json)?;
    let buses = [bus_description()?];
    let calibration = calibration()?;
    let signals = resolve_signals(&record.used_signals, &buses, Some(&calibration))?;
    Ok(TestSpecification::from_record(&record, &signals)?)
}

fn device(serial: &str, address: &str) -> Arc<SimDevice> {
    SimDevice::new(DeviceInfo {
        serial: serial.to_string(),
        channel: "can0".to_string(),
        source_address: address.to_string(),
        product: "ecu".to_string(),
        firmware: "1.0.0".to_string(),
    })
}

fn runner(
    transport: &Arc<SimTransport>,
    dut: &Arc<SimDevice>,
    log_dir: &std::path::Path,
    e2e: bool,
) -> Result<TestRunner, serde_json::Error> {
    let config = RunnerConfig {
        log_dir: log_dir.to_path_buf(),
        e2e_protection: e2e,
        read_interval_ms: 10,
    };
    Ok(TestRunner::new(
        config,
        transport.clone(),
        dut.clone(),
        catalog()?,
        vec![BUS_SOURCE.to_string()],
    ))
}

/// Push `rpm` telemetry batches until the run tears the read task down.
fn spawn_rpm_pusher(transport: Arc<SimTransport>, rpm: f64) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !transport.reading_started() {
            thread::sleep(Duration::from_millis(2));
        }
        loop {
            let batch = vec![TelemetryRecord {
                message: "EngineStatus".to_string(),
                signals: [("Rpm".to_string(), rpm)].into_iter().collect(),
            }];
            if !transport.push_telemetry(batch) {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
    })
}

fn monitored_ramp_spec() -> &'static str {
    r#"{
        "name": "hold rpm",
        "dscr": "expect 800 rpm during the hold step",
        "xray_id": "HIL-RPM-1",
        "used_signals": ["EngineCmd_Torque", "EngineStatus_Rpm"],
        "initial_state": {
            "type": "common", "action": "quiesce", "duration_ms": 20.0
        },
        "steps": [
            {
                "type": "common", "action": "hold", "duration_ms": 300.0,
                "control_signals": {
                    "EngineCmd_Torque": {"form": "constant", "coef": [50.0]}
                },
                "monitored_signals": {
                    "EngineStatus_Rpm": {
                        "monitored_ranges": [
                            {"start_ms": 0.0, "stop_ms": 10000.0, "tolerance": 5.0}
                        ],
                        "form": "constant", "coef": [800.0]
                    }
                },
                "logged_signals": {"EngineStatus_Rpm": {}}
            }
        ]
    }"#
}

#[test]
fn run_with_no_telemetry_passes() -> TestResult {
    let dir = tempfile::tempdir()?;
    let transport = SimTransport::new();
    let dut = device("SN-1", "27");
    let spec = load_spec(monitored_ramp_spec())?;

    let report = runner(&transport, &dut, dir.path(), false)?.run(spec)?;

    // No telemetry means no faults, and no faults means a pass.
    assert!(report.passed);
    assert!(report.step_outcomes.iter().all(|outcome| outcome.passed));

    let log = std::fs::read_to_string(&report.run_log)?;
    assert!(log.contains("Test ID: HIL-RPM-1"));
    assert!(log.contains("Step 0: quiesce"));
    assert!(log.contains("Step 1: hold"));
    assert!(log.contains("Test status: true"));

    // Description artifacts were uploaded and the stimulus task was
    // started, then stopped at run end.
    assert_eq!(transport.uploads(), vec![BUS_SOURCE.to_string()]);
    assert!(transport.active_tasks().is_empty());
    assert_eq!(transport.stopped_tasks().len(), 1);
    Ok(())
}

#[test]
fn tolerance_violation_fails_the_run() -> TestResult {
    let dir = tempfile::tempdir()?;
    let transport = SimTransport::new();
    let dut = device("SN-1", "27");
    let spec = load_spec(monitored_ramp_spec())?;

    let pusher = spawn_rpm_pusher(transport.clone(), 900.0);
    let report = runner(&transport, &dut, dir.path(), false)?.run(spec)?;
    pusher
        .join()
        .map_err(|_| "telemetry pusher panicked")?;

    assert!(!report.passed);
    let hold = report
        .step_outcomes
        .iter()
        .find(|outcome| outcome.number == 1)
        .ok_or("missing step 1 outcome")?;
    assert!(!hold.passed);
    assert!(!hold.faults.is_empty());
    assert_eq!(hold.faults[0].signal, "EngineStatus_Rpm");
    assert_eq!(hold.faults[0].expected, 800.0);

    let log = std::fs::read_to_string(&report.run_log)?;
    assert!(log.contains("ERROR - the signal EngineStatus_Rpm"));
    assert!(log.contains("Step status: false"));
    assert!(log.contains("Test status: false"));

    // The logged signal reached the CSV with its header.
    let csv = std::fs::read_to_string(&report.telemetry_log)?;
    assert!(csv.starts_with("timestamp,EngineStatus_Rpm,"));
    assert!(csv.lines().count() > 1);
    Ok(())
}

#[test]
fn in_tolerance_telemetry_passes() -> TestResult {
    let dir = tempfile::tempdir()?;
    let transport = SimTransport::new();
    let dut = device("SN-1", "27");
    let spec = load_spec(monitored_ramp_spec())?;

    // 5% of 800 is 40; 835 stays inside the bound.
    let pusher = spawn_rpm_pusher(transport.clone(), 835.0);
    let report = runner(&transport, &dut, dir.path(), false)?.run(spec)?;
    pusher
        .join()
        .map_err(|_| "telemetry pusher panicked")?;

    assert!(report.passed);
    Ok(())
}

#[test]
fn special_steps_dispatch_to_the_device() -> TestResult {
    let dir = tempfile::tempdir()?;
    let transport = SimTransport::new();
    let dut = device("SN-1", "27");
    let spec = load_spec(
        r#"{
            "name": "device control",
            "dscr": "exercise out-of-band actions",
            "xray_id": "HIL-DEV-1",
            "used_signals": [],
            "initial_state": {"type": "common", "action": "quiesce", "duration_ms": 10.0},
            "steps": [
                {"type": "special", "action": "identify", "duration_ms": 10.0,
                 "step_action": "get_info"},
                {"type": "special", "action": "power down", "duration_ms": 10.0,
                 "step_action": "power_off"},
                {"type": "special", "action": "tune", "duration_ms": 10.0,
                 "step_action": "update_parameters",
                 "action_details": {"idle_rpm": 750}},
                {"type": "special", "action": "snapshot", "duration_ms": 10.0,
                 "step_action": "get_fram"}
            ]
        }"#,
    )?;

    let report = runner(&transport, &dut, dir.path(), false)?.run(spec)?;
    assert!(report.passed);

    let calls = dut.calls();
    assert!(calls.contains(&SimDeviceCall::Reboot));
    assert!(calls.contains(&SimDeviceCall::PowerOff));
    assert!(calls.contains(&SimDeviceCall::UpdateParameters(
        serde_json::json!({"idle_rpm": 750})
    )));
    assert!(calls.contains(&SimDeviceCall::ReadRetainedMemory));

    let log = std::fs::read_to_string(&report.run_log)?;
    assert!(log.contains("serial=SN-1"));
    Ok(())
}

#[test]
fn unimplemented_action_aborts_the_run() -> TestResult {
    let dir = tempfile::tempdir()?;
    let transport = SimTransport::new();
    let dut = device("SN-1", "27");
    let spec = load_spec(
        r#"{
            "name": "flash",
            "dscr": "firmware update is declared but unimplemented",
            "xray_id": "HIL-FW-1",
            "used_signals": [],
            "initial_state": {"type": "common", "action": "quiesce", "duration_ms": 10.0},
            "steps": [
                {"type": "special", "action": "flash", "duration_ms": 10.0,
                 "step_action": "update_firmware"}
            ]
        }"#,
    )?;

    // run() joins both threads before returning, so an Err here also
    // proves the monitor was released.
    let result = runner(&transport, &dut, dir.path(), false)?.run(spec);
    assert!(matches!(result, Err(RunError::UnsupportedAction(_))));
    Ok(())
}

#[test]
fn calibration_controls_write_through_the_device() -> TestResult {
    let dir = tempfile::tempdir()?;
    let transport = SimTransport::new();
    let dut = device("SN-1", "27");
    let spec = load_spec(
        r#"{
            "name": "set idle",
            "dscr": "calibration stimulus",
            "xray_id": "HIL-CAL-1",
            "used_signals": ["a2l_IdleRpm"],
            "initial_state": {"type": "common", "action": "quiesce", "duration_ms": 10.0},
            "steps": [
                {"type": "common", "action": "set idle", "duration_ms": 10.0,
                 "control_signals": {
                     "a2l_IdleRpm": {"form": "constant", "coef": [700.0]}
                 }}
            ]
        }"#,
    )?;

    let report = runner(&transport, &dut, dir.path(), false)?.run(spec)?;
    assert!(report.passed);
    assert!(
        dut.calls()
            .contains(&SimDeviceCall::Calibrate("IdleRpm".to_string(), 700.0))
    );
    // Calibration writes never become periodic bus tasks.
    assert!(transport.stopped_tasks().is_empty());
    Ok(())
}

#[test]
fn leftover_tasks_for_the_device_are_stopped_first() -> TestResult {
    let dir = tempfile::tempdir()?;
    let transport = SimTransport::new();
    let dut = device("SN-1", "27");

    let stale = SendingTask {
        message: "EngineCmd".to_string(),
        frame_id: 256,
        channel: "can0".to_string(),
        source_address: "FE".to_string(),
        destination_address: "27".to_string(),
        signals: BTreeMap::new(),
        e2e_protection: false,
        period_ms: 20,
    };
    transport.seed_task("stale-1", stale.clone());
    let mut unrelated = stale;
    unrelated.destination_address = "99".to_string();
    transport.seed_task("other-1", unrelated);

    let spec = load_spec(monitored_ramp_spec())?;
    let report = runner(&transport, &dut, dir.path(), false)?.run(spec)?;
    assert!(report.passed);

    // The stale task addressed to our DUT went away before the run; the
    // unrelated destination survived untouched.
    assert!(transport.stopped_tasks().contains(&"stale-1".to_string()));
    assert!(transport.active_tasks().contains_key("other-1"));
    Ok(())
}

#[test]
fn e2e_runs_route_stimulus_through_the_gateway() -> TestResult {
    let dir = tempfile::tempdir()?;
    let transport = SimTransport::new();
    let dut = device("SN-1", "27");
    let gateway = device("SN-GW", "45");
    let spec = load_spec(monitored_ramp_spec())?;

    let report = runner(&transport, &dut, dir.path(), true)?
        .with_gateway(gateway.clone())
        .run(spec)?;
    assert!(report.passed);

    let stopped = transport.stopped_tasks();
    assert_eq!(stopped.len(), 1);
    // Gateway connected and the task was addressed to it with protection.
    assert!(gateway.calls().contains(&SimDeviceCall::Connect));
    Ok(())
}

#[test]
fn e2e_without_protection_signals_is_a_configuration_error() -> TestResult {
    let dir = tempfile::tempdir()?;
    let transport = SimTransport::new();
    let dut = device("SN-1", "27");

    // A catalog whose message lacks _CNT/_CRC signals.
    let mut catalog = catalog()?;
    if let Some(message) = catalog.get_mut("EngineCmd") {
        message.signals.retain(|name, _| !name.ends_with("_CNT") && !name.ends_with("_CRC"));
    }
    let config = RunnerConfig {
        log_dir: dir.path().to_path_buf(),
        e2e_protection: true,
        read_interval_ms: 10,
    };
    let runner = TestRunner::new(
        config,
        transport.clone(),
        dut.clone(),
        catalog,
        vec![BUS_SOURCE.to_string()],
    );

    let spec = load_spec(monitored_ramp_spec())?;
    let result = runner.run(spec);
    assert!(matches!(result, Err(RunError::Encode(_))));
    Ok(())
}
