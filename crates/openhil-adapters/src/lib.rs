//! Transport and device capability contracts.
//!
//! The orchestration engine consumes — never implements — two
//! collaborators: a [`TransportAdapter`] that owns the bus connection and
//! the periodic send/read tasks living inside it, and a [`DeviceUnderTest`]
//! for power, calibration and parameter control of the ECU being
//! exercised. Every operation is an independently failable async call.
//!
//! The `sim` module ships an in-process loopback backend used by the test
//! suites and by dry runs; the real network/CAN backends live outside this
//! workspace.

#![deny(static_mut_refs)]

pub mod error;
pub mod sim;
pub mod types;

use async_trait::async_trait;

pub use error::AdapterError;
pub use types::{
    AdapterKind, DeviceInfo, MessageFilter, ReadingTaskConfig, SendingTask, SendingTaskInfo,
    SignalMapping, TelemetryBatch, TelemetryCallback, TelemetryRecord,
};

use openhil_calibration::CalibrationPoint;

/// Bus transport owning connection lifecycle and periodic tasks.
///
/// Periodic tasks live inside the transport process and survive until
/// explicitly stopped by id; the engine ledgers every started id and stops
/// them at run end.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    async fn connect(&self) -> Result<(), AdapterError>;

    async fn disconnect(&self) -> Result<(), AdapterError>;

    /// Upload one bus description artifact so the transport can decode
    /// incoming frames.
    async fn upload_bus_description(&self, source: &str) -> Result<(), AdapterError>;

    /// Currently active periodic send tasks.
    async fn sending_tasks(&self) -> Result<Vec<SendingTaskInfo>, AdapterError>;

    /// Start (or refresh) a periodic send task; returns its id.
    async fn start_sending_task(&self, task: SendingTask) -> Result<String, AdapterError>;

    async fn stop_sending_tasks(&self, ids: &[String]) -> Result<(), AdapterError>;

    /// Start the periodic telemetry read task. Decoded batches are handed
    /// to `callback`; producers must never block.
    async fn start_reading_task(
        &self,
        config: ReadingTaskConfig,
        callback: TelemetryCallback,
    ) -> Result<(), AdapterError>;
}

/// Control surface of the ECU being exercised.
#[async_trait]
pub trait DeviceUnderTest: Send + Sync {
    /// Static identity of the device.
    fn info(&self) -> &DeviceInfo;

    async fn connect(&self) -> Result<(), AdapterError>;

    async fn reboot(&self) -> Result<(), AdapterError>;

    async fn power_on(&self) -> Result<(), AdapterError>;

    async fn power_off(&self) -> Result<(), AdapterError>;

    /// Write one calibration point by memory address.
    async fn calibrate(&self, point: &CalibrationPoint, value: f64) -> Result<(), AdapterError>;

    async fn get_parameters(&self) -> Result<serde_json::Value, AdapterError>;

    async fn update_parameters(&self, parameters: &serde_json::Value)
    -> Result<(), AdapterError>;

    /// Read the device's retained memory image.
    async fn read_retained_memory(&self) -> Result<Vec<u8>, AdapterError>;
}
