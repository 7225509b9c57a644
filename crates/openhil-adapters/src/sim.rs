//! In-process loopback backend.
//!
//! `SimTransport` and `SimDevice` satisfy the adapter contracts without any
//! hardware: every call is recorded for inspection and telemetry batches
//! are injected by the caller through [`SimTransport::push_telemetry`].
//! The engine test suites run against this backend, and `hilctl` offers it
//! for dry runs of a specification.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use openhil_calibration::CalibrationPoint;

use crate::error::AdapterError;
use crate::types::{
    DeviceInfo, ReadingTaskConfig, SendingTask, SendingTaskInfo, TelemetryBatch,
    TelemetryCallback,
};
use crate::{DeviceUnderTest, TransportAdapter};

#[derive(Default)]
struct TransportState {
    connected: bool,
    uploads: Vec<String>,
    tasks: BTreeMap<String, SendingTask>,
    stopped: Vec<String>,
    next_task: u64,
    reading: Option<ReadingTaskConfig>,
    callback: Option<TelemetryCallback>,
}

/// Loopback transport; all state lives in-process.
#[derive(Default)]
pub struct SimTransport {
    state: Mutex<TransportState>,
}

impl SimTransport {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pre-seed an active sending task, as if left over from an earlier
    /// run.
    pub fn seed_task(&self, id: &str, task: SendingTask) {
        self.state.lock().tasks.insert(id.to_string(), task);
    }

    /// Deliver a telemetry batch to the registered read callback. Returns
    /// false when no read task is active yet.
    pub fn push_telemetry(&self, batch: TelemetryBatch) -> bool {
        let callback = self.state.lock().callback.clone();
        match callback {
            Some(callback) => {
                callback(batch);
                true
            }
            None => false,
        }
    }

    /// Whether the periodic read task has been configured.
    #[must_use]
    pub fn reading_started(&self) -> bool {
        self.state.lock().reading.is_some()
    }

    /// Uploaded bus-description sources, in order.
    #[must_use]
    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().uploads.clone()
    }

    /// Currently active tasks (started and not stopped).
    #[must_use]
    pub fn active_tasks(&self) -> BTreeMap<String, SendingTask> {
        self.state.lock().tasks.clone()
    }

    /// Every task id ever stopped, in order.
    #[must_use]
    pub fn stopped_tasks(&self) -> Vec<String> {
        self.state.lock().stopped.clone()
    }
}

#[async_trait]
impl TransportAdapter for SimTransport {
    async fn connect(&self) -> Result<(), AdapterError> {
        self.state.lock().connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        state.connected = false;
        state.callback = None;
        Ok(())
    }

    async fn upload_bus_description(&self, source: &str) -> Result<(), AdapterError> {
        debug!(source, "sim transport upload");
        self.state.lock().uploads.push(source.to_string());
        Ok(())
    }

    async fn sending_tasks(&self) -> Result<Vec<SendingTaskInfo>, AdapterError> {
        Ok(self
            .state
            .lock()
            .tasks
            .iter()
            .map(|(id, task)| SendingTaskInfo {
                id: id.clone(),
                destination_address: Some(task.destination_address.clone()),
            })
            .collect())
    }

    async fn start_sending_task(&self, task: SendingTask) -> Result<String, AdapterError> {
        let mut state = self.state.lock();
        // Refresh an existing task for the same message and destination
        // instead of piling up a second sender.
        let existing = state
            .tasks
            .iter()
            .find(|(_, active)| {
                active.message == task.message
                    && active.destination_address == task.destination_address
            })
            .map(|(id, _)| id.clone());
        let id = match existing {
            Some(id) => id,
            None => {
                state.next_task += 1;
                format!("send-{}", state.next_task)
            }
        };
        debug!(id = %id, message = %task.message, "sim transport sending task");
        state.tasks.insert(id.clone(), task);
        Ok(id)
    }

    async fn stop_sending_tasks(&self, ids: &[String]) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        for id in ids {
            if state.tasks.remove(id).is_none() {
                return Err(AdapterError::TaskNotFound(id.clone()));
            }
            state.stopped.push(id.clone());
        }
        Ok(())
    }

    async fn start_reading_task(
        &self,
        config: ReadingTaskConfig,
        callback: TelemetryCallback,
    ) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        state.reading = Some(config);
        state.callback = Some(callback);
        Ok(())
    }
}

/// Calls observed by a [`SimDevice`], in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SimDeviceCall {
    Connect,
    Reboot,
    PowerOn,
    PowerOff,
    Calibrate(String, f64),
    GetParameters,
    UpdateParameters(serde_json::Value),
    ReadRetainedMemory,
}

/// Loopback device; records every call.
pub struct SimDevice {
    info: DeviceInfo,
    parameters: Mutex<serde_json::Value>,
    calls: Mutex<Vec<SimDeviceCall>>,
}

impl SimDevice {
    #[must_use]
    pub fn new(info: DeviceInfo) -> Arc<Self> {
        Arc::new(Self {
            info,
            parameters: Mutex::new(serde_json::Value::Object(Default::default())),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Everything the engine asked of this device, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<SimDeviceCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: SimDeviceCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl DeviceUnderTest for SimDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        self.record(SimDeviceCall::Connect);
        Ok(())
    }

    async fn reboot(&self) -> Result<(), AdapterError> {
        self.record(SimDeviceCall::Reboot);
        Ok(())
    }

    async fn power_on(&self) -> Result<(), AdapterError> {
        self.record(SimDeviceCall::PowerOn);
        Ok(())
    }

    async fn power_off(&self) -> Result<(), AdapterError> {
        self.record(SimDeviceCall::PowerOff);
        Ok(())
    }

    async fn calibrate(&self, point: &CalibrationPoint, value: f64) -> Result<(), AdapterError> {
        self.record(SimDeviceCall::Calibrate(point.name.clone(), value));
        Ok(())
    }

    async fn get_parameters(&self) -> Result<serde_json::Value, AdapterError> {
        self.record(SimDeviceCall::GetParameters);
        Ok(self.parameters.lock().clone())
    }

    async fn update_parameters(
        &self,
        parameters: &serde_json::Value,
    ) -> Result<(), AdapterError> {
        self.record(SimDeviceCall::UpdateParameters(parameters.clone()));
        *self.parameters.lock() = parameters.clone();
        Ok(())
    }

    async fn read_retained_memory(&self) -> Result<Vec<u8>, AdapterError> {
        self.record(SimDeviceCall::ReadRetainedMemory);
        Ok(Vec::new())
    }
}
