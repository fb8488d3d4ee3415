//! Device/PLC orchestration receivers.
//!
//! Device commands compensate each other so a setup sequence can be run as a
//! [`Transaction`](crate::domain::transaction::Transaction): connect, set
//! parameters, start a program, and roll everything back if a step fails.

use crate::domain::command::{Command, Shared, lock};
use crate::error::{CommandError, UndoFailure};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("[{device}] not connected")]
    NotConnected { device: String },
    #[error("[{device}] program already running: {program}")]
    ProgramAlreadyRunning { device: String, program: String },
    #[error("[{device}] simulated {op:?} failure")]
    Simulated { device: String, op: DeviceOp },
}

/// Operations a device exposes, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceOp {
    Connect,
    Disconnect,
    SetParam,
    StartProgram,
    StopProgram,
}

/// How an injected failure behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Always,
    /// Fails the next `n` calls, then succeeds.
    Times(u32),
}

/// Receiver interface for PLC-like devices.
pub trait Device: Send {
    fn name(&self) -> &str;
    fn is_connected(&self) -> bool;
    fn connect(&mut self, timeout: Duration) -> Result<(), DeviceError>;
    fn disconnect(&mut self) -> Result<(), DeviceError>;
    fn param(&self, key: &str) -> Option<&Value>;
    /// Sets a parameter and returns its previous value.
    fn set_param(&mut self, key: &str, value: Value) -> Result<Option<Value>, DeviceError>;
    fn clear_param(&mut self, key: &str) -> Result<(), DeviceError>;
    fn running_program(&self) -> Option<&str>;
    fn start_program(&mut self, program: &str) -> Result<(), DeviceError>;
    fn stop_program(&mut self) -> Result<(), DeviceError>;
}

/// In-memory PLC stub with failure injection.
#[derive(Debug, Default)]
pub struct PlcDevice {
    name: String,
    connected: bool,
    params: BTreeMap<String, Value>,
    running_program: Option<String>,
    failures: HashMap<DeviceOp, FailureMode>,
}

impl PlcDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Makes `op` fail according to `mode`.
    pub fn fail_on(mut self, op: DeviceOp, mode: FailureMode) -> Self {
        self.failures.insert(op, mode);
        self
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    fn check_failure(&mut self, op: DeviceOp) -> Result<(), DeviceError> {
        let fail = match self.failures.get_mut(&op) {
            Some(FailureMode::Always) => true,
            Some(FailureMode::Times(0)) | None => false,
            Some(FailureMode::Times(n)) => {
                *n -= 1;
                true
            }
        };
        if fail {
            Err(DeviceError::Simulated {
                device: self.name.clone(),
                op,
            })
        } else {
            Ok(())
        }
    }

    fn require_connected(&self) -> Result<(), DeviceError> {
        if self.connected {
            Ok(())
        } else {
            Err(DeviceError::NotConnected {
                device: self.name.clone(),
            })
        }
    }
}

impl Device for PlcDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(&mut self, _timeout: Duration) -> Result<(), DeviceError> {
        self.check_failure(DeviceOp::Connect)?;
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        if !self.connected {
            return Ok(());
        }
        self.check_failure(DeviceOp::Disconnect)?;
        self.connected = false;
        Ok(())
    }

    fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    fn set_param(&mut self, key: &str, value: Value) -> Result<Option<Value>, DeviceError> {
        self.require_connected()?;
        self.check_failure(DeviceOp::SetParam)?;
        Ok(self.params.insert(key.to_string(), value))
    }

    fn clear_param(&mut self, key: &str) -> Result<(), DeviceError> {
        self.require_connected()?;
        self.params.remove(key);
        Ok(())
    }

    fn running_program(&self) -> Option<&str> {
        self.running_program.as_deref()
    }

    fn start_program(&mut self, program: &str) -> Result<(), DeviceError> {
        self.require_connected()?;
        self.check_failure(DeviceOp::StartProgram)?;
        if let Some(running) = &self.running_program {
            return Err(DeviceError::ProgramAlreadyRunning {
                device: self.name.clone(),
                program: running.clone(),
            });
        }
        self.running_program = Some(program.to_string());
        Ok(())
    }

    fn stop_program(&mut self) -> Result<(), DeviceError> {
        self.require_connected()?;
        self.check_failure(DeviceOp::StopProgram)?;
        self.running_program = None;
        Ok(())
    }
}

fn already_executed(description: &str) -> CommandError {
    CommandError::AlreadyExecuted {
        command: description.to_string(),
    }
}

/// Connects to a device; undo disconnects unless it was already connected.
pub struct ConnectCommand<D> {
    device: Shared<D>,
    timeout: Duration,
    description: String,
    was_connected: bool,
    executed: bool,
}

impl<D: Device> ConnectCommand<D> {
    pub fn new(device: &Shared<D>, timeout: Duration) -> Self {
        let description = format!("Connect({})", lock(device).name());
        Self {
            device: device.clone(),
            timeout,
            description,
            was_connected: false,
            executed: false,
        }
    }
}

#[async_trait]
impl<D: Device + 'static> Command for ConnectCommand<D> {
    fn description(&self) -> &str {
        &self.description
    }

    fn executed(&self) -> bool {
        self.executed
    }

    async fn execute(&mut self) -> Result<(), CommandError> {
        if self.executed {
            return Err(already_executed(&self.description));
        }
        {
            let mut device = lock(&self.device);
            let was_connected = device.is_connected();
            device
                .connect(self.timeout)
                .map_err(|e| CommandError::receiver(&self.description, e))?;
            self.was_connected = was_connected;
        }
        self.executed = true;
        Ok(())
    }

    async fn undo(&mut self) -> Result<(), UndoFailure> {
        if !self.executed {
            return Ok(());
        }
        if !self.was_connected {
            lock(&self.device)
                .disconnect()
                .map_err(|e| UndoFailure::new(&self.description, e))?;
        }
        self.executed = false;
        Ok(())
    }
}

/// Disconnects from a device. Reconnecting is not generally safe, so undo
/// only clears the executed flag.
pub struct DisconnectCommand<D> {
    device: Shared<D>,
    description: String,
    executed: bool,
}

impl<D: Device> DisconnectCommand<D> {
    pub fn new(device: &Shared<D>) -> Self {
        let description = format!("Disconnect({})", lock(device).name());
        Self {
            device: device.clone(),
            description,
            executed: false,
        }
    }
}

#[async_trait]
impl<D: Device + 'static> Command for DisconnectCommand<D> {
    fn description(&self) -> &str {
        &self.description
    }

    fn executed(&self) -> bool {
        self.executed
    }

    async fn execute(&mut self) -> Result<(), CommandError> {
        if self.executed {
            return Err(already_executed(&self.description));
        }
        lock(&self.device)
            .disconnect()
            .map_err(|e| CommandError::receiver(&self.description, e))?;
        self.executed = true;
        Ok(())
    }

    async fn undo(&mut self) -> Result<(), UndoFailure> {
        self.executed = false;
        Ok(())
    }
}

/// Sets a parameter; undo restores the previous value, or removes the
/// parameter if it did not exist before.
pub struct SetParameterCommand<D> {
    device: Shared<D>,
    key: String,
    value: Value,
    previous: Option<Value>,
    description: String,
    executed: bool,
}

impl<D: Device> SetParameterCommand<D> {
    pub fn new(device: &Shared<D>, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        let description = format!("SetParam({}.{key}={value})", lock(device).name());
        Self {
            device: device.clone(),
            key,
            value,
            previous: None,
            description,
            executed: false,
        }
    }
}

#[async_trait]
impl<D: Device + 'static> Command for SetParameterCommand<D> {
    fn description(&self) -> &str {
        &self.description
    }

    fn executed(&self) -> bool {
        self.executed
    }

    async fn execute(&mut self) -> Result<(), CommandError> {
        if self.executed {
            return Err(already_executed(&self.description));
        }
        let previous = lock(&self.device)
            .set_param(&self.key, self.value.clone())
            .map_err(|e| CommandError::receiver(&self.description, e))?;
        self.previous = previous;
        self.executed = true;
        Ok(())
    }

    async fn undo(&mut self) -> Result<(), UndoFailure> {
        if !self.executed {
            return Ok(());
        }
        let result = {
            let mut device = lock(&self.device);
            match self.previous.clone() {
                Some(previous) => device.set_param(&self.key, previous).map(|_| ()),
                None => device.clear_param(&self.key),
            }
        };
        result.map_err(|e| UndoFailure::new(&self.description, e))?;
        self.previous = None;
        self.executed = false;
        Ok(())
    }
}

/// Starts a program; undo stops it if it is still the running one.
pub struct StartProgramCommand<D> {
    device: Shared<D>,
    program: String,
    description: String,
    executed: bool,
}

impl<D: Device> StartProgramCommand<D> {
    pub fn new(device: &Shared<D>, program: impl Into<String>) -> Self {
        let program = program.into();
        let description = format!("StartProgram({}:{program})", lock(device).name());
        Self {
            device: device.clone(),
            program,
            description,
            executed: false,
        }
    }
}

#[async_trait]
impl<D: Device + 'static> Command for StartProgramCommand<D> {
    fn description(&self) -> &str {
        &self.description
    }

    fn executed(&self) -> bool {
        self.executed
    }

    async fn execute(&mut self) -> Result<(), CommandError> {
        if self.executed {
            return Err(already_executed(&self.description));
        }
        lock(&self.device)
            .start_program(&self.program)
            .map_err(|e| CommandError::receiver(&self.description, e))?;
        self.executed = true;
        Ok(())
    }

    async fn undo(&mut self) -> Result<(), UndoFailure> {
        if !self.executed {
            return Ok(());
        }
        let result = {
            let mut device = lock(&self.device);
            if device.running_program() == Some(self.program.as_str()) {
                device.stop_program()
            } else {
                Ok(())
            }
        };
        result.map_err(|e| UndoFailure::new(&self.description, e))?;
        self.executed = false;
        Ok(())
    }
}

/// Stops the running program; undo restarts whatever was running before.
pub struct StopProgramCommand<D> {
    device: Shared<D>,
    previous: Option<String>,
    description: String,
    executed: bool,
}

impl<D: Device> StopProgramCommand<D> {
    pub fn new(device: &Shared<D>) -> Self {
        let description = format!("StopProgram({})", lock(device).name());
        Self {
            device: device.clone(),
            previous: None,
            description,
            executed: false,
        }
    }
}

#[async_trait]
impl<D: Device + 'static> Command for StopProgramCommand<D> {
    fn description(&self) -> &str {
        &self.description
    }

    fn executed(&self) -> bool {
        self.executed
    }

    async fn execute(&mut self) -> Result<(), CommandError> {
        if self.executed {
            return Err(already_executed(&self.description));
        }
        let previous = {
            let mut device = lock(&self.device);
            let previous = device.running_program().map(str::to_string);
            device
                .stop_program()
                .map_err(|e| CommandError::receiver(&self.description, e))?;
            previous
        };
        self.previous = previous;
        self.executed = true;
        Ok(())
    }

    async fn undo(&mut self) -> Result<(), UndoFailure> {
        if !self.executed {
            return Ok(());
        }
        if let Some(program) = &self.previous {
            lock(&self.device)
                .start_program(program)
                .map_err(|e| UndoFailure::new(&self.description, e))?;
        }
        self.previous = None;
        self.executed = false;
        Ok(())
    }
}
