//! Shared test support: a scripted fake axis on the loopback bus

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use voltage_cansimple::codec::{sdo_endpoint_id, SDO_OPCODE_READ, SDO_OPCODE_WRITE};
use voltage_cansimple::{CanFrame, EndpointValue, LoopbackBus, Opcode};

/// Install a test subscriber honoring RUST_LOG; repeated calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build a heartbeat frame for direct bus injection
pub fn heartbeat_frame(node_id: u8, axis_state: u8, axis_error: u32) -> CanFrame {
    let mut data = Vec::with_capacity(8);
    data.extend_from_slice(&axis_error.to_le_bytes());
    data.push(axis_state);
    data.push(0); // procedure result
    data.push(0); // trajectory done
    data.push(0); // padding
    CanFrame::new(node_id, Opcode::Heartbeat, data)
}

/// Configuration for a scripted fake axis
#[derive(Clone)]
pub struct FakeAxisConfig {
    pub node_id: u8,
    /// Hardware version bytes (product line, version, variant)
    pub hw: (u8, u8, u8),
    /// Firmware version bytes (major, minor, revision)
    pub fw: (u8, u8, u8),
    pub initial_state: u8,
    /// Error bitmask reported in heartbeats until Clear_Errors arrives
    pub error_bitmask: u32,
    /// Emit a heartbeat immediately after every Set_Axis_State
    pub auto_heartbeat: bool,
    /// Emit unsolicited heartbeats at this period
    pub heartbeat_period: Option<Duration>,
    /// Echo a TxSdo acknowledgement after every SDO write (real devices
    /// leave writes unacknowledged)
    pub send_write_ack: bool,
    /// Endpoint values before any write
    pub initial_values: HashMap<u16, EndpointValue>,
    /// Writes to these endpoints are silently ignored
    pub reject_writes: HashSet<u16>,
    /// Readbacks for these endpoints return a fixed value
    pub readback_overrides: HashMap<u16, EndpointValue>,
    /// Ignore all requests (simulates an unreachable node)
    pub mute: bool,
}

impl FakeAxisConfig {
    pub fn new(node_id: u8) -> Self {
        FakeAxisConfig {
            node_id,
            hw: (4, 4, 58),
            fw: (0, 6, 8),
            initial_state: 1,
            error_bitmask: 0,
            auto_heartbeat: true,
            heartbeat_period: None,
            send_write_ack: false,
            initial_values: HashMap::new(),
            reject_writes: HashSet::new(),
            readback_overrides: HashMap::new(),
            mute: false,
        }
    }
}

/// Handle onto a running fake axis
pub struct FakeAxis {
    /// Every host frame addressed to this node, in arrival order
    pub log: Arc<Mutex<Vec<CanFrame>>>,
    task: JoinHandle<()>,
}

impl FakeAxis {
    /// Host frames logged so far with the given opcode
    pub fn logged(&self, opcode: Opcode) -> Vec<CanFrame> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.opcode() == Some(opcode))
            .cloned()
            .collect()
    }

    /// Endpoint ids of logged SDO writes, in arrival order
    pub fn write_order(&self) -> Vec<u16> {
        self.logged(Opcode::RxSdo)
            .iter()
            .filter(|f| f.data.first() == Some(&SDO_OPCODE_WRITE))
            .map(|f| sdo_endpoint_id(&f.data).unwrap())
            .collect()
    }
}

impl Drop for FakeAxis {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a fake axis task on the device side of the bus
pub fn spawn_fake_axis(bus: &LoopbackBus, config: FakeAxisConfig) -> FakeAxis {
    let log = Arc::new(Mutex::new(Vec::new()));
    let task = tokio::spawn(run_fake_axis(bus.device_side(), config, Arc::clone(&log)));
    FakeAxis { log, task }
}

async fn run_fake_axis(
    mut device: voltage_cansimple::DeviceSide,
    config: FakeAxisConfig,
    log: Arc<Mutex<Vec<CanFrame>>>,
) {
    let node_id = config.node_id;
    let mut state = config.initial_state;
    let mut error_bitmask = config.error_bitmask;
    let mut store: HashMap<u16, EndpointValue> = config.initial_values.clone();

    let mut ticker = config
        .heartbeat_period
        .map(|period| tokio::time::interval(period));

    loop {
        let frame = match &mut ticker {
            Some(interval) => tokio::select! {
                _ = interval.tick() => {
                    if !config.mute {
                        let _ = device.send(heartbeat_frame(node_id, state, error_bitmask));
                    }
                    continue;
                },
                received = device.recv() => match received {
                    Ok(frame) => frame,
                    Err(_) => break,
                },
            },
            None => match device.recv().await {
                Ok(frame) => frame,
                Err(_) => break,
            },
        };

        if frame.node_id() != node_id {
            continue;
        }
        log.lock().unwrap().push(frame.clone());

        if config.mute {
            continue;
        }

        match frame.opcode() {
            Some(Opcode::GetVersion) => {
                let data = vec![
                    0,
                    config.hw.0,
                    config.hw.1,
                    config.hw.2,
                    config.fw.0,
                    config.fw.1,
                    config.fw.2,
                    0,
                ];
                let _ = device.send(CanFrame::new(node_id, Opcode::GetVersion, data));
            },
            Some(Opcode::RxSdo) => {
                let Ok(endpoint_id) = sdo_endpoint_id(&frame.data) else {
                    continue;
                };
                match frame.data.first() {
                    Some(&SDO_OPCODE_WRITE) => {
                        if !config.reject_writes.contains(&endpoint_id) {
                            if let Some(value) = decode_raw_value(&frame.data[4..], &store, endpoint_id) {
                                store.insert(endpoint_id, value);
                            }
                        }
                        if config.send_write_ack {
                            let _ = device.send(sdo_reply(node_id, endpoint_id, &frame.data[4..]));
                        }
                    },
                    Some(&SDO_OPCODE_READ) => {
                        let value = config
                            .readback_overrides
                            .get(&endpoint_id)
                            .or_else(|| store.get(&endpoint_id));
                        let mut bytes = Vec::new();
                        match value {
                            Some(value) => value.encode_into(&mut bytes),
                            None => bytes.extend_from_slice(&[0u8; 8]),
                        }
                        let _ = device.send(sdo_reply(node_id, endpoint_id, &bytes));
                    },
                    _ => {},
                }
            },
            Some(Opcode::SetAxisState) => {
                if frame.data.len() >= 4 {
                    let requested =
                        u32::from_le_bytes([frame.data[0], frame.data[1], frame.data[2], frame.data[3]]);
                    state = requested as u8;
                    if config.auto_heartbeat {
                        let _ = device.send(heartbeat_frame(node_id, state, error_bitmask));
                    }
                }
            },
            Some(Opcode::ClearErrors) => {
                error_bitmask = 0;
            },
            _ => {},
        }
    }
}

/// Collect every host frame the device sees within the window
pub async fn drain_device(
    device: &mut voltage_cansimple::DeviceSide,
    window: Duration,
) -> Vec<CanFrame> {
    let mut frames = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok(frame)) = tokio::time::timeout_at(deadline, device.recv()).await {
        frames.push(frame);
    }
    frames
}

fn sdo_reply(node_id: u8, endpoint_id: u16, value_bytes: &[u8]) -> CanFrame {
    let mut data = Vec::with_capacity(4 + value_bytes.len());
    data.push(0);
    data.extend_from_slice(&endpoint_id.to_le_bytes());
    data.push(0);
    data.extend_from_slice(value_bytes);
    CanFrame::new(node_id, Opcode::TxSdo, data)
}

/// Reinterpret raw written bytes with the type already stored for the
/// endpoint, falling back to a raw u32 when the endpoint is new
fn decode_raw_value(
    bytes: &[u8],
    store: &HashMap<u16, EndpointValue>,
    endpoint_id: u16,
) -> Option<EndpointValue> {
    let ty = store
        .get(&endpoint_id)
        .map(|existing| existing.value_type())?;
    EndpointValue::decode(ty, bytes).ok()
}
