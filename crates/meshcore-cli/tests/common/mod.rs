//! Scripted in-process companion radio for driving the executor.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use meshcore_cli::error::{ConnectError, LinkError};
use meshcore_cli::output::Style;
use meshcore_cli::transport::{Connector, FrameSink, Transport};
use meshcore_cli::{ExecOptions, Executor, Session, SessionConfig};
use meshcore_companion_protocol::*;
use parking_lot::Mutex;

/// Key of the contact named `name`: its first byte is `seed`.
pub fn key(seed: u8) -> [u8; PUB_KEY_SIZE] {
    let mut k = [seed; PUB_KEY_SIZE];
    k[1] = 0x42;
    k
}

pub fn contact_frame(seed: u8, name: &str) -> Vec<u8> {
    let mut f = vec![RESP_CODE_CONTACT];
    f.extend_from_slice(&key(seed));
    f.push(ADV_TYPE_CHAT);
    f.push(0);
    f.push(PATH_LEN_FLOOD);
    f.extend_from_slice(&[0u8; MAX_PATH_SIZE]);
    let mut n = [0u8; NAME_FIELD_SIZE];
    n[..name.len()].copy_from_slice(name.as_bytes());
    f.extend_from_slice(&n);
    f.extend_from_slice(&1_700_000_000u32.to_le_bytes());
    f.extend_from_slice(&0i32.to_le_bytes());
    f.extend_from_slice(&0i32.to_le_bytes());
    f.extend_from_slice(&1_700_000_100u32.to_le_bytes());
    f
}

pub fn self_info_frame() -> Vec<u8> {
    let mut f = vec![RESP_CODE_SELF_INFO, ADV_TYPE_CHAT, 20, 22];
    f.extend_from_slice(&[0xEE; PUB_KEY_SIZE]);
    f.extend_from_slice(&47_000_000i32.to_le_bytes());
    f.extend_from_slice(&(-1_500_000i32).to_le_bytes());
    f.extend_from_slice(&[0, 0, 0, 0]);
    f.extend_from_slice(&869_525u32.to_le_bytes());
    f.extend_from_slice(&250_000u32.to_le_bytes());
    f.push(11);
    f.push(5);
    f.extend_from_slice(b"base");
    f
}

/// Private message from the contact with key seed `seed`.
pub fn message_frame(seed: u8, text: &str) -> Vec<u8> {
    let mut f = vec![RESP_CODE_CONTACT_MSG_RECV];
    f.extend_from_slice(&key(seed)[..PUB_KEY_PREFIX_SIZE]);
    f.push(1);
    f.push(0);
    f.extend_from_slice(&1_700_000_000u32.to_le_bytes());
    f.extend_from_slice(text.as_bytes());
    f
}

pub fn ack_frame(code: u32) -> Vec<u8> {
    let mut f = vec![PUSH_CODE_SEND_CONFIRMED];
    f.extend_from_slice(&code.to_le_bytes());
    f.extend_from_slice(&420u32.to_le_bytes());
    f
}

pub fn login_frame(seed: u8, success: bool) -> Vec<u8> {
    let code = if success {
        PUSH_CODE_LOGIN_SUCCESS
    } else {
        PUSH_CODE_LOGIN_FAIL
    };
    let mut f = vec![code, u8::from(success)];
    f.extend_from_slice(&key(seed)[..PUB_KEY_PREFIX_SIZE]);
    f
}

pub fn status_frame(seed: u8) -> Vec<u8> {
    let mut f = vec![PUSH_CODE_STATUS_RESPONSE, 0];
    f.extend_from_slice(&key(seed)[..PUB_KEY_PREFIX_SIZE]);
    let mut data = [0u8; 24];
    data[0..2].copy_from_slice(&4012u16.to_le_bytes());
    f.extend_from_slice(&data);
    f
}

/// What the radio knows and how it answers.
pub struct DeviceState {
    /// Contact records, as `CONTACT` frames.
    pub contacts: Vec<Vec<u8>>,
    /// Queued incoming messages.
    pub inbox: VecDeque<Vec<u8>>,
    /// Every command payload received.
    pub received: Vec<Vec<u8>>,
    /// Device clock.
    pub time_secs: u32,
    /// Answer `SET_DEVICE_TIME` with an error.
    pub refuse_time: bool,
    /// `(expected_ack, est_timeout_ms)` for the next sends.
    pub sent: (u32, u32),
    /// Pushes emitted after the next message send, with their delay.
    pub after_send: Vec<(Duration, Vec<u8>)>,
    /// Fail this many writes of the given command code.
    pub fail_sends: Option<(u8, usize)>,
}

impl Default for DeviceState {
    fn default() -> Self {
        DeviceState {
            contacts: vec![contact_frame(0x11, "flo2"), contact_frame(0x22, "flo3"), contact_frame(0x33, "rep1")],
            inbox: VecDeque::new(),
            received: Vec::new(),
            time_secs: 1_700_000_000,
            refuse_time: false,
            sent: (0x3905_0c12, 3260),
            after_send: Vec::new(),
            fail_sends: None,
        }
    }
}

/// Handle to the scripted radio, shared with its connector and transport.
#[derive(Clone, Default)]
pub struct Device {
    pub state: Arc<Mutex<DeviceState>>,
    sink: Arc<Mutex<Option<Arc<dyn FrameSink>>>>,
}

impl Device {
    pub fn new() -> Self {
        Device::default()
    }

    /// Deliver an unsolicited frame.
    pub fn push(&self, frame: &[u8]) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink.on_frame(frame);
        }
    }

    /// Queue a message and signal it.
    pub fn deliver(&self, frame: Vec<u8>) {
        self.state.lock().inbox.push_back(frame);
        self.push(&[PUSH_CODE_MSG_WAITING]);
    }

    /// Drop the link from the radio side.
    pub fn hang_up(&self) {
        let sink = self.sink.lock().take();
        if let Some(sink) = sink {
            sink.on_closed("peer hung up");
        }
    }

    /// Command codes received so far.
    pub fn commands(&self) -> Vec<u8> {
        self.state.lock().received.iter().map(|c| c[0]).collect()
    }

    /// Take one injected write failure for `code`, if any are left.
    fn fail_write(&self, code: u8) -> bool {
        let mut state = self.state.lock();
        match state.fail_sends.as_mut() {
            Some((failing, left)) if *failing == code && *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }

    fn answer(&self, payload: &[u8]) -> (Vec<Vec<u8>>, Vec<(Duration, Vec<u8>)>) {
        let mut state = self.state.lock();
        state.received.push(payload.to_vec());
        let mut later = Vec::new();
        let frames = match payload[0] {
            CMD_DEVICE_QUERY => vec![vec![RESP_CODE_DEVICE_INFO, 3]],
            CMD_APP_START => vec![self_info_frame()],
            CMD_GET_CONTACTS => {
                let mut frames = vec![{
                    let mut f = vec![RESP_CODE_CONTACTS_START];
                    f.extend_from_slice(&(state.contacts.len() as u32).to_le_bytes());
                    f
                }];
                frames.extend(state.contacts.iter().cloned());
                let mut end = vec![RESP_CODE_END_OF_CONTACTS];
                end.extend_from_slice(&1_700_000_100u32.to_le_bytes());
                frames.push(end);
                frames
            }
            CMD_SYNC_NEXT_MESSAGE => match state.inbox.pop_front() {
                Some(frame) => vec![frame],
                None => vec![vec![RESP_CODE_NO_MORE_MESSAGES]],
            },
            CMD_GET_DEVICE_TIME => {
                let mut f = vec![RESP_CODE_CURR_TIME];
                f.extend_from_slice(&state.time_secs.to_le_bytes());
                vec![f]
            }
            CMD_SET_DEVICE_TIME if state.refuse_time => vec![vec![RESP_CODE_ERR, ERR_CODE_ILLEGAL_ARG]],
            CMD_SET_DEVICE_TIME => {
                state.time_secs = u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
                vec![vec![RESP_CODE_OK]]
            }
            CMD_SEND_TXT_MSG | CMD_SEND_LOGIN | CMD_SEND_STATUS_REQ => {
                let (ack, est) = state.sent;
                let mut f = vec![RESP_CODE_SENT, 1];
                f.extend_from_slice(&ack.to_le_bytes());
                f.extend_from_slice(&est.to_le_bytes());
                later = std::mem::take(&mut state.after_send);
                vec![f]
            }
            CMD_GET_BATT_AND_STORAGE => {
                let mut f = vec![RESP_CODE_BATT_AND_STORAGE];
                f.extend_from_slice(&3912u16.to_le_bytes());
                vec![f]
            }
            CMD_EXPORT_CONTACT => vec![vec![RESP_CODE_EXPORT_CONTACT, 0xAB, 0xCD]],
            CMD_SEND_CLI => {
                let mut f = vec![RESP_CODE_CLI_RESPONSE];
                f.extend_from_slice(b"> ");
                f.extend_from_slice(&payload[1..]);
                vec![f]
            }
            CMD_REBOOT => Vec::new(),
            _ => vec![vec![RESP_CODE_OK]],
        };
        (frames, later)
    }
}

impl Connector for Device {
    fn connect(&mut self, sink: Arc<dyn FrameSink>) -> Result<Box<dyn Transport>, ConnectError> {
        *self.sink.lock() = Some(sink);
        Ok(Box::new(DeviceLink {
            device: self.clone(),
            open: true,
        }))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

struct DeviceLink {
    device: Device,
    open: bool,
}

impl Transport for DeviceLink {
    fn send(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if !self.open || self.device.sink.lock().is_none() {
            return Err(LinkError::Closed);
        }
        if self.device.fail_write(payload[0]) {
            return Err(LinkError::Write("broken pipe".to_string()));
        }
        let (frames, later) = self.device.answer(payload);
        for frame in frames {
            self.device.push(&frame);
        }
        for (delay, frame) in later {
            if delay.is_zero() {
                self.device.push(&frame);
            } else {
                let device = self.device.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    device.push(&frame);
                });
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.open && self.device.sink.lock().is_some()
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        reply_timeout: Duration::from_secs(1),
        login_timeout: Duration::from_secs(1),
        ..SessionConfig::default()
    }
}

pub fn options(wait_timeout: Duration) -> ExecOptions {
    ExecOptions {
        wait_timeout,
        cache_ttl: Duration::from_secs(60),
        style: Style {
            color: false,
            print_snr: false,
            json_msgs: false,
        },
    }
}

/// Executor over a freshly connected scripted radio.
pub fn executor(device: &Device, wait_timeout: Duration) -> Executor<Vec<u8>> {
    let session = Session::open(Box::new(device.clone()), session_config()).unwrap();
    Executor::new(session, Vec::new(), options(wait_timeout))
}

pub fn output(exec: &Executor<Vec<u8>>) -> String {
    String::from_utf8_lossy(exec.output()).into_owned()
}
