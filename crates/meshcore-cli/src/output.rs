//! Rendering of results for the terminal, as text or JSON.

use chrono::{Local, TimeZone};
use meshcore_companion_protocol::{
    BatteryAndStorage, ContactInfo, DeviceInfo, PublicKeyPrefix, ReceivedMessage, SelfInfo, TextType,
    ADV_TYPE_REPEATER, ADV_TYPE_ROOM_SERVER, PATH_LEN_FLOOD,
};
use serde_json::{json, Value};

use crate::session::SentInfo;

const ANSI_END: &str = "\x1b[0m";
const ANSI_BGREEN: &str = "\x1b[1;32m";
const ANSI_BBLUE: &str = "\x1b[1;34m";
const ANSI_YELLOW: &str = "\x1b[0;33m";
const ANSI_BMAGENTA: &str = "\x1b[1;35m";
const ANSI_BCYAN: &str = "\x1b[1;36m";
const ANSI_LIGHT_GRAY: &str = "\x1b[0;90m";

/// Display switches for received messages. Changed at runtime by `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Style {
    /// ANSI colors.
    pub color: bool,
    /// Append SNR to the path.
    pub print_snr: bool,
    /// Print messages as JSON.
    pub json_msgs: bool,
}

impl Default for Style {
    fn default() -> Self {
        Style {
            color: true,
            print_snr: false,
            json_msgs: false,
        }
    }
}

impl Style {
    fn paint(&self, code: &'static str) -> &'static str {
        if self.color {
            code
        } else {
            ""
        }
    }
}

/// Color used for a contact's name.
fn type_color(contact_type: Option<u8>) -> &'static str {
    match contact_type {
        Some(ADV_TYPE_ROOM_SERVER) => ANSI_BCYAN,
        Some(ADV_TYPE_REPEATER) => ANSI_BMAGENTA,
        _ => ANSI_BBLUE,
    }
}

/// One received message as a terminal line. `sender` is the cached
/// contact matching the sender prefix, if any.
pub fn message_line(msg: &ReceivedMessage, sender: Option<&ContactInfo>, style: &Style) -> String {
    let mut path = if msg.path_len() == PATH_LEN_FLOOD {
        "D".to_string()
    } else {
        msg.path_len().to_string()
    };
    if style.print_snr {
        if let Some(snr) = msg.snr() {
            path.push_str(&format!(",{}dB", snr));
        }
    }

    match msg {
        ReceivedMessage::Contact(m) => {
            let name = sender
                .map(|c| c.name.clone())
                .unwrap_or_else(|| m.sender_prefix.to_hex());
            let body = if m.text_type == TextType::CliData {
                style.paint(ANSI_LIGHT_GRAY)
            } else {
                style.paint(ANSI_END)
            };
            format!(
                "{}{} {}({}){}: {}{}",
                style.paint(type_color(sender.map(|c| c.contact_type))),
                name,
                style.paint(ANSI_YELLOW),
                path,
                body,
                m.text,
                style.paint(ANSI_END),
            )
        }
        ReceivedMessage::Channel(m) => format!(
            "{}ch{} {}({}){}: {}",
            style.paint(ANSI_BGREEN),
            m.channel_idx,
            style.paint(ANSI_YELLOW),
            path,
            style.paint(ANSI_END),
            m.text,
        ),
    }
}

/// A received message as JSON.
pub fn message_json(msg: &ReceivedMessage) -> Value {
    match msg {
        ReceivedMessage::Contact(m) => {
            let mut value = json!({
                "type": "PRIV",
                "pubkey_prefix": m.sender_prefix.to_hex(),
                "path_len": m.path_len,
                "txt_type": u8::from(m.text_type),
                "sender_timestamp": m.timestamp,
                "text": m.text,
            });
            if let Some(snr) = msg.snr() {
                value["SNR"] = json!(snr);
            }
            if let Some(sig) = m.signature {
                value["signature"] = json!(hex::encode(sig));
            }
            value
        }
        ReceivedMessage::Channel(m) => {
            let mut value = json!({
                "type": "CHAN",
                "channel_idx": m.channel_idx,
                "path_len": m.path_len,
                "txt_type": u8::from(m.text_type),
                "sender_timestamp": m.timestamp,
                "text": m.text,
            });
            if let Some(snr) = msg.snr() {
                value["SNR"] = json!(snr);
            }
            value
        }
    }
}

/// A contact record as JSON.
pub fn contact_json(c: &ContactInfo) -> Value {
    json!({
        "public_key": c.public_key.to_hex(),
        "type": c.contact_type,
        "flags": c.flags,
        "out_path_len": c.out_path_len,
        "out_path": hex::encode(&c.out_path),
        "adv_name": c.name,
        "last_advert": c.last_advert,
        "adv_lat": c.latitude(),
        "adv_lon": c.longitude(),
        "lastmod": c.lastmod,
    })
}

/// Contact table as JSON, keyed by public key.
pub fn contacts_json(contacts: &[ContactInfo]) -> Value {
    let map: serde_json::Map<String, Value> = contacts
        .iter()
        .map(|c| (c.public_key.to_hex(), contact_json(c)))
        .collect();
    Value::Object(map)
}

/// Our own node info as JSON.
pub fn self_info_json(info: &SelfInfo) -> Value {
    json!({
        "adv_type": info.advert_type,
        "tx_power": info.tx_power_dbm,
        "max_tx_power": info.max_tx_power_dbm,
        "public_key": info.public_key.to_hex(),
        "adv_lat": info.latitude(),
        "adv_lon": info.longitude(),
        "radio_freq": info.frequency_mhz(),
        "radio_bw": info.bandwidth_khz(),
        "radio_sf": info.spreading_factor,
        "radio_cr": info.coding_rate,
        "name": info.name,
    })
}

/// Firmware info as JSON.
pub fn device_info_json(info: &DeviceInfo) -> Value {
    let mut value = json!({ "fw ver": info.firmware_version_code });
    if info.has_details() {
        value["max_contacts"] = json!(info.max_contacts());
        value["max_channels"] = json!(info.max_group_channels);
        value["ble_pin"] = json!(info.ble_pin);
        value["fw_build"] = json!(info.build_date);
        value["model"] = json!(info.model);
        value["ver"] = json!(info.firmware_version);
    }
    value
}

/// Firmware info as text.
pub fn device_info_text(info: &DeviceInfo) -> String {
    if info.has_details() {
        format!(
            "Device info :\n Model: {}\n Version: {}\n Build date: {}",
            info.model, info.firmware_version, info.build_date
        )
    } else {
        format!(
            "Device info :\n Firmware version : {}",
            info.firmware_version_code
        )
    }
}

/// Reply to an accepted message as JSON.
pub fn sent_json(sent: &SentInfo) -> Value {
    json!({
        "type": u8::from(sent.flood),
        "expected_ack": hex::encode(sent.ack_code.to_le_bytes()),
        "suggested_timeout": sent.timeout.as_millis() as u64,
    })
}

/// Battery reading as JSON.
pub fn battery_json(bat: &BatteryAndStorage) -> Value {
    let mut value = json!({ "level": bat.battery_millivolts });
    if let (Some(used), Some(total)) = (bat.storage_used_kb, bat.storage_total_kb) {
        value["used_kb"] = json!(used);
        value["total_kb"] = json!(total);
    }
    value
}

/// Repeater status blob as JSON. The leading counters are decoded when
/// present, the remainder is kept as hex.
pub fn status_json(server_prefix: &PublicKeyPrefix, data: &[u8]) -> Value {
    let mut value = json!({ "pubkey_pre": server_prefix.to_hex() });
    let u16_at = |i: usize| u16::from_le_bytes([data[i], data[i + 1]]);
    let i16_at = |i: usize| i16::from_le_bytes([data[i], data[i + 1]]);
    let u32_at = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
    if data.len() >= STATUS_HEADER_LEN {
        value["bat"] = json!(u16_at(0));
        value["tx_queue_len"] = json!(u16_at(2));
        value["noise_floor"] = json!(i16_at(4));
        value["last_rssi"] = json!(i16_at(6));
        value["nb_recv"] = json!(u32_at(8));
        value["nb_sent"] = json!(u32_at(12));
        value["airtime"] = json!(u32_at(16));
        value["uptime"] = json!(u32_at(20));
        value["rest"] = json!(hex::encode(&data[STATUS_HEADER_LEN..]));
    } else {
        value["data"] = json!(hex::encode(data));
    }
    value
}

const STATUS_HEADER_LEN: usize = 24;

/// `YYYY-MM-DD HH:MM:SS (epoch)` in local time.
pub fn format_time(ts: i64) -> String {
    match Local.timestamp_opt(ts, 0).single() {
        Some(dt) => format!("{} ({})", dt.format("%Y-%m-%d %H:%M:%S"), ts),
        None => format!("({})", ts),
    }
}

/// `meshcore://` URI for an exported advert.
pub fn contact_uri(data: &[u8]) -> String {
    format!("meshcore://{}", hex::encode(data))
}

/// Pretty JSON the way every command prints it.
pub fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcore_companion_protocol::{ReceivedChannelMessage, ReceivedContactMessage};

    fn private(path_len: u8, snr_x4: Option<i8>) -> ReceivedMessage {
        ReceivedMessage::Contact(ReceivedContactMessage {
            sender_prefix: PublicKeyPrefix::new([0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6]),
            path_len,
            text_type: TextType::Plain,
            timestamp: 1_700_000_000,
            snr_x4,
            signature: None,
            text: "hi".into(),
        })
    }

    #[test]
    fn test_plain_message_line() {
        let style = Style {
            color: false,
            print_snr: true,
            json_msgs: false,
        };
        let contact = ContactInfo {
            name: "flo2".into(),
            ..Default::default()
        };
        assert_eq!(message_line(&private(255, Some(38)), Some(&contact), &style), "flo2 (D,9.5dB): hi");
        assert_eq!(message_line(&private(2, None), None, &style), "a1b2c3d4e5f6 (2): hi");
    }

    #[test]
    fn test_channel_message_line() {
        let msg = ReceivedMessage::Channel(ReceivedChannelMessage {
            channel_idx: 0,
            path_len: 1,
            text_type: TextType::Plain,
            timestamp: 0,
            snr_x4: None,
            text: "yo".into(),
        });
        let style = Style {
            color: false,
            ..Style::default()
        };
        assert_eq!(message_line(&msg, None, &style), "ch0 (1): yo");
        assert_eq!(message_json(&msg)["type"], "CHAN");
    }

    #[test]
    fn test_sent_json_ack_is_wire_order_hex() {
        let sent = SentInfo {
            ack_code: 0x3905_0c12,
            timeout: std::time::Duration::from_millis(3260),
            flood: true,
        };
        let value = sent_json(&sent);
        assert_eq!(value["expected_ack"], "120c0539");
        assert_eq!(value["suggested_timeout"], 3260);
    }

    #[test]
    fn test_status_decodes_counters() {
        let prefix = PublicKeyPrefix::new([1, 2, 3, 4, 5, 6]);
        let mut data = vec![0u8; 26];
        data[0..2].copy_from_slice(&4100u16.to_le_bytes());
        data[4..6].copy_from_slice(&(-110i16).to_le_bytes());
        data[24] = 0xAB;
        let value = status_json(&prefix, &data);
        assert_eq!(value["pubkey_pre"], "010203040506");
        assert_eq!(value["bat"], 4100);
        assert_eq!(value["noise_floor"], -110);
        assert_eq!(value["rest"], "ab00");

        let short = status_json(&prefix, &[9, 9]);
        assert_eq!(short["data"], "0909");
    }

    #[test]
    fn test_contact_uri() {
        assert_eq!(contact_uri(&[0x11, 0xab]), "meshcore://11ab");
    }

    #[test]
    fn test_format_time_keeps_epoch() {
        assert!(format_time(1_700_000_000).ends_with("(1700000000)"));
    }
}
