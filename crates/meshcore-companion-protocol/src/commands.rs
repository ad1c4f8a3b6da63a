//! Requests from the client to the radio.
//!
//! Every request is one frame: a command byte followed by its arguments,
//! integers little-endian, strings raw UTF-8 running to the end of the
//! frame.

use crate::constants::*;
use crate::types::*;

/// Name announced when a session starts.
pub const DEFAULT_APP_NAME: &str = "mccli";

/// A request the radio understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Negotiate the protocol version. Sent before anything else.
    DeviceQuery { app_version: u8 },
    /// Open the application session; answered with `SELF_INFO`.
    AppStart { app_name: String },
    /// Direct message. `recipient_prefix` selects the contact.
    SendTextMessage {
        text_type: TextType,
        attempt: u8,
        timestamp: u32,
        recipient_prefix: PublicKeyPrefix,
        text: String,
    },
    SendChannelTextMessage {
        text_type: TextType,
        channel_idx: u8,
        timestamp: u32,
        text: String,
    },
    /// Contact table dump, optionally only entries changed after `since`.
    GetContacts { since: Option<u32> },
    GetDeviceTime,
    SetDeviceTime { time_secs: u32 },
    /// Zero-hop advert, or flooded when `flood` is set.
    SendSelfAdvert { flood: bool },
    SetAdvertName { name: String },
    /// Coordinates in microdegrees.
    SetAdvertLatLon { lat: i32, lon: i32 },
    AddUpdateContact { contact: ContactInfo },
    RemoveContact { public_key: PublicKey },
    ResetPath { public_key: PublicKey },
    ShareContact { public_key: PublicKey },
    /// Business card of a contact, or of the radio itself when `None`.
    ExportContact { public_key: Option<PublicKey> },
    /// Pop one message off the radio's offline queue.
    SyncNextMessage,
    SetRadioParams { params: RadioParams },
    SetRadioTxPower { power_dbm: u8 },
    SetTuningParams { params: TuningParams },
    Reboot,
    GetBatteryAndStorage,
    SendLogin { public_key: PublicKey, password: String },
    SendStatusRequest { public_key: PublicKey },
    Logout { public_key: PublicKey },
    SetDevicePin { pin: u32 },
    /// One line for the radio's local console.
    SendCli { text: String },
}

impl Command {
    /// Session start under `app_name`.
    pub fn app_start(app_name: impl Into<String>) -> Self {
        Command::AppStart {
            app_name: app_name.into(),
        }
    }

    /// Leading byte of the encoded frame.
    pub fn code(&self) -> u8 {
        use Command::*;
        match self {
            DeviceQuery { .. } => CMD_DEVICE_QUERY,
            AppStart { .. } => CMD_APP_START,
            SendTextMessage { .. } => CMD_SEND_TXT_MSG,
            SendChannelTextMessage { .. } => CMD_SEND_CHANNEL_TXT_MSG,
            GetContacts { .. } => CMD_GET_CONTACTS,
            GetDeviceTime => CMD_GET_DEVICE_TIME,
            SetDeviceTime { .. } => CMD_SET_DEVICE_TIME,
            SendSelfAdvert { .. } => CMD_SEND_SELF_ADVERT,
            SetAdvertName { .. } => CMD_SET_ADVERT_NAME,
            SetAdvertLatLon { .. } => CMD_SET_ADVERT_LATLON,
            AddUpdateContact { .. } => CMD_ADD_UPDATE_CONTACT,
            RemoveContact { .. } => CMD_REMOVE_CONTACT,
            ResetPath { .. } => CMD_RESET_PATH,
            ShareContact { .. } => CMD_SHARE_CONTACT,
            ExportContact { .. } => CMD_EXPORT_CONTACT,
            SyncNextMessage => CMD_SYNC_NEXT_MESSAGE,
            SetRadioParams { .. } => CMD_SET_RADIO_PARAMS,
            SetRadioTxPower { .. } => CMD_SET_RADIO_TX_POWER,
            SetTuningParams { .. } => CMD_SET_TUNING_PARAMS,
            Reboot => CMD_REBOOT,
            GetBatteryAndStorage => CMD_GET_BATT_AND_STORAGE,
            SendLogin { .. } => CMD_SEND_LOGIN,
            SendStatusRequest { .. } => CMD_SEND_STATUS_REQ,
            Logout { .. } => CMD_LOGOUT,
            SetDevicePin { .. } => CMD_SET_DEVICE_PIN,
            SendCli { .. } => CMD_SEND_CLI,
        }
    }

    /// Frame payload, ready for the transport to length-prefix.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MAX_FRAME_SIZE);
        out.push(self.code());
        self.write_args(&mut out);
        out
    }

    fn write_args(&self, out: &mut Vec<u8>) {
        use Command::*;
        match self {
            DeviceQuery { app_version } => out.push(*app_version),
            AppStart { app_name } => {
                // Version byte then six reserved spaces.
                out.push(APP_PROTOCOL_VERSION);
                out.extend_from_slice(&[b' '; 6]);
                out.extend_from_slice(app_name.as_bytes());
            }
            SendTextMessage {
                text_type,
                attempt,
                timestamp,
                recipient_prefix,
                text,
            } => {
                out.extend_from_slice(&[u8::from(*text_type), *attempt]);
                out.extend_from_slice(&timestamp.to_le_bytes());
                out.extend_from_slice(recipient_prefix.as_bytes());
                out.extend_from_slice(text.as_bytes());
            }
            SendChannelTextMessage {
                text_type,
                channel_idx,
                timestamp,
                text,
            } => {
                out.extend_from_slice(&[u8::from(*text_type), *channel_idx]);
                out.extend_from_slice(&timestamp.to_le_bytes());
                out.extend_from_slice(text.as_bytes());
            }
            GetContacts { since } => {
                if let Some(mark) = since {
                    out.extend_from_slice(&mark.to_le_bytes());
                }
            }
            SetDeviceTime { time_secs } => out.extend_from_slice(&time_secs.to_le_bytes()),
            SendSelfAdvert { flood } => out.push(u8::from(*flood)),
            SetAdvertName { name } | SendCli { text: name } => out.extend_from_slice(name.as_bytes()),
            SetAdvertLatLon { lat, lon } => {
                out.extend_from_slice(&lat.to_le_bytes());
                out.extend_from_slice(&lon.to_le_bytes());
            }
            AddUpdateContact { contact } => write_contact(out, contact),
            RemoveContact { public_key }
            | ResetPath { public_key }
            | ShareContact { public_key }
            | SendStatusRequest { public_key }
            | Logout { public_key } => out.extend_from_slice(public_key.as_bytes()),
            ExportContact { public_key } => {
                if let Some(key) = public_key {
                    out.extend_from_slice(key.as_bytes());
                }
            }
            SetRadioParams { params } => {
                out.extend_from_slice(&params.freq_khz.to_le_bytes());
                out.extend_from_slice(&params.bandwidth_hz.to_le_bytes());
                out.extend_from_slice(&[params.spreading_factor, params.coding_rate]);
            }
            SetRadioTxPower { power_dbm } => out.push(*power_dbm),
            SetTuningParams { params } => {
                out.extend_from_slice(&params.rx_delay_base.to_le_bytes());
                out.extend_from_slice(&params.airtime_factor.to_le_bytes());
            }
            // The firmware ignores the reboot unless the magic word follows.
            Reboot => out.extend_from_slice(b"reboot"),
            SendLogin {
                public_key,
                password,
            } => {
                out.extend_from_slice(public_key.as_bytes());
                out.extend_from_slice(password.as_bytes());
            }
            SetDevicePin { pin } => out.extend_from_slice(&pin.to_le_bytes()),
            GetDeviceTime | SyncNextMessage | GetBatteryAndStorage => {}
        }
    }
}

/// Contact record as `ADD_UPDATE_CONTACT` expects it. The trailing
/// lastmod field is left for the firmware to stamp.
fn write_contact(out: &mut Vec<u8>, contact: &ContactInfo) {
    out.extend_from_slice(contact.public_key.as_bytes());
    out.extend_from_slice(&[contact.contact_type, contact.flags, contact.out_path_len as u8]);
    out.extend_from_slice(&fixed::<MAX_PATH_SIZE>(&contact.out_path, MAX_PATH_SIZE));
    out.extend_from_slice(&fixed::<NAME_FIELD_SIZE>(contact.name.as_bytes(), NAME_FIELD_SIZE - 1));
    out.extend_from_slice(&contact.last_advert.to_le_bytes());
    out.extend_from_slice(&contact.adv_lat.to_le_bytes());
    out.extend_from_slice(&contact.adv_lon.to_le_bytes());
}

/// Zero-filled field of `N` bytes holding at most `limit` bytes of `src`.
fn fixed<const N: usize>(src: &[u8], limit: usize) -> [u8; N] {
    let mut field = [0u8; N];
    let n = src.len().min(limit).min(N);
    field[..n].copy_from_slice(&src[..n]);
    field
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_start_header() {
        let bytes = Command::app_start("mccli").encode();
        assert_eq!(&bytes[..2], &[CMD_APP_START, APP_PROTOCOL_VERSION]);
        assert_eq!(&bytes[2..8], b"      ");
        assert_eq!(&bytes[8..], b"mccli");
    }

    #[test]
    fn test_direct_message_layout() {
        let cmd = Command::SendTextMessage {
            text_type: TextType::Plain,
            attempt: 0,
            timestamp: 0x6500_0000,
            recipient_prefix: PublicKeyPrefix::new([1, 2, 3, 4, 5, 6]),
            text: "hi".into(),
        };
        let expected = [CMD_SEND_TXT_MSG, 0, 0, 0, 0, 0, 0x65, 1, 2, 3, 4, 5, 6, b'h', b'i'];
        assert_eq!(cmd.encode(), expected);
    }

    #[test]
    fn test_cli_line_is_raw_text() {
        let bytes = Command::SendCli { text: "ver".into() }.encode();
        assert_eq!(bytes, [CMD_SEND_CLI, b'v', b'e', b'r']);
    }

    #[test]
    fn test_contacts_mark_is_appended_only_when_given() {
        assert_eq!(Command::GetContacts { since: None }.encode(), [CMD_GET_CONTACTS]);
        assert_eq!(
            Command::GetContacts { since: Some(7) }.encode(),
            [CMD_GET_CONTACTS, 7, 0, 0, 0]
        );
    }

    #[test]
    fn test_contact_record_is_fixed_width() {
        let contact = ContactInfo {
            public_key: PublicKey::new([9; PUB_KEY_SIZE]),
            out_path_len: 2,
            out_path: vec![0xAA, 0xBB],
            name: "x".repeat(40),
            ..Default::default()
        };
        let bytes = Command::AddUpdateContact { contact }.encode();
        assert_eq!(bytes.len(), 1 + PUB_KEY_SIZE + 3 + MAX_PATH_SIZE + NAME_FIELD_SIZE + 12);
        assert_eq!(bytes[35], 2);
        assert_eq!(&bytes[36..38], &[0xAA, 0xBB]);
        // Long names are cut so the field stays NUL-terminated.
        assert_eq!(bytes[100 + NAME_FIELD_SIZE - 2], b'x');
        assert_eq!(bytes[100 + NAME_FIELD_SIZE - 1], 0);
    }
}
