//! Records exchanged with the radio.

use std::fmt;

use crate::constants::*;

macro_rules! key_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub fn new(bytes: [u8; $len]) -> Self {
                $name(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                self.to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.iter().try_for_each(|b| write!(f, "{:02x}", b))
            }
        }
    };
}

key_bytes!(
    /// Ed25519 identity of a node.
    PublicKey,
    PUB_KEY_SIZE
);

key_bytes!(
    /// Leading bytes of a [`PublicKey`], used to address messages.
    PublicKeyPrefix,
    PUB_KEY_PREFIX_SIZE
);

impl PublicKey {
    pub fn prefix(&self) -> PublicKeyPrefix {
        let mut head = [0u8; PUB_KEY_PREFIX_SIZE];
        head.copy_from_slice(&self.0[..PUB_KEY_PREFIX_SIZE]);
        PublicKeyPrefix(head)
    }
}

impl PublicKeyPrefix {
    /// True when `key` begins with these bytes.
    pub fn matches(&self, key: &PublicKey) -> bool {
        key.0.starts_with(&self.0)
    }
}

fn degrees(micro: i32) -> f64 {
    f64::from(micro) / 1e6
}

/// One entry of the radio's contact table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactInfo {
    pub public_key: PublicKey,
    /// One of the `ADV_TYPE_*` values.
    pub contact_type: u8,
    pub flags: u8,
    /// Hop count of the learned route; -1 while the contact is only
    /// reachable by flooding.
    pub out_path_len: i8,
    pub out_path: Vec<u8>,
    pub name: String,
    pub last_advert: u32,
    pub adv_lat: i32,
    pub adv_lon: i32,
    /// When the radio last touched this record. Feeds incremental
    /// contact fetches.
    pub lastmod: u32,
}

impl Default for ContactInfo {
    fn default() -> Self {
        ContactInfo {
            public_key: PublicKey::default(),
            contact_type: ADV_TYPE_CHAT,
            flags: 0,
            out_path_len: -1,
            out_path: Vec::new(),
            name: String::new(),
            last_advert: 0,
            adv_lat: 0,
            adv_lon: 0,
            lastmod: 0,
        }
    }
}

impl ContactInfo {
    pub fn latitude(&self) -> f64 {
        degrees(self.adv_lat)
    }

    pub fn longitude(&self) -> f64 {
        degrees(self.adv_lon)
    }
}

/// The radio's own identity and radio settings, as sent after `APP_START`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelfInfo {
    pub advert_type: u8,
    pub tx_power_dbm: u8,
    pub max_tx_power_dbm: u8,
    pub public_key: PublicKey,
    pub adv_lat: i32,
    pub adv_lon: i32,
    pub freq_khz: u32,
    pub bandwidth_hz: u32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    pub name: String,
}

impl SelfInfo {
    pub fn latitude(&self) -> f64 {
        degrees(self.adv_lat)
    }

    pub fn longitude(&self) -> f64 {
        degrees(self.adv_lon)
    }

    pub fn frequency_mhz(&self) -> f64 {
        f64::from(self.freq_khz) / 1e3
    }

    pub fn bandwidth_khz(&self) -> f64 {
        f64::from(self.bandwidth_hz) / 1e3
    }
}

/// Answer to `DEVICE_QUERY`. Before firmware v3 only the version code is
/// filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub firmware_version_code: u8,
    /// Contact table capacity, halved to fit a byte.
    pub max_contacts_half: u8,
    pub max_group_channels: u8,
    pub ble_pin: u32,
    pub build_date: String,
    pub model: String,
    pub firmware_version: String,
}

impl DeviceInfo {
    pub fn has_details(&self) -> bool {
        self.firmware_version_code >= 3
    }

    pub fn max_contacts(&self) -> usize {
        usize::from(self.max_contacts_half) * 2
    }
}

/// LoRa modem settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioParams {
    pub freq_khz: u32,
    pub bandwidth_hz: u32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
}

/// Retransmit timing knobs, each in thousandths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningParams {
    pub rx_delay_base: u32,
    pub airtime_factor: u32,
}

/// Answer to `GET_BATT_AND_STORAGE`. Older firmware omits the storage
/// figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryAndStorage {
    pub battery_millivolts: u16,
    pub storage_used_kb: Option<u32>,
    pub storage_total_kb: Option<u32>,
}

/// Payload kind of a text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextType {
    Plain,
    /// Remote command for a repeater or room server.
    CliData,
    /// Room post relayed with its author's key prefix.
    SignedPlain,
    Unknown(u8),
}

impl From<u8> for TextType {
    fn from(raw: u8) -> Self {
        match raw {
            TXT_TYPE_PLAIN => TextType::Plain,
            TXT_TYPE_CLI_DATA => TextType::CliData,
            TXT_TYPE_SIGNED_PLAIN => TextType::SignedPlain,
            other => TextType::Unknown(other),
        }
    }
}

impl From<TextType> for u8 {
    fn from(kind: TextType) -> Self {
        match kind {
            TextType::Plain => TXT_TYPE_PLAIN,
            TextType::CliData => TXT_TYPE_CLI_DATA,
            TextType::SignedPlain => TXT_TYPE_SIGNED_PLAIN,
            TextType::Unknown(raw) => raw,
        }
    }
}

/// Direct message pulled from the radio's queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedContactMessage {
    pub sender_prefix: PublicKeyPrefix,
    /// Hops travelled, or `PATH_LEN_FLOOD`.
    pub path_len: u8,
    pub text_type: TextType,
    pub timestamp: u32,
    /// Quarter-dB units. Only v3 frames carry it.
    pub snr_x4: Option<i8>,
    /// Author prefix on signed room posts.
    pub signature: Option<[u8; 4]>,
    pub text: String,
}

/// Channel message pulled from the radio's queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedChannelMessage {
    pub channel_idx: u8,
    pub path_len: u8,
    pub text_type: TextType,
    pub timestamp: u32,
    pub snr_x4: Option<i8>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReceivedMessage {
    Contact(ReceivedContactMessage),
    Channel(ReceivedChannelMessage),
}

impl ReceivedMessage {
    pub fn path_len(&self) -> u8 {
        match self {
            ReceivedMessage::Contact(m) => m.path_len,
            ReceivedMessage::Channel(m) => m.path_len,
        }
    }

    /// Signal to noise ratio in dB, when reported.
    pub fn snr(&self) -> Option<f32> {
        let quarters = match self {
            ReceivedMessage::Contact(m) => m.snr_x4,
            ReceivedMessage::Channel(m) => m.snr_x4,
        };
        quarters.map(|q| f32::from(q) / 4.0)
    }
}
