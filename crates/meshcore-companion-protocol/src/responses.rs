//! Decoding of frames sent by the radio.

use crate::constants::*;
use crate::error::*;
use crate::reader::FrameReader;
use crate::types::*;

/// Contact record size before the optional location and lastmod tail.
const CONTACT_RECORD_MIN: usize = PUB_KEY_SIZE + 3 + MAX_PATH_SIZE + NAME_FIELD_SIZE + 4;

/// `DEVICE_INFO` body size from firmware v3 on, code byte excluded.
const DEVICE_INFO_V3_LEN: usize = 79;

/// Reply to a request. Codes below 0x80.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Error(FirmwareErrorCode),
    Disabled,
    ContactsStart { total_count: u32 },
    Contact(ContactInfo),
    /// Closes a contact stream. `most_recent_lastmod` is the mark for the
    /// next incremental fetch.
    EndOfContacts { most_recent_lastmod: u32 },
    SelfInfo(SelfInfo),
    /// A send was queued. The recipient will echo `expected_ack`;
    /// `est_timeout_ms` is the radio's guess at how long that takes.
    Sent {
        is_flood: bool,
        expected_ack: u32,
        est_timeout_ms: u32,
    },
    CurrentTime { time_secs: u32 },
    NoMoreMessages,
    /// Advert packet, as it would go on air.
    ExportedContact { data: Vec<u8> },
    BatteryAndStorage(BatteryAndStorage),
    DeviceInfo(DeviceInfo),
    ContactMessage(ReceivedContactMessage),
    ChannelMessage(ReceivedChannelMessage),
    /// Console output of the radio.
    CliResponse { text: String },
}

/// Unsolicited notification. Codes 0x80 and up.
#[derive(Debug, Clone, PartialEq)]
pub enum PushNotification {
    /// A contact already in the table re-advertised.
    Advert { public_key: PublicKey },
    /// First advert from an unknown node, with the full record.
    NewAdvert(ContactInfo),
    PathUpdated { public_key: PublicKey },
    /// A message was delivered; `ack_code` matches its `Sent` reply.
    SendConfirmed { ack_code: u32, trip_time_ms: u32 },
    MessageWaiting,
    LoginSuccess {
        is_admin: bool,
        server_prefix: PublicKeyPrefix,
    },
    LoginFail { server_prefix: PublicKeyPrefix },
    /// Server counters, little-endian, undecoded.
    StatusResponse {
        server_prefix: PublicKeyPrefix,
        data: Vec<u8>,
    },
    LogRxData { snr_x4: i8, rssi: i8, raw: Vec<u8> },
}

/// Any frame the radio can send.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Response(Response),
    Push(PushNotification),
}

impl Message {
    /// Decode one frame, dispatching on the push bit of its code.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let Some(&code) = frame.first() else {
            return Err(ProtocolError::FrameTooShort {
                expected: 1,
                actual: 0,
            });
        };
        if code >= 0x80 {
            PushNotification::decode(frame).map(Message::Push)
        } else {
            Response::decode(frame).map(Message::Response)
        }
    }
}

impl Response {
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = FrameReader::new(frame);
        let code = r.u8()?;

        let response = match code {
            RESP_CODE_OK => Response::Ok,

            // Older firmware sends a bare ERR without a code.
            RESP_CODE_ERR => {
                let err = if r.remaining() > 0 { r.u8()? } else { 0 };
                Response::Error(FirmwareErrorCode::from(err))
            }

            RESP_CODE_DISABLED => Response::Disabled,

            RESP_CODE_CONTACTS_START => Response::ContactsStart {
                total_count: r.u32()?,
            },

            RESP_CODE_CONTACT => Response::Contact(decode_contact(&mut r)?),

            RESP_CODE_END_OF_CONTACTS => Response::EndOfContacts {
                most_recent_lastmod: r.u32()?,
            },

            RESP_CODE_SELF_INFO => Response::SelfInfo(decode_self_info(&mut r)?),

            RESP_CODE_SENT => Response::Sent {
                is_flood: r.u8()? != 0,
                expected_ack: r.u32()?,
                est_timeout_ms: r.u32()?,
            },

            RESP_CODE_CURR_TIME => Response::CurrentTime {
                time_secs: r.u32()?,
            },

            RESP_CODE_NO_MORE_MESSAGES => Response::NoMoreMessages,

            RESP_CODE_EXPORT_CONTACT => Response::ExportedContact { data: r.rest() },

            RESP_CODE_CLI_RESPONSE => Response::CliResponse { text: r.rest_str() },

            RESP_CODE_BATT_AND_STORAGE => {
                let battery_millivolts = r.u16()?;
                let (storage_used_kb, storage_total_kb) = if r.remaining() >= 8 {
                    (Some(r.u32()?), Some(r.u32()?))
                } else {
                    (None, None)
                };
                Response::BatteryAndStorage(BatteryAndStorage {
                    battery_millivolts,
                    storage_used_kb,
                    storage_total_kb,
                })
            }

            RESP_CODE_DEVICE_INFO => Response::DeviceInfo(decode_device_info(&mut r)?),

            RESP_CODE_CONTACT_MSG_RECV => {
                Response::ContactMessage(decode_contact_message(&mut r, false)?)
            }

            RESP_CODE_CONTACT_MSG_RECV_V3 => {
                Response::ContactMessage(decode_contact_message(&mut r, true)?)
            }

            RESP_CODE_CHANNEL_MSG_RECV => {
                Response::ChannelMessage(decode_channel_message(&mut r, false)?)
            }

            RESP_CODE_CHANNEL_MSG_RECV_V3 => {
                Response::ChannelMessage(decode_channel_message(&mut r, true)?)
            }

            _ => return Err(ProtocolError::UnknownCode(code)),
        };

        Ok(response)
    }
}

impl PushNotification {
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = FrameReader::new(frame);
        let code = r.u8()?;

        let push = match code {
            PUSH_CODE_ADVERT => PushNotification::Advert {
                public_key: PublicKey::new(r.array()?),
            },

            PUSH_CODE_NEW_ADVERT => PushNotification::NewAdvert(decode_contact(&mut r)?),

            PUSH_CODE_PATH_UPDATED => PushNotification::PathUpdated {
                public_key: PublicKey::new(r.array()?),
            },

            PUSH_CODE_SEND_CONFIRMED => PushNotification::SendConfirmed {
                ack_code: r.u32()?,
                trip_time_ms: r.u32()?,
            },

            PUSH_CODE_MSG_WAITING => PushNotification::MessageWaiting,

            PUSH_CODE_LOGIN_SUCCESS => PushNotification::LoginSuccess {
                is_admin: r.u8()? != 0,
                server_prefix: PublicKeyPrefix::new(r.array()?),
            },

            PUSH_CODE_LOGIN_FAIL => {
                r.skip(1)?;
                PushNotification::LoginFail {
                    server_prefix: PublicKeyPrefix::new(r.array()?),
                }
            }

            PUSH_CODE_STATUS_RESPONSE => {
                r.skip(1)?;
                PushNotification::StatusResponse {
                    server_prefix: PublicKeyPrefix::new(r.array()?),
                    data: r.rest(),
                }
            }

            PUSH_CODE_LOG_RX_DATA => PushNotification::LogRxData {
                snr_x4: r.i8()?,
                rssi: r.i8()?,
                raw: r.rest(),
            },

            _ => return Err(ProtocolError::UnknownCode(code)),
        };

        Ok(push)
    }

    /// Which server a login or status push came from.
    pub fn server_prefix(&self) -> Option<&PublicKeyPrefix> {
        match self {
            PushNotification::LoginSuccess { server_prefix, .. }
            | PushNotification::LoginFail { server_prefix }
            | PushNotification::StatusResponse { server_prefix, .. } => Some(server_prefix),
            _ => None,
        }
    }
}

fn decode_contact(r: &mut FrameReader<'_>) -> Result<ContactInfo, ProtocolError> {
    if r.remaining() < CONTACT_RECORD_MIN {
        return Err(ProtocolError::FrameTooShort {
            expected: r.position() + CONTACT_RECORD_MIN,
            actual: r.position() + r.remaining(),
        });
    }

    let public_key = PublicKey::new(r.array()?);
    let contact_type = r.u8()?;
    let flags = r.u8()?;
    let out_path_len = r.i8()?;
    let path: [u8; MAX_PATH_SIZE] = r.array()?;
    let used = (out_path_len.max(0) as usize).min(MAX_PATH_SIZE);
    let name = r.fixed_str(NAME_FIELD_SIZE)?;
    let last_advert = r.u32()?;

    let mut contact = ContactInfo {
        public_key,
        contact_type,
        flags,
        out_path_len,
        out_path: path[..used].to_vec(),
        name,
        last_advert,
        ..Default::default()
    };

    // Location and lastmod are absent on old firmware.
    if r.remaining() >= 8 {
        contact.adv_lat = r.i32()?;
        contact.adv_lon = r.i32()?;
        if r.remaining() >= 4 {
            contact.lastmod = r.u32()?;
        }
    }

    Ok(contact)
}

fn decode_self_info(r: &mut FrameReader<'_>) -> Result<SelfInfo, ProtocolError> {
    let advert_type = r.u8()?;
    let tx_power_dbm = r.u8()?;
    let max_tx_power_dbm = r.u8()?;
    let public_key = PublicKey::new(r.array()?);
    let adv_lat = r.i32()?;
    let adv_lon = r.i32()?;
    // multi_acks, advert_loc_policy, telemetry_modes, manual_add_contacts
    r.skip(4)?;
    let freq_khz = r.u32()?;
    let bandwidth_hz = r.u32()?;
    let spreading_factor = r.u8()?;
    let coding_rate = r.u8()?;
    let name = r.rest_str();

    Ok(SelfInfo {
        advert_type,
        tx_power_dbm,
        max_tx_power_dbm,
        public_key,
        adv_lat,
        adv_lon,
        freq_khz,
        bandwidth_hz,
        spreading_factor,
        coding_rate,
        name,
    })
}

fn decode_device_info(r: &mut FrameReader<'_>) -> Result<DeviceInfo, ProtocolError> {
    let mut info = DeviceInfo {
        firmware_version_code: r.u8()?,
        ..Default::default()
    };

    if r.remaining() + 1 < DEVICE_INFO_V3_LEN {
        return Ok(info);
    }

    info.max_contacts_half = r.u8()?;
    info.max_group_channels = r.u8()?;
    info.ble_pin = r.u32()?;
    info.build_date = r.fixed_str(12)?;
    info.model = r.fixed_str(40)?;
    info.firmware_version = r.fixed_str(20)?;

    Ok(info)
}

fn decode_contact_message(
    r: &mut FrameReader<'_>,
    v3: bool,
) -> Result<ReceivedContactMessage, ProtocolError> {
    let snr_x4 = if v3 {
        let snr = r.i8()?;
        r.skip(2)?;
        Some(snr)
    } else {
        None
    };
    let sender_prefix = PublicKeyPrefix::new(r.array()?);
    let path_len = r.u8()?;
    let text_type = TextType::from(r.u8()?);
    let timestamp = r.u32()?;
    let signature = if text_type == TextType::SignedPlain {
        Some(r.array()?)
    } else {
        None
    };

    Ok(ReceivedContactMessage {
        sender_prefix,
        path_len,
        text_type,
        timestamp,
        snr_x4,
        signature,
        text: r.rest_str(),
    })
}

fn decode_channel_message(
    r: &mut FrameReader<'_>,
    v3: bool,
) -> Result<ReceivedChannelMessage, ProtocolError> {
    let snr_x4 = if v3 {
        let snr = r.i8()?;
        r.skip(2)?;
        Some(snr)
    } else {
        None
    };

    Ok(ReceivedChannelMessage {
        channel_idx: r.u8()?,
        path_len: r.u8()?,
        text_type: TextType::from(r.u8()?),
        timestamp: r.u32()?,
        snr_x4,
        text: r.rest_str(),
    })
}
