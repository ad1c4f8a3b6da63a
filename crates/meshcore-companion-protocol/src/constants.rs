//! Wire codes of the companion protocol.
//!
//! Only the subset a host-side client issues or has to understand is
//! listed here.

// Requests, host to radio.

/// Opens the session; answered with `RESP_CODE_SELF_INFO`.
pub const CMD_APP_START: u8 = 1;
pub const CMD_SEND_TXT_MSG: u8 = 2;
pub const CMD_SEND_CHANNEL_TXT_MSG: u8 = 3;
/// Streams the contact table, optionally only records changed after a mark.
pub const CMD_GET_CONTACTS: u8 = 4;
pub const CMD_GET_DEVICE_TIME: u8 = 5;
pub const CMD_SET_DEVICE_TIME: u8 = 6;
pub const CMD_SEND_SELF_ADVERT: u8 = 7;
pub const CMD_SET_ADVERT_NAME: u8 = 8;
pub const CMD_ADD_UPDATE_CONTACT: u8 = 9;
/// Pops one entry off the offline message queue.
pub const CMD_SYNC_NEXT_MESSAGE: u8 = 10;
pub const CMD_SET_RADIO_PARAMS: u8 = 11;
pub const CMD_SET_RADIO_TX_POWER: u8 = 12;
pub const CMD_RESET_PATH: u8 = 13;
pub const CMD_SET_ADVERT_LATLON: u8 = 14;
pub const CMD_REMOVE_CONTACT: u8 = 15;
/// Re-broadcasts a stored contact's advert over zero hops.
pub const CMD_SHARE_CONTACT: u8 = 16;
pub const CMD_EXPORT_CONTACT: u8 = 17;
pub const CMD_REBOOT: u8 = 19;
pub const CMD_GET_BATT_AND_STORAGE: u8 = 20;
pub const CMD_SET_TUNING_PARAMS: u8 = 21;
/// Version negotiation, sent before `CMD_APP_START`.
pub const CMD_DEVICE_QUERY: u8 = 22;
pub const CMD_SEND_LOGIN: u8 = 26;
pub const CMD_SEND_STATUS_REQ: u8 = 27;
pub const CMD_LOGOUT: u8 = 29;
pub const CMD_SET_DEVICE_PIN: u8 = 37;
/// Console line for the radio's own command interpreter.
pub const CMD_SEND_CLI: u8 = 50;

// Replies, radio to host. Exactly one per request, except contact streams.

pub const RESP_CODE_OK: u8 = 0;
/// Followed by one of the `ERR_CODE_*` bytes.
pub const RESP_CODE_ERR: u8 = 1;
pub const RESP_CODE_CONTACTS_START: u8 = 2;
pub const RESP_CODE_CONTACT: u8 = 3;
pub const RESP_CODE_END_OF_CONTACTS: u8 = 4;
pub const RESP_CODE_SELF_INFO: u8 = 5;
/// A send was queued; carries the expected ack code and a timeout hint.
pub const RESP_CODE_SENT: u8 = 6;
pub const RESP_CODE_CONTACT_MSG_RECV: u8 = 7;
pub const RESP_CODE_CHANNEL_MSG_RECV: u8 = 8;
pub const RESP_CODE_CURR_TIME: u8 = 9;
pub const RESP_CODE_NO_MORE_MESSAGES: u8 = 10;
pub const RESP_CODE_EXPORT_CONTACT: u8 = 11;
pub const RESP_CODE_BATT_AND_STORAGE: u8 = 12;
pub const RESP_CODE_DEVICE_INFO: u8 = 13;
/// The firmware was built without the requested feature.
pub const RESP_CODE_DISABLED: u8 = 15;
/// Same as `RESP_CODE_CONTACT_MSG_RECV` with an SNR byte up front.
pub const RESP_CODE_CONTACT_MSG_RECV_V3: u8 = 16;
pub const RESP_CODE_CHANNEL_MSG_RECV_V3: u8 = 17;
/// Console output for a `CMD_SEND_CLI` line.
pub const RESP_CODE_CLI_RESPONSE: u8 = 50;

// Pushes, unsolicited. All have the high bit set.

pub const PUSH_CODE_ADVERT: u8 = 0x80;
pub const PUSH_CODE_PATH_UPDATED: u8 = 0x81;
/// Carries the ack code of a delivered message and its round trip.
pub const PUSH_CODE_SEND_CONFIRMED: u8 = 0x82;
/// New entries in the offline queue; fetch them with `CMD_SYNC_NEXT_MESSAGE`.
pub const PUSH_CODE_MSG_WAITING: u8 = 0x83;
pub const PUSH_CODE_LOGIN_SUCCESS: u8 = 0x85;
pub const PUSH_CODE_LOGIN_FAIL: u8 = 0x86;
pub const PUSH_CODE_STATUS_RESPONSE: u8 = 0x87;
pub const PUSH_CODE_LOG_RX_DATA: u8 = 0x88;
/// Advert from a node not yet in the table, sent when auto-add is off.
pub const PUSH_CODE_NEW_ADVERT: u8 = 0x8A;

// Reasons carried by `RESP_CODE_ERR`.

pub const ERR_CODE_UNSUPPORTED_CMD: u8 = 1;
pub const ERR_CODE_NOT_FOUND: u8 = 2;
pub const ERR_CODE_TABLE_FULL: u8 = 3;
pub const ERR_CODE_BAD_STATE: u8 = 4;
pub const ERR_CODE_FILE_IO_ERROR: u8 = 5;
pub const ERR_CODE_ILLEGAL_ARG: u8 = 6;

// Text message kinds.

pub const TXT_TYPE_PLAIN: u8 = 0;
pub const TXT_TYPE_CLI_DATA: u8 = 1;
pub const TXT_TYPE_SIGNED_PLAIN: u8 = 2;

// Node kinds announced in adverts.

pub const ADV_TYPE_CHAT: u8 = 1;
pub const ADV_TYPE_REPEATER: u8 = 2;
pub const ADV_TYPE_ROOM_SERVER: u8 = 3;

// Field widths.

pub const PUB_KEY_SIZE: usize = 32;
/// Key bytes used to address a message.
pub const PUB_KEY_PREFIX_SIZE: usize = 6;
pub const MAX_PATH_SIZE: usize = 64;
pub const NAME_FIELD_SIZE: usize = 32;
pub const MAX_FRAME_SIZE: usize = 256;

/// `path_len` of a message that came in by flooding.
pub const PATH_LEN_FLOOD: u8 = 0xFF;

/// Protocol revision this client speaks.
pub const APP_PROTOCOL_VERSION: u8 = 3;
