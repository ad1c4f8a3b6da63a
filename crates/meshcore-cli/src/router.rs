//! Event router.
//!
//! Turns every inbound frame into an [`Event`], applies its side effects to
//! the [`StateCache`] and only then offers it to the [`WaitRegistry`], so a
//! command that wakes from a wait always reads a cache that already
//! reflects the event it woke on.

use std::sync::Arc;

use crossbeam_channel::Sender;
use meshcore_companion_protocol::{
    Message, ProtocolError, PushNotification, ReceivedMessage, Response,
};
use parking_lot::Mutex;

use crate::cache::StateCache;
use crate::event::{prefix_key, Event, EventKind, EventPayload};
use crate::registry::{FailReason, WaitRegistry};

/// Classifies frames and fans events out to the cache and the registry.
pub struct EventRouter {
    registry: WaitRegistry,
    cache: Arc<StateCache>,
    monitor: Mutex<Option<Sender<Arc<Event>>>>,
}

impl EventRouter {
    /// Create a router feeding `registry` and `cache`.
    pub fn new(registry: WaitRegistry, cache: Arc<StateCache>) -> Self {
        EventRouter {
            registry,
            cache,
            monitor: Mutex::new(None),
        }
    }

    /// The registry events are offered to.
    pub fn registry(&self) -> &WaitRegistry {
        &self.registry
    }

    /// The cache events are applied to.
    pub fn cache(&self) -> &Arc<StateCache> {
        &self.cache
    }

    /// Install (or remove) a listener for unclaimed "messages waiting",
    /// advert and disconnect events. While installed, unclaimed
    /// "messages waiting" signals go to the listener instead of the backlog.
    pub fn set_monitor(&self, monitor: Option<Sender<Arc<Event>>>) {
        *self.monitor.lock() = monitor;
    }

    /// Route one inbound frame. Returns the event, or `None` when the frame
    /// was ignored or could not be classified.
    pub fn route(&self, frame: &[u8]) -> Option<Arc<Event>> {
        let event = match classify(frame) {
            Ok(Some(event)) => Arc::new(event),
            Ok(None) => {
                tracing::trace!(code = ?frame.first(), "frame ignored");
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    code = ?frame.first(),
                    len = frame.len(),
                    "dropping frame: {}",
                    e
                );
                return None;
            }
        };

        tracing::debug!(kind = %event.kind, key = ?event.key.map(|k| format!("{:08x}", k)), "event");
        self.apply(&event);

        if let Some(unclaimed) = self.registry.notify(event.clone()) {
            if !self.offer_monitor(&unclaimed) {
                self.registry.retain(unclaimed);
            }
        }
        Some(event)
    }

    /// The link dropped underneath us.
    pub fn link_lost(&self, reason: &str) {
        tracing::warn!("link lost: {}", reason);
        self.registry
            .fail_all(FailReason::Disconnected(reason.to_string()));
        let event = Arc::new(Event::new(
            EventKind::Disconnected,
            None,
            EventPayload::Disconnected(reason.to_string()),
        ));
        self.offer_monitor(&event);
    }

    /// The user tore the session down.
    pub fn interrupt(&self) {
        tracing::info!("interrupted");
        self.registry.fail_all(FailReason::Interrupted);
        let event = Arc::new(Event::new(
            EventKind::Disconnected,
            None,
            EventPayload::Disconnected("interrupted".to_string()),
        ));
        self.offer_monitor(&event);
    }

    fn offer_monitor(&self, event: &Arc<Event>) -> bool {
        if !matches!(
            event.kind,
            EventKind::MessagesWaiting | EventKind::Advert | EventKind::Disconnected
        ) {
            return false;
        }
        let monitor = self.monitor.lock();
        match monitor.as_ref() {
            Some(tx) => tx.send(event.clone()).is_ok() && event.kind == EventKind::MessagesWaiting,
            None => false,
        }
    }

    fn apply(&self, event: &Event) {
        match &event.payload {
            EventPayload::Contact(contact) => self.cache.upsert_contact(contact.clone()),
            EventPayload::Advert { .. } => self.cache.mark_contacts_stale(),
            EventPayload::Reply(Response::SelfInfo(info)) => self.cache.set_self_info(info.clone()),
            EventPayload::Reply(Response::CurrentTime { time_secs }) => {
                self.cache.record_device_time(*time_secs)
            }
            EventPayload::Reply(Response::BatteryAndStorage(battery)) => {
                self.cache.record_battery(*battery)
            }
            EventPayload::Reply(Response::EndOfContacts {
                most_recent_lastmod,
            }) => self.cache.finish_contact_sync(*most_recent_lastmod),
            _ => {}
        }
    }
}

/// Map a frame onto an event kind and key.
///
/// `Ok(None)` marks frames that are understood but carry nothing a command
/// waits on (RX log lines).
pub fn classify(frame: &[u8]) -> Result<Option<Event>, ProtocolError> {
    let event = match Message::decode(frame)? {
        Message::Push(push) => match push {
            PushNotification::Advert { public_key } => Event::new(
                EventKind::Advert,
                Some(prefix_key(public_key.as_bytes())),
                EventPayload::Advert {
                    public_key,
                    path_updated: false,
                },
            ),
            PushNotification::PathUpdated { public_key } => Event::new(
                EventKind::Advert,
                Some(prefix_key(public_key.as_bytes())),
                EventPayload::Advert {
                    public_key,
                    path_updated: true,
                },
            ),
            PushNotification::NewAdvert(contact) => {
                Event::new(EventKind::ContactUpdate, None, EventPayload::Contact(contact))
            }
            PushNotification::SendConfirmed {
                ack_code,
                trip_time_ms,
            } => Event::new(
                EventKind::Ack,
                Some(ack_code),
                EventPayload::Ack {
                    code: ack_code,
                    trip_time_ms,
                },
            ),
            PushNotification::MessageWaiting => {
                Event::new(EventKind::MessagesWaiting, None, EventPayload::MessagesWaiting)
            }
            PushNotification::LoginSuccess {
                is_admin,
                server_prefix,
            } => Event::new(
                EventKind::Login,
                Some(prefix_key(server_prefix.as_bytes())),
                EventPayload::Login {
                    server_prefix,
                    success: true,
                    is_admin,
                },
            ),
            PushNotification::LoginFail { server_prefix } => Event::new(
                EventKind::Login,
                Some(prefix_key(server_prefix.as_bytes())),
                EventPayload::Login {
                    server_prefix,
                    success: false,
                    is_admin: false,
                },
            ),
            PushNotification::StatusResponse {
                server_prefix,
                data,
            } => Event::new(
                EventKind::StatusResponse,
                Some(prefix_key(server_prefix.as_bytes())),
                EventPayload::Status {
                    server_prefix,
                    data,
                },
            ),
            PushNotification::LogRxData { .. } => return Ok(None),
        },
        Message::Response(response) => match response {
            Response::Contact(contact) => {
                Event::new(EventKind::ContactUpdate, None, EventPayload::Contact(contact))
            }
            Response::ContactMessage(msg) => Event::new(
                EventKind::Message,
                None,
                EventPayload::Message(ReceivedMessage::Contact(msg)),
            ),
            Response::ChannelMessage(msg) => Event::new(
                EventKind::Message,
                None,
                EventPayload::Message(ReceivedMessage::Channel(msg)),
            ),
            other => Event::new(
                EventKind::Reply,
                Some(frame[0] as u32),
                EventPayload::Reply(other),
            ),
        },
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Pattern;
    use crossbeam_channel::unbounded;
    use meshcore_companion_protocol::*;
    use std::time::Duration;

    fn router() -> EventRouter {
        EventRouter::new(WaitRegistry::new(Duration::from_secs(30)), Arc::new(StateCache::new()))
    }

    fn contact_frame(name: &str) -> Vec<u8> {
        let mut f = vec![RESP_CODE_CONTACT];
        f.extend_from_slice(&[0x42; PUB_KEY_SIZE]);
        f.extend_from_slice(&[ADV_TYPE_CHAT, 0, 0xFF]);
        f.extend_from_slice(&[0; MAX_PATH_SIZE]);
        let mut n = [0u8; NAME_FIELD_SIZE];
        n[..name.len()].copy_from_slice(name.as_bytes());
        f.extend_from_slice(&n);
        f.extend_from_slice(&[0; 16]);
        f
    }

    #[test]
    fn test_cache_updated_before_waiter_wakes() {
        let router = router();
        let mut handle = router
            .registry()
            .register(vec![Pattern::any(EventKind::ContactUpdate)], Duration::from_secs(1));
        router.route(&contact_frame("flo2"));
        assert!(handle.wait().event().is_some());
        assert_eq!(router.cache().lookup("flo2").unwrap().name, "flo2");
    }

    #[test]
    fn test_unknown_frame_dropped() {
        let router = router();
        assert!(router.route(&[0x7E, 1, 2]).is_none());
        assert!(router.route(&[RESP_CODE_SENT, 1]).is_none());
    }

    #[test]
    fn test_classify_keys() {
        let mut ack = vec![PUSH_CODE_SEND_CONFIRMED];
        ack.extend_from_slice(&0x3905_0c12u32.to_le_bytes());
        ack.extend_from_slice(&0u32.to_le_bytes());
        let event = classify(&ack).unwrap().unwrap();
        assert_eq!((event.kind, event.key), (EventKind::Ack, Some(0x3905_0c12)));

        let event = classify(&[RESP_CODE_OK]).unwrap().unwrap();
        assert_eq!((event.kind, event.key), (EventKind::Reply, Some(0)));

        let login = [PUSH_CODE_LOGIN_FAIL, 0, 0x12, 0x0c, 0x05, 0x39, 0xAA, 0xBB];
        let event = classify(&login).unwrap().unwrap();
        assert_eq!((event.kind, event.key), (EventKind::Login, Some(0x3905_0c12)));

        assert!(classify(&[PUSH_CODE_LOG_RX_DATA, 0, 0]).unwrap().is_none());
    }

    #[test]
    fn test_unclaimed_ack_is_parked() {
        let router = router();
        let mut ack = vec![PUSH_CODE_SEND_CONFIRMED];
        ack.extend_from_slice(&9u32.to_le_bytes());
        ack.extend_from_slice(&0u32.to_le_bytes());
        router.route(&ack);
        assert_eq!(router.registry().backlog_len(), 1);
    }

    #[test]
    fn test_monitor_takes_messages_waiting() {
        let router = router();
        let (tx, rx) = unbounded();
        router.set_monitor(Some(tx));
        router.route(&[PUSH_CODE_MSG_WAITING]);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::MessagesWaiting);
        assert_eq!(router.registry().backlog_len(), 0);

        router.set_monitor(None);
        router.route(&[PUSH_CODE_MSG_WAITING]);
        assert_eq!(router.registry().backlog_len(), 1);
    }

    #[test]
    fn test_advert_marks_contacts_stale() {
        let router = router();
        router.cache().finish_contact_sync(0);
        let mut advert = vec![PUSH_CODE_ADVERT];
        advert.extend_from_slice(&[7; PUB_KEY_SIZE]);
        router.route(&advert);
        assert!(router.cache().contacts_need_refresh());
    }

    #[test]
    fn test_link_lost_fails_waiters() {
        let router = router();
        let mut handle = router
            .registry()
            .register(vec![Pattern::any(EventKind::Ack)], Duration::from_secs(5));
        router.link_lost("eof");
        assert!(matches!(handle.wait(), crate::registry::WaitOutcome::Disconnected(_)));
    }
}
