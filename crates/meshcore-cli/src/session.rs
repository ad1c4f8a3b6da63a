//! The session: one link to the radio plus the state routed from it.
//!
//! Every request follows the same sequence: register the waiter, send the
//! command, then block on the handle. Registering first means a reply that
//! races the send cannot be missed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshcore_companion_protocol::{
    Command, ReceivedMessage, Response, APP_PROTOCOL_VERSION, DEFAULT_APP_NAME,
    RESP_CODE_DEVICE_INFO, RESP_CODE_DISABLED, RESP_CODE_END_OF_CONTACTS, RESP_CODE_ERR,
    RESP_CODE_NO_MORE_MESSAGES, RESP_CODE_OK, RESP_CODE_SELF_INFO, RESP_CODE_SENT,
};

use crate::cache::StateCache;
use crate::error::{CliError, ConnectError, LinkError, Result};
use crate::event::{Event, EventKind, EventPayload, Pattern};
use crate::registry::{WaitHandle, WaitOutcome, WaitRegistry};
use crate::router::EventRouter;
use crate::transport::{Connector, FrameSink, Transport};

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long to wait for a direct reply.
    pub reply_timeout: Duration,
    /// Login wait when the radio gives no estimate.
    pub login_timeout: Duration,
    /// Reconnects tried before a send failure is reported.
    pub reconnect_attempts: u32,
    /// How long unclaimed acks and signals stay claimable.
    pub backlog_ttl: Duration,
    /// Name announced in the handshake.
    pub app_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            reply_timeout: Duration::from_secs(5),
            login_timeout: Duration::from_secs(5),
            reconnect_attempts: 1,
            backlog_ttl: Duration::from_secs(30),
            app_name: DEFAULT_APP_NAME.to_string(),
        }
    }
}

/// What the radio told us after accepting a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentInfo {
    /// Code the recipient's ack will carry.
    pub ack_code: u32,
    /// Radio's estimate of the round trip.
    pub timeout: Duration,
    /// Sent by flood rather than a direct path.
    pub flood: bool,
}

/// Frame sink bound to one link. Retired on reconnect so a dying link
/// cannot fail waiters registered against its successor.
struct LinkSink {
    router: Arc<EventRouter>,
    live: AtomicBool,
}

impl LinkSink {
    fn new(router: Arc<EventRouter>) -> Self {
        LinkSink {
            router,
            live: AtomicBool::new(true),
        }
    }

    fn retire(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

impl FrameSink for LinkSink {
    fn on_frame(&self, frame: &[u8]) {
        if self.live.load(Ordering::SeqCst) {
            self.router.route(frame);
        }
    }

    fn on_closed(&self, reason: &str) {
        if self.live.swap(false, Ordering::SeqCst) {
            self.router.link_lost(reason);
        }
    }
}

/// One connection to a companion radio.
pub struct Session {
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    sink: Option<Arc<LinkSink>>,
    router: Arc<EventRouter>,
    config: SessionConfig,
    pending_ack: Option<SentInfo>,
}

impl Session {
    /// Connect and run the startup handshake.
    pub fn open(connector: Box<dyn Connector>, config: SessionConfig) -> Result<Session> {
        let registry = WaitRegistry::new(config.backlog_ttl);
        let router = Arc::new(EventRouter::new(registry, Arc::new(StateCache::new())));
        let mut session = Session {
            connector,
            transport: None,
            sink: None,
            router,
            config,
            pending_ack: None,
        };
        session.connect()?;
        Ok(session)
    }

    /// (Re)open the link and run the handshake.
    pub fn connect(&mut self) -> Result<()> {
        self.drop_link();
        if self.registry().is_interrupted() {
            return Err(CliError::Interrupted);
        }

        let sink = Arc::new(LinkSink::new(self.router.clone()));
        let transport = self.connector.connect(sink.clone())?;
        tracing::debug!("link up: {}", transport.describe());
        self.transport = Some(transport);
        self.sink = Some(sink);

        self.handshake().map_err(|e| match e {
            CliError::Interrupted => e,
            other => ConnectError::Handshake {
                target: self.connector.describe(),
                reason: other.to_string(),
            }
            .into(),
        })
    }

    fn handshake(&mut self) -> Result<()> {
        let query = Command::DeviceQuery {
            app_version: APP_PROTOCOL_VERSION,
        };
        match self.exchange(&query, RESP_CODE_DEVICE_INFO) {
            Ok(_) => {}
            // Older firmware does not know the query; the app start still works.
            Err(CliError::Device(code)) => tracing::debug!("device query refused: {}", code),
            Err(e) => return Err(e),
        }
        let start = Command::app_start(self.config.app_name.clone());
        self.exchange(&start, RESP_CODE_SELF_INFO)?;
        tracing::info!(
            "session ready with {}",
            self.cache().self_info().map(|i| i.name).unwrap_or_default()
        );
        Ok(())
    }

    /// Single request on the current link, no reconnect.
    fn exchange(&mut self, cmd: &Command, code: u8) -> Result<Arc<Event>> {
        let mut handle = self
            .registry()
            .register(with_failures(vec![Pattern::reply(code)]), self.config.reply_timeout);
        self.send_raw(&cmd.encode())?;
        resolve(handle.wait(), &describe(cmd))
    }

    fn send_raw(&mut self, payload: &[u8]) -> std::result::Result<(), LinkError> {
        match self.transport.as_mut() {
            Some(transport) => transport.send(payload),
            None => Err(LinkError::Closed),
        }
    }

    fn drop_link(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.retire();
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }

    /// Reconnect if the link dropped while idle.
    pub fn ensure_connected(&mut self) -> Result<()> {
        if self.registry().is_interrupted() {
            return Err(CliError::Interrupted);
        }
        if self.is_connected() {
            return Ok(());
        }
        if self.config.reconnect_attempts == 0 {
            return Err(LinkError::Closed.into());
        }
        let mut last = None;
        for attempt in 1..=self.config.reconnect_attempts {
            tracing::warn!(attempt, "link down, reconnecting to {}", self.connector.describe());
            match self.connect() {
                Ok(()) => return Ok(()),
                Err(CliError::Interrupted) => return Err(CliError::Interrupted),
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap_or(CliError::Link(LinkError::Closed)))
    }

    /// Register `patterns` (plus error replies) and send `cmd`.
    ///
    /// A failed send is retried after reconnecting, up to the configured
    /// number of attempts.
    pub fn dispatch(&mut self, cmd: &Command, patterns: Vec<Pattern>, timeout: Duration) -> Result<WaitHandle> {
        self.ensure_connected()?;
        let payload = cmd.encode();
        let patterns = with_failures(patterns);
        let mut attempts = 0;
        loop {
            let handle = self.registry().register(patterns.clone(), timeout);
            tracing::debug!(cmd = %describe(cmd), "send");
            match self.send_raw(&payload) {
                Ok(()) => return Ok(handle),
                Err(e) if attempts < self.config.reconnect_attempts => {
                    drop(handle);
                    attempts += 1;
                    tracing::warn!("send failed ({}), reconnecting", e);
                    self.connect()?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Dispatch and block for the outcome.
    pub fn request(&mut self, cmd: &Command, patterns: Vec<Pattern>, timeout: Duration) -> Result<Arc<Event>> {
        let mut handle = self.dispatch(cmd, patterns, timeout)?;
        resolve(handle.wait(), &describe(cmd))
    }

    /// Send `cmd` and return the reply with response code `code`.
    pub fn reply(&mut self, cmd: &Command, code: u8) -> Result<Response> {
        let event = self.request(cmd, vec![Pattern::reply(code)], self.config.reply_timeout)?;
        event
            .reply()
            .cloned()
            .ok_or_else(|| CliError::Protocol(format!("unexpected {} for {}", event.kind, describe(cmd))))
    }

    /// Send a command whose only answer is `OK`.
    pub fn expect_ok(&mut self, cmd: &Command) -> Result<()> {
        self.reply(cmd, RESP_CODE_OK).map(|_| ())
    }

    /// Send a text message, login or status request and remember its ack.
    pub fn send_message(&mut self, cmd: &Command) -> Result<SentInfo> {
        match self.reply(cmd, RESP_CODE_SENT)? {
            Response::Sent {
                is_flood,
                expected_ack,
                est_timeout_ms,
            } => {
                let info = SentInfo {
                    ack_code: expected_ack,
                    timeout: Duration::from_millis(est_timeout_ms as u64),
                    flood: is_flood,
                };
                tracing::debug!("sent, expecting ack {:08x} within {}ms", expected_ack, est_timeout_ms);
                self.pending_ack = Some(info);
                Ok(info)
            }
            other => Err(CliError::Protocol(format!("expected sent reply, got {:?}", other))),
        }
    }

    /// Ack expected by the last message sent.
    pub fn pending_ack(&self) -> Option<SentInfo> {
        self.pending_ack
    }

    /// Forget the pending ack once it was waited for.
    pub fn take_pending_ack(&mut self) -> Option<SentInfo> {
        self.pending_ack.take()
    }

    /// Pop one message from the radio's queue.
    pub fn next_message(&mut self) -> Result<Option<ReceivedMessage>> {
        let event = self.request(
            &Command::SyncNextMessage,
            vec![
                Pattern::any(EventKind::Message),
                Pattern::reply(RESP_CODE_NO_MORE_MESSAGES),
            ],
            self.config.reply_timeout,
        )?;
        match &event.payload {
            EventPayload::Message(msg) => Ok(Some(msg.clone())),
            _ => Ok(None),
        }
    }

    /// Stream the contact table into the cache. Returns how many records
    /// arrived. The wait keeps extending while records are flowing.
    pub fn get_contacts(&mut self, since: Option<u32>) -> Result<u64> {
        let cache = self.cache().clone();
        let before = cache.contact_updates();
        let timeout = self.config.reply_timeout;
        let mut handle = self.dispatch(
            &Command::GetContacts { since },
            vec![Pattern::reply(RESP_CODE_END_OF_CONTACTS)],
            timeout,
        )?;
        let mut seen = before;
        let outcome = handle.wait_while(timeout, || {
            let now = cache.contact_updates();
            let moved = now != seen;
            seen = now;
            moved
        });
        resolve(outcome, "end of contacts")?;
        Ok(cache.contact_updates() - before)
    }

    /// Refresh contacts only if never loaded or marked stale.
    pub fn ensure_contacts(&mut self) -> Result<()> {
        if self.cache().contacts_need_refresh() {
            let since = self.cache().contacts_since();
            let count = self.get_contacts(since)?;
            tracing::debug!(count, ?since, "contacts refreshed");
        }
        Ok(())
    }

    /// The router frames are fed to.
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// The wait registry.
    pub fn registry(&self) -> &WaitRegistry {
        self.router.registry()
    }

    /// The state cache.
    pub fn cache(&self) -> &Arc<StateCache> {
        self.router.cache()
    }

    /// Session tuning.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the link is up.
    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().map_or(false, |t| t.is_connected())
    }

    /// Target description.
    pub fn describe(&self) -> String {
        self.connector.describe()
    }

    /// Close the link.
    pub fn close(&mut self) {
        self.drop_link();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.drop_link();
    }
}

/// Turn a wait outcome into the event or the error it stands for.
pub fn resolve(outcome: WaitOutcome, what: &str) -> Result<Arc<Event>> {
    match outcome {
        WaitOutcome::Event(event) => match event.reply() {
            Some(Response::Error(code)) => Err(CliError::Device(*code)),
            Some(Response::Disabled) => Err(CliError::Protocol(format!("{} is disabled on the device", what))),
            _ => Ok(event),
        },
        WaitOutcome::Timeout => Err(CliError::Timeout(what.to_string())),
        WaitOutcome::Disconnected(reason) => Err(CliError::Disconnected(reason)),
        WaitOutcome::Interrupted => Err(CliError::Interrupted),
    }
}

fn with_failures(mut patterns: Vec<Pattern>) -> Vec<Pattern> {
    patterns.push(Pattern::reply(RESP_CODE_ERR));
    patterns.push(Pattern::reply(RESP_CODE_DISABLED));
    patterns
}

fn describe(cmd: &Command) -> String {
    let debug = format!("{:?}", cmd);
    let name = debug
        .split(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or("command");
    format!("reply to {}", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcore_companion_protocol::FirmwareErrorCode;

    #[test]
    fn test_resolve_maps_outcomes() {
        assert!(matches!(resolve(WaitOutcome::Timeout, "ack"), Err(CliError::Timeout(w)) if w == "ack"));
        assert!(matches!(resolve(WaitOutcome::Interrupted, "ack"), Err(CliError::Interrupted)));

        let err = Arc::new(Event::new(
            EventKind::Reply,
            Some(RESP_CODE_ERR as u32),
            EventPayload::Reply(Response::Error(FirmwareErrorCode::NotFound)),
        ));
        assert!(matches!(
            resolve(WaitOutcome::Event(err), "x"),
            Err(CliError::Device(FirmwareErrorCode::NotFound))
        ));
    }

    #[test]
    fn test_describe_uses_variant_name() {
        assert_eq!(describe(&Command::GetDeviceTime), "reply to GetDeviceTime");
        assert_eq!(
            describe(&Command::SendSelfAdvert { flood: true }),
            "reply to SendSelfAdvert"
        );
    }
}
