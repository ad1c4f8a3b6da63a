//! Command executor.
//!
//! Runs a chain strictly one command at a time. Each command's outcome is
//! printed before the next one starts. Timeouts, lookup failures and
//! device-reported errors are printed and the chain moves on; the error
//! classes marked chain-fatal stop it.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{after, select, unbounded, Receiver};
use meshcore_companion_protocol::{
    Command, ContactInfo, RadioParams, ReceivedMessage, Response, TextType, TuningParams,
    RESP_CODE_BATT_AND_STORAGE, RESP_CODE_CLI_RESPONSE, RESP_CODE_CURR_TIME, RESP_CODE_DEVICE_INFO,
    RESP_CODE_EXPORT_CONTACT, APP_PROTOCOL_VERSION, MAX_PATH_SIZE,
};
use serde_json::{json, Value};

use crate::chain::{self, Chain, CommandName, Invocation};
use crate::error::{CliError, LookupError, Result};
use crate::event::{prefix_key, Event, EventKind, EventPayload, Pattern};
use crate::output::{self, Style};
use crate::registry::{WaitHandle, WaitOutcome};
use crate::session::{resolve, Session};

/// Where the executor is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    /// Between commands.
    Idle,
    /// Talking to the radio for the current command.
    Dispatching,
    /// Blocked on a registered wait.
    AwaitingEvent,
    /// Chain exhausted.
    Done,
    /// Chain aborted.
    Fatal,
}

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Default for event waits without a radio-supplied estimate.
    pub wait_timeout: Duration,
    /// Cached clock and battery younger than this are served locally.
    pub cache_ttl: Duration,
    /// Message display switches.
    pub style: Style,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            wait_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(60),
            style: Style::default(),
        }
    }
}

/// How long `wmt8` waits.
const WMT8_TIMEOUT: Duration = Duration::from_secs(8);

/// Runs command chains against one session.
pub struct Executor<W: Write> {
    session: Session,
    out: W,
    options: ExecOptions,
    state: ExecState,
    monitor: Option<Receiver<Arc<Event>>>,
    input: Option<Receiver<String>>,
    /// JSON values of a `-j` chain, printed as one array when it ends.
    collected: Option<Vec<Value>>,
}

impl<W: Write> Executor<W> {
    /// Executor writing results to `out`.
    pub fn new(session: Session, out: W, options: ExecOptions) -> Self {
        Executor {
            session,
            out,
            options,
            state: ExecState::Idle,
            monitor: None,
            input: None,
            collected: None,
        }
    }

    /// Use `lines` as the interactive input instead of stdin.
    pub fn with_input(mut self, lines: Receiver<String>) -> Self {
        self.input = Some(lines);
        self
    }

    /// The session commands run against.
    pub fn session(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Output sink.
    pub fn output(&self) -> &W {
        &self.out
    }

    /// Current state.
    pub fn state(&self) -> ExecState {
        self.state
    }

    /// Message display switches.
    pub fn style(&self) -> Style {
        self.options.style
    }

    /// Consume the executor, returning the output sink.
    pub fn into_output(self) -> W {
        self.out
    }

    fn enter(&mut self, next: ExecState) {
        if self.state != next {
            tracing::trace!(from = ?self.state, to = ?next, "executor state");
            self.state = next;
        }
    }

    // ========================================================================
    // Chain
    // ========================================================================

    /// Run every command in `chain`. Returns the error that aborted the
    /// chain, if one did.
    ///
    /// A chain parsed in JSON mode prints a single array holding the JSON
    /// output of all its commands.
    pub fn run_chain(&mut self, chain: &mut Chain) -> Result<()> {
        let outer = if chain.is_json() {
            self.collected.replace(Vec::new())
        } else {
            self.collected.take()
        };
        let result = self.run_commands(chain);
        if chain.is_json() {
            let values = self.collected.take().unwrap_or_default();
            self.write_json(&Value::Array(values));
            self.flush();
        }
        self.collected = outer;
        result
    }

    fn run_commands(&mut self, chain: &mut Chain) -> Result<()> {
        self.enter(ExecState::Idle);
        while let Some(next) = chain.next_command() {
            let result = match next {
                Ok(cmd) => {
                    self.enter(ExecState::Dispatching);
                    tracing::debug!(cmd = %cmd, "run");
                    let result = self.execute(&cmd);
                    if let Err(e) = &result {
                        self.report(e, cmd.json);
                    }
                    result
                }
                Err(e) => {
                    self.report(&e, false);
                    Err(e)
                }
            };
            self.flush();

            match result {
                Err(e) if e.is_chain_fatal() => {
                    self.enter(ExecState::Fatal);
                    return Err(e);
                }
                _ => self.enter(ExecState::Idle),
            }
        }
        self.enter(ExecState::Done);
        Ok(())
    }

    /// Run one command.
    pub fn execute(&mut self, cmd: &Invocation) -> Result<()> {
        let json = cmd.json;
        match cmd.name {
            CommandName::Help => {
                self.write_text(chain::help_text().trim_end());
                Ok(())
            }
            CommandName::Version => self.version(json),
            CommandName::Infos => self.infos(),
            CommandName::Card => self.export(None, json),
            CommandName::Reboot => self.reboot(json),
            CommandName::Sleep => {
                let duration = parse_secs(cmd.arg(0))?;
                self.idle_for(duration)
            }
            CommandName::Cli => self.send_cli(cmd.arg(0), json),
            CommandName::Chat => crate::repl::run(self, None),
            CommandName::ChatTo => {
                let contact = self.contact(cmd.arg(0))?;
                crate::repl::run(self, Some(contact))
            }
            CommandName::Msg => {
                let contact = self.contact(cmd.arg(0))?;
                self.send_text(&contact, TextType::Plain, cmd.arg(1), json)
            }
            CommandName::WaitAck => self.wait_ack(json).map(|_| ()),
            CommandName::Chan => {
                let channel = parse_num::<u8>(cmd.arg(0), "channel")?;
                self.send_channel(channel, cmd.arg(1), json)
            }
            CommandName::Public => self.send_channel(0, cmd.arg(0), json),
            CommandName::Recv => {
                if let Some(msg) = self.session.next_message()? {
                    self.print_message(&msg, json);
                }
                Ok(())
            }
            CommandName::SyncMsgs => self.sync_messages(json).map(|_| ()),
            CommandName::WaitMsg => {
                let timeout = self.options.wait_timeout;
                match self.wait_for_message(timeout)? {
                    Some(msg) => {
                        self.print_message(&msg, json);
                        Ok(())
                    }
                    None => Err(CliError::Timeout("msg".to_string())),
                }
            }
            CommandName::TryWaitMsg => {
                let timeout = parse_secs(cmd.arg(0))?;
                self.try_wait_message(timeout, json)
            }
            CommandName::Wmt8 => self.try_wait_message(WMT8_TIMEOUT, json),
            CommandName::MsgsSubscribe => self.subscribe(json),
            CommandName::Advert | CommandName::FloodAdvert => {
                let flood = cmd.name == CommandName::FloodAdvert;
                self.session.expect_ok(&Command::SendSelfAdvert { flood })?;
                self.ok(json, "Advert sent");
                Ok(())
            }
            CommandName::Get => self.get(cmd.arg(0), json),
            CommandName::Set => self.set(cmd.arg(0), cmd.arg(1), json),
            CommandName::Time => {
                let time_secs = parse_num::<u32>(cmd.arg(0), "epoch")?;
                self.session.expect_ok(&Command::SetDeviceTime { time_secs })?;
                self.session.cache().invalidate_device_time();
                self.ok(json, "Time set");
                Ok(())
            }
            CommandName::Clock if cmd.arg(0) == "sync" => self.sync_clock(json),
            CommandName::Clock => self.clock(json),
            CommandName::SyncTime => self.sync_clock(json),
            CommandName::Battery => self.battery(json),
            CommandName::Contacts => self.contacts(json),
            CommandName::ShareContact => {
                let contact = self.contact(cmd.arg(0))?;
                self.session.expect_ok(&Command::ShareContact {
                    public_key: contact.public_key,
                })?;
                self.ok(json, "Contact shared");
                Ok(())
            }
            CommandName::ExportContact => {
                let contact = self.contact(cmd.arg(0))?;
                self.export(Some(&contact), json)
            }
            CommandName::RemoveContact => {
                let contact = self.contact(cmd.arg(0))?;
                self.session.expect_ok(&Command::RemoveContact {
                    public_key: contact.public_key,
                })?;
                self.session.cache().remove_contact(&contact.public_key);
                self.ok(json, "Contact removed");
                Ok(())
            }
            CommandName::ResetPath => {
                let contact = self.contact(cmd.arg(0))?;
                self.session.expect_ok(&Command::ResetPath {
                    public_key: contact.public_key,
                })?;
                self.session.cache().mark_contacts_stale();
                self.ok(json, "Path reset");
                Ok(())
            }
            CommandName::ChangePath => {
                let contact = self.contact(cmd.arg(0))?;
                self.change_path(contact, cmd.arg(1), json)
            }
            CommandName::Login => {
                let contact = self.contact(cmd.arg(0))?;
                self.login(&contact, cmd.arg(1), json).map(|_| ())
            }
            CommandName::WaitLogin => {
                let timeout = self.options.wait_timeout;
                let handle = self
                    .session
                    .registry()
                    .register(vec![Pattern::any(EventKind::Login)], timeout);
                self.finish_login(handle, json).map(|_| ())
            }
            CommandName::Logout => {
                let contact = self.contact(cmd.arg(0))?;
                self.session.expect_ok(&Command::Logout {
                    public_key: contact.public_key,
                })?;
                self.ok(json, "Logout ok");
                Ok(())
            }
            CommandName::Cmd => {
                let contact = self.contact(cmd.arg(0))?;
                self.send_text(&contact, TextType::CliData, cmd.arg(1), json)
            }
            CommandName::ReqStatus => {
                let contact = self.contact(cmd.arg(0))?;
                let sent = self.session.send_message(&Command::SendStatusRequest {
                    public_key: contact.public_key,
                })?;
                if json {
                    self.write_json(&output::sent_json(&sent));
                }
                Ok(())
            }
            CommandName::WaitStatus => self.wait_status(),
        }
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    pub(crate) fn report(&mut self, err: &CliError, json: bool) {
        tracing::debug!("command failed: {:?}", err);
        let text = match err {
            CliError::Timeout(what) => format!("Timeout waiting {}", what),
            CliError::Lookup(LookupError::NotFound(name)) => format!("Unknown contact {}", name),
            other => format!("Error: {}", other),
        };
        if json {
            let mut value = json!({ "error": text });
            if let CliError::Lookup(LookupError::NotFound(name)) = err {
                value["name"] = json!(name);
            }
            self.write_json(&value);
        } else {
            self.write_text(&text);
        }
    }

    pub(crate) fn write_text(&mut self, text: &str) {
        if let Err(e) = writeln!(self.out, "{}", text) {
            tracing::warn!("output failed: {}", e);
        }
    }

    fn write_json(&mut self, value: &Value) {
        if let Some(values) = self.collected.as_mut() {
            values.push(value.clone());
            return;
        }
        let text = output::pretty(value);
        self.write_text(&text);
    }

    fn ok(&mut self, json: bool, text: &str) {
        if json {
            self.write_json(&json!({ "ok": text }));
        } else {
            self.write_text(text);
        }
    }

    pub(crate) fn flush(&mut self) {
        if let Err(e) = self.out.flush() {
            tracing::warn!("output flush failed: {}", e);
        }
    }

    /// Write `text` without a newline.
    pub(crate) fn prompt(&mut self, text: &str) {
        if let Err(e) = write!(self.out, "{}", text) {
            tracing::warn!("output failed: {}", e);
        }
        self.flush();
    }

    /// Interactive input, reading stdin unless another source was given.
    pub(crate) fn input_lines(&mut self) -> Receiver<String> {
        self.input
            .get_or_insert_with(crate::repl::stdin_lines)
            .clone()
    }

    pub(crate) fn print_message(&mut self, msg: &ReceivedMessage, json: bool) {
        let style = self.options.style;
        if json {
            self.write_json(&output::message_json(msg));
            return;
        }
        if style.json_msgs {
            let line = output::message_json(msg).to_string();
            self.write_text(&line);
            return;
        }
        let sender = match msg {
            ReceivedMessage::Contact(m) => self.session.cache().find_by_prefix(&m.sender_prefix),
            ReceivedMessage::Channel(_) => None,
        };
        let line = output::message_line(msg, sender.as_ref(), &style);
        self.write_text(&line);
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    /// Block on `handle`, marking the executor as awaiting an event.
    fn await_event(&mut self, mut handle: WaitHandle, what: &str) -> Result<Arc<Event>> {
        self.enter(ExecState::AwaitingEvent);
        let outcome = handle.wait();
        self.enter(ExecState::Dispatching);
        resolve(outcome, what)
    }

    /// Wait for the ack of the last message sent, or any ack.
    pub(crate) fn wait_ack(&mut self, json: bool) -> Result<bool> {
        let (pattern, timeout) = match self.session.take_pending_ack() {
            Some(sent) if !sent.timeout.is_zero() => (Pattern::keyed(EventKind::Ack, sent.ack_code), sent.timeout),
            Some(sent) => (Pattern::keyed(EventKind::Ack, sent.ack_code), self.options.wait_timeout),
            None => (Pattern::any(EventKind::Ack), self.options.wait_timeout),
        };
        let handle = self.session.registry().register(vec![pattern], timeout);
        let event = self.await_event(handle, "ack")?;
        if let EventPayload::Ack { code, trip_time_ms } = event.payload {
            if json {
                self.write_json(&json!({
                    "code": hex::encode(code.to_le_bytes()),
                    "trip_time_ms": trip_time_ms,
                }));
            } else {
                self.write_text("Msg acked");
            }
        }
        Ok(true)
    }

    /// Fetch the next queued message, waiting up to `timeout` for the
    /// radio to signal one if the queue is empty.
    pub(crate) fn wait_for_message(&mut self, timeout: Duration) -> Result<Option<ReceivedMessage>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Registered ahead of the fetch so a signal sent meanwhile is kept.
            let remaining = deadline.saturating_duration_since(Instant::now());
            let signal = self
                .session
                .registry()
                .register(vec![Pattern::any(EventKind::MessagesWaiting)], remaining);
            if let Some(msg) = self.session.next_message()? {
                return Ok(Some(msg));
            }
            match self.await_event(signal, "msg") {
                Ok(_) => continue,
                Err(CliError::Timeout(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    fn try_wait_message(&mut self, timeout: Duration, json: bool) -> Result<()> {
        if let Some(msg) = self.wait_for_message(timeout)? {
            self.print_message(&msg, json);
        }
        Ok(())
    }

    /// Print every queued message. Returns how many there were. In JSON
    /// mode the messages are printed as one array, also when there are none.
    pub(crate) fn sync_messages(&mut self, json: bool) -> Result<usize> {
        let mut batch = Vec::new();
        let mut count = 0;
        let fetched = loop {
            match self.session.next_message() {
                Ok(Some(msg)) if json => batch.push(output::message_json(&msg)),
                Ok(Some(msg)) => self.print_message(&msg, false),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
            count += 1;
        };
        if json {
            self.write_json(&Value::Array(batch));
        }
        fetched.map(|_| count)
    }

    /// Install the monitor channel so signals reach us while idle.
    pub(crate) fn subscribe(&mut self, json: bool) -> Result<()> {
        if self.monitor.is_none() {
            let (tx, rx) = unbounded();
            self.session.router().set_monitor(Some(tx));
            self.monitor = Some(rx);
            tracing::debug!("subscribed to incoming messages");
        }
        self.session.ensure_contacts()?;
        self.sync_messages(json)?;
        Ok(())
    }

    /// Monitor channel, once subscribed.
    pub(crate) fn monitor(&self) -> Option<Receiver<Arc<Event>>> {
        self.monitor.clone()
    }

    /// Handle one monitor event while idle.
    pub(crate) fn on_monitor_event(&mut self, event: &Event, json: bool) -> Result<()> {
        match event.kind {
            EventKind::MessagesWaiting => {
                self.sync_messages(json)?;
            }
            EventKind::Disconnected if self.session.registry().is_interrupted() => {
                return Err(CliError::Interrupted);
            }
            EventKind::Disconnected => tracing::info!("link dropped, will reconnect on next command"),
            kind => tracing::debug!(%kind, key = ?event.key, "idle event"),
        }
        Ok(())
    }

    /// Sleep, printing incoming messages if subscribed. Returns early only
    /// on teardown.
    fn idle_for(&mut self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            match self.monitor() {
                Some(rx) => {
                    let event = select! {
                        recv(rx) -> event => event.ok(),
                        recv(after(remaining)) -> _ => None,
                    };
                    match event {
                        Some(event) => self.on_monitor_event(&event, false)?,
                        None => return Ok(()),
                    }
                }
                None => {
                    // Nothing is ever routed to this pattern; only teardown,
                    // link loss or the deadline end the wait.
                    let mut handle = self
                        .session
                        .registry()
                        .register(vec![Pattern::any(EventKind::Disconnected)], remaining);
                    self.enter(ExecState::AwaitingEvent);
                    let outcome = handle.wait();
                    self.enter(ExecState::Dispatching);
                    match outcome {
                        WaitOutcome::Interrupted => return Err(CliError::Interrupted),
                        WaitOutcome::Disconnected(reason) => {
                            tracing::info!("link dropped while sleeping: {}", reason)
                        }
                        WaitOutcome::Timeout | WaitOutcome::Event(_) => return Ok(()),
                    }
                }
            }
        }
    }

    /// Status replies print as JSON in both modes.
    pub(crate) fn wait_status(&mut self) -> Result<()> {
        let timeout = self.options.wait_timeout;
        let handle = self
            .session
            .registry()
            .register(vec![Pattern::any(EventKind::StatusResponse)], timeout);
        let event = self.await_event(handle, "status")?;
        if let EventPayload::Status { server_prefix, data } = &event.payload {
            let value = output::status_json(server_prefix, data);
            self.write_json(&value);
        }
        Ok(())
    }

    // ========================================================================
    // Contacts and messaging
    // ========================================================================

    /// Resolve a contact, refreshing the table first if needed.
    pub(crate) fn contact(&mut self, query: &str) -> Result<ContactInfo> {
        self.session.ensure_contacts()?;
        Ok(self.session.cache().lookup(query)?)
    }

    fn send_text(&mut self, contact: &ContactInfo, text_type: TextType, text: &str, json: bool) -> Result<()> {
        let sent = self.session.send_message(&Command::SendTextMessage {
            text_type,
            attempt: 0,
            timestamp: now_secs(),
            recipient_prefix: contact.public_key.prefix(),
            text: text.to_string(),
        })?;
        if json {
            self.write_json(&output::sent_json(&sent));
        }
        Ok(())
    }

    fn send_channel(&mut self, channel_idx: u8, text: &str, json: bool) -> Result<()> {
        self.session.expect_ok(&Command::SendChannelTextMessage {
            text_type: TextType::Plain,
            channel_idx,
            timestamp: now_secs(),
            text: text.to_string(),
        })?;
        if json {
            self.write_json(&json!({ "ok": "sent", "channel_idx": channel_idx }));
        }
        Ok(())
    }

    /// Send a chat line and wait for its ack. Returns whether it was acked.
    pub(crate) fn chat(&mut self, contact: &ContactInfo, text: &str) -> Result<bool> {
        self.send_text(contact, TextType::Plain, text, false)?;
        match self.wait_ack_quiet() {
            Ok(()) => Ok(true),
            Err(CliError::Timeout(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn wait_ack_quiet(&mut self) -> Result<()> {
        let Some(sent) = self.session.take_pending_ack() else {
            return Ok(());
        };
        let timeout = if sent.timeout.is_zero() {
            self.options.wait_timeout
        } else {
            sent.timeout
        };
        let handle = self
            .session
            .registry()
            .register(vec![Pattern::keyed(EventKind::Ack, sent.ack_code)], timeout);
        self.await_event(handle, "ack").map(|_| ())
    }

    /// Log into a repeater or room server and wait for the verdict.
    pub(crate) fn login(&mut self, contact: &ContactInfo, password: &str, json: bool) -> Result<bool> {
        let prefix = contact.public_key.prefix();
        let login_timeout = self.session.config().login_timeout;
        // The verdict can beat the Sent reply, so wait for it from the start.
        let mut handle = self.session.registry().register(
            vec![Pattern::keyed(EventKind::Login, prefix_key(prefix.as_bytes()))],
            login_timeout,
        );
        let sent = self.session.send_message(&Command::SendLogin {
            public_key: contact.public_key,
            password: password.to_string(),
        })?;
        self.session.take_pending_ack();
        handle.extend(sent.timeout.max(login_timeout));
        self.finish_login(handle, json)
    }

    fn finish_login(&mut self, handle: WaitHandle, json: bool) -> Result<bool> {
        let event = self.await_event(handle, "login")?;
        let (success, is_admin) = match event.payload {
            EventPayload::Login {
                success, is_admin, ..
            } => (success, is_admin),
            _ => (false, false),
        };
        if json {
            let mut value = json!({ "login_success": success });
            if success {
                value["is_admin"] = json!(is_admin);
            } else {
                value["error"] = json!("login failed");
            }
            self.write_json(&value);
        } else if success {
            self.write_text("Login success");
        } else {
            self.write_text("Login failed");
        }
        Ok(success)
    }

    fn change_path(&mut self, contact: ContactInfo, path: &str, json: bool) -> Result<()> {
        let out_path =
            hex::decode(path).map_err(|_| CliError::Usage(format!("invalid hex path '{}'", path)))?;
        if out_path.len() > MAX_PATH_SIZE {
            return Err(CliError::Usage(format!("path too long ({} hops)", out_path.len())));
        }
        let contact = ContactInfo {
            out_path_len: out_path.len() as i8,
            out_path,
            ..contact
        };
        self.session
            .expect_ok(&Command::AddUpdateContact { contact })?;
        self.session.cache().mark_contacts_stale();
        self.ok(json, "Path changed");
        Ok(())
    }

    fn contacts(&mut self, json: bool) -> Result<()> {
        self.session.ensure_contacts()?;
        let contacts = self.session.cache().contacts();
        if json {
            self.write_json(&output::contacts_json(&contacts));
        } else {
            for c in &contacts {
                self.write_text(&c.name);
            }
        }
        Ok(())
    }

    fn export(&mut self, contact: Option<&ContactInfo>, json: bool) -> Result<()> {
        let cmd = Command::ExportContact {
            public_key: contact.map(|c| c.public_key),
        };
        match self.session.reply(&cmd, RESP_CODE_EXPORT_CONTACT)? {
            Response::ExportedContact { data } => {
                let uri = output::contact_uri(&data);
                if json {
                    self.write_json(&json!({ "uri": uri }));
                } else {
                    self.write_text(&uri);
                }
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    // ========================================================================
    // Device
    // ========================================================================

    /// Pass `line` to the radio's own console and print what it answers.
    fn send_cli(&mut self, line: &str, json: bool) -> Result<()> {
        let cmd = Command::SendCli { text: line.to_string() };
        match self.session.reply(&cmd, RESP_CODE_CLI_RESPONSE) {
            Ok(Response::CliResponse { text }) => {
                if json {
                    self.write_json(&json!({ "response": text }));
                } else {
                    self.write_text(&text);
                }
                Ok(())
            }
            Ok(other) => Err(unexpected(&other)),
            Err(CliError::Device(code)) => {
                let text = format!("Error sending cli cmd: {}", code);
                if json {
                    self.write_json(&json!({ "error": text }));
                } else {
                    self.write_text(&text);
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn version(&mut self, json: bool) -> Result<()> {
        let query = Command::DeviceQuery {
            app_version: APP_PROTOCOL_VERSION,
        };
        match self.session.reply(&query, RESP_CODE_DEVICE_INFO)? {
            Response::DeviceInfo(info) => {
                if json {
                    self.write_json(&output::device_info_json(&info));
                } else {
                    self.write_text(&output::device_info_text(&info));
                }
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    fn infos(&mut self) -> Result<()> {
        let info = self
            .session
            .cache()
            .self_info()
            .ok_or_else(|| CliError::Protocol("no self info yet".to_string()))?;
        self.write_json(&output::self_info_json(&info));
        Ok(())
    }

    fn reboot(&mut self, json: bool) -> Result<()> {
        // The radio restarts without answering.
        let handle = self
            .session
            .dispatch(&Command::Reboot, Vec::new(), Duration::ZERO)?;
        drop(handle);
        self.session.close();
        if json {
            self.write_json(&json!({ "ok": "rebooting" }));
        }
        Ok(())
    }

    fn battery(&mut self, json: bool) -> Result<()> {
        let cached = self.session.cache().battery(self.options.cache_ttl);
        let bat = match cached {
            Some(bat) => bat,
            None => match self
                .session
                .reply(&Command::GetBatteryAndStorage, RESP_CODE_BATT_AND_STORAGE)?
            {
                Response::BatteryAndStorage(bat) => bat,
                other => return Err(unexpected(&other)),
            },
        };
        if json {
            self.write_json(&output::battery_json(&bat));
        } else {
            self.write_text(&format!("Battery level : {}", bat.battery_millivolts));
        }
        Ok(())
    }

    /// Device clock as reported, served from the cache while fresh.
    fn device_time(&mut self, max_age: Duration) -> Result<u32> {
        if let Some(secs) = self.session.cache().device_time(max_age) {
            return Ok(secs);
        }
        match self.session.reply(&Command::GetDeviceTime, RESP_CODE_CURR_TIME)? {
            Response::CurrentTime { time_secs } => Ok(time_secs),
            other => Err(unexpected(&other)),
        }
    }

    fn clock(&mut self, json: bool) -> Result<()> {
        let raw = self.device_time(self.options.cache_ttl)?;
        let ts = self.session.cache().corrected_time(raw);
        if json {
            self.write_json(&json!({ "time": ts }));
        } else {
            self.write_text(&format!("Current time : {}", output::format_time(ts)));
        }
        Ok(())
    }

    fn sync_clock(&mut self, json: bool) -> Result<()> {
        let now = now_secs();
        match self.session.expect_ok(&Command::SetDeviceTime { time_secs: now }) {
            Ok(()) => {
                let cache = self.session.cache();
                cache.clear_clock_offset();
                cache.invalidate_device_time();
                self.ok(json, "Time synced");
                Ok(())
            }
            Err(CliError::Device(code)) => {
                // The radio will not move its clock backwards; correct reads instead.
                self.session.cache().invalidate_device_time();
                let raw = self.device_time(Duration::ZERO)?;
                let delta = now as i64 - raw as i64;
                self.session.cache().set_clock_offset(delta);
                tracing::info!("device refused time sync ({}), offset {}s", code, delta);
                if json {
                    self.write_json(&json!({ "ok": "offset applied", "offset": delta }));
                } else {
                    self.write_text(&format!("Device refused time sync, applying {}s offset", delta));
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn get(&mut self, param: &str, json: bool) -> Result<()> {
        let style = self.options.style;
        let flag = |on: bool| if on { "on" } else { "off" };
        let value = match param {
            "help" => {
                self.write_text(chain::GET_HELP);
                return Ok(());
            }
            "bat" => return self.battery(json),
            "print_snr" => (json!({ "print_snr": style.print_snr }), flag(style.print_snr).to_string()),
            "json_msgs" => (json!({ "json_msgs": style.json_msgs }), flag(style.json_msgs).to_string()),
            "color" => (json!({ "color": style.color }), flag(style.color).to_string()),
            "name" | "tx" | "coords" | "radio" => {
                let info = self
                    .session
                    .cache()
                    .self_info()
                    .ok_or_else(|| CliError::Protocol("no self info yet".to_string()))?;
                match param {
                    "name" => (json!(info.name), info.name.clone()),
                    "tx" => (json!(info.tx_power_dbm), info.tx_power_dbm.to_string()),
                    "coords" => (
                        json!({ "lat": info.latitude(), "lon": info.longitude() }),
                        format!("{},{}", info.latitude(), info.longitude()),
                    ),
                    _ => (
                        json!({
                            "radio_freq": info.frequency_mhz(),
                            "radio_sf": info.spreading_factor,
                            "radio_bw": info.bandwidth_khz(),
                            "radio_cr": info.coding_rate,
                        }),
                        format!(
                            "{},{},{},{}",
                            info.frequency_mhz(),
                            info.spreading_factor,
                            info.bandwidth_khz(),
                            info.coding_rate
                        ),
                    ),
                }
            }
            other => return Err(CliError::Usage(format!("unknown parameter '{}', see \"get help\"", other))),
        };
        if json {
            self.write_json(&value.0);
        } else {
            self.write_text(&value.1);
        }
        Ok(())
    }

    fn set(&mut self, param: &str, value: &str, json: bool) -> Result<()> {
        let on = value == "on";
        match param {
            "help" => {
                self.write_text(chain::SET_HELP);
                return Ok(());
            }
            "color" => self.options.style.color = on,
            "print_snr" => self.options.style.print_snr = on,
            "json_msgs" => self.options.style.json_msgs = on,
            "pin" => {
                let pin = parse_num::<u32>(value, "pin")?;
                self.session.expect_ok(&Command::SetDevicePin { pin })?;
            }
            "radio" => {
                let parts = split_list(value, 4, "freq,bw,sf,cr")?;
                let params = RadioParams {
                    freq_khz: (parse_num::<f64>(parts[0], "frequency")? * 1000.0).round() as u32,
                    bandwidth_hz: (parse_num::<f64>(parts[1], "bandwidth")? * 1000.0).round() as u32,
                    spreading_factor: parse_num::<u8>(parts[2], "spreading factor")?,
                    coding_rate: parse_num::<u8>(parts[3], "coding rate")?,
                };
                self.session.expect_ok(&Command::SetRadioParams { params })?;
                self.session.cache().update_self_info(|info| {
                    info.freq_khz = params.freq_khz;
                    info.bandwidth_hz = params.bandwidth_hz;
                    info.spreading_factor = params.spreading_factor;
                    info.coding_rate = params.coding_rate;
                });
            }
            "tuning" => {
                let parts = split_list(value, 2, "rx_dly,af")?;
                let params = TuningParams {
                    rx_delay_base: (parse_num::<f64>(parts[0], "rx delay")? * 1000.0).round() as u32,
                    airtime_factor: (parse_num::<f64>(parts[1], "airtime factor")? * 1000.0).round() as u32,
                };
                self.session.expect_ok(&Command::SetTuningParams { params })?;
            }
            "tx" => {
                let power_dbm = parse_num::<u8>(value, "tx power")?;
                self.session.expect_ok(&Command::SetRadioTxPower { power_dbm })?;
                self.session.cache().update_self_info(|info| info.tx_power_dbm = power_dbm);
            }
            "name" => {
                self.session.expect_ok(&Command::SetAdvertName {
                    name: value.to_string(),
                })?;
                let name = value.to_string();
                self.session.cache().update_self_info(|info| info.name = name);
            }
            "lat" | "lon" | "coords" => {
                let (cur_lat, cur_lon) = self
                    .session
                    .cache()
                    .self_info()
                    .map_or((0, 0), |i| (i.adv_lat, i.adv_lon));
                let (lat, lon) = match param {
                    "lat" => (to_micro(parse_num::<f64>(value, "latitude")?), cur_lon),
                    "lon" => (cur_lat, to_micro(parse_num::<f64>(value, "longitude")?)),
                    _ => {
                        let parts = split_list(value, 2, "lat,lon")?;
                        (
                            to_micro(parse_num::<f64>(parts[0], "latitude")?),
                            to_micro(parse_num::<f64>(parts[1], "longitude")?),
                        )
                    }
                };
                self.session.expect_ok(&Command::SetAdvertLatLon { lat, lon })?;
                self.session.cache().update_self_info(|info| {
                    info.adv_lat = lat;
                    info.adv_lon = lon;
                });
            }
            other => return Err(CliError::Usage(format!("unknown parameter '{}', see \"set help\"", other))),
        }
        self.ok(json, "ok");
        Ok(())
    }
}

fn unexpected(response: &Response) -> CliError {
    CliError::Protocol(format!("unexpected reply {:?}", response))
}

fn parse_num<T: std::str::FromStr>(s: &str, what: &str) -> Result<T> {
    s.trim()
        .parse()
        .map_err(|_| CliError::Usage(format!("invalid {} '{}'", what, s)))
}

fn parse_secs(s: &str) -> Result<Duration> {
    let secs = parse_num::<f64>(s, "seconds")?;
    Duration::try_from_secs_f64(secs.max(0.0))
        .map_err(|_| CliError::Usage(format!("invalid seconds '{}'", s)))
}

fn split_list<'a>(s: &'a str, n: usize, shape: &str) -> Result<Vec<&'a str>> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != n {
        return Err(CliError::Usage(format!("expected {}, got '{}'", shape, s)));
    }
    Ok(parts)
}

fn to_micro(degrees: f64) -> i32 {
    (degrees * 1_000_000.0).round() as i32
}

fn now_secs() -> u32 {
    chrono::Utc::now().timestamp().max(0) as u32
}
