//! End-to-end command chains against a scripted radio.

mod common;

use std::time::{Duration, Instant};

use common::*;
use meshcore_cli::chain::Chain;
use meshcore_cli::executor::ExecState;
use meshcore_cli::CliError;
use meshcore_companion_protocol::{
    CMD_APP_START, CMD_GET_BATT_AND_STORAGE, CMD_GET_CONTACTS, CMD_GET_DEVICE_TIME, CMD_SEND_CLI,
    CMD_SEND_TXT_MSG, CMD_SYNC_NEXT_MESSAGE,
};
use serde_json::Value;

fn chain(words: &[&str]) -> Chain {
    Chain::new(words.iter().copied(), false)
}

#[test]
fn test_timeout_does_not_stop_the_chain() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_millis(150));

    let result = exec.run_chain(&mut chain(&["wait_ack", "clock"]));

    assert!(result.is_ok());
    let out = output(&exec);
    assert!(out.contains("Timeout waiting ack"), "{}", out);
    assert!(out.contains("Current time :"), "{}", out);
    assert_eq!(exec.state(), ExecState::Done);
}

#[test]
fn test_ack_resolves_when_it_arrives() {
    let device = Device::new();
    device
        .state
        .lock()
        .after_send
        .push((Duration::from_millis(500), ack_frame(0x3905_0c12)));
    let mut exec = executor(&device, Duration::from_millis(150));

    let start = Instant::now();
    exec.run_chain(&mut chain(&["msg", "flo2", "hi", "wa"])).unwrap();
    let elapsed = start.elapsed();

    // Resolved by the ack, not by the radio's 3260ms estimate or the 150ms default.
    assert!(elapsed >= Duration::from_millis(450), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2500), "{:?}", elapsed);
    assert!(output(&exec).contains("Msg acked"));
}

#[test]
fn test_ack_before_wait_is_not_lost() {
    let device = Device::new();
    device
        .state
        .lock()
        .after_send
        .push((Duration::ZERO, ack_frame(0x3905_0c12)));
    let mut exec = executor(&device, Duration::from_millis(150));

    exec.run_chain(&mut chain(&["msg", "flo2", "hi", "wa"])).unwrap();

    assert!(output(&exec).contains("Msg acked"));
}

#[test]
fn test_unrelated_ack_does_not_satisfy_wait() {
    let device = Device::new();
    {
        let mut state = device.state.lock();
        state.sent = (0x0102_0304, 300);
        state.after_send.push((Duration::ZERO, ack_frame(0xdead_beef)));
    }
    let mut exec = executor(&device, Duration::from_millis(150));

    exec.run_chain(&mut chain(&["msg", "flo2", "hi", "wa"])).unwrap();

    assert!(output(&exec).contains("Timeout waiting ack"));
}

#[test]
fn test_json_send_reports_expected_ack() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_millis(150));

    exec.run_chain(&mut chain(&[".msg", "flo2", "hi"])).unwrap();

    let out = output(&exec);
    assert!(out.contains("\"expected_ack\": \"120c0539\""), "{}", out);
    assert!(out.contains("\"suggested_timeout\": 3260"), "{}", out);
}

#[test]
fn test_consecutive_wait_msg_return_distinct_messages() {
    let device = Device::new();
    {
        let mut state = device.state.lock();
        state.inbox.push_back(message_frame(0x11, "first"));
        state.inbox.push_back(message_frame(0x11, "second"));
    }
    let mut exec = executor(&device, Duration::from_millis(300));

    exec.run_chain(&mut chain(&["contacts", "wm", "wm"])).unwrap();

    let out = output(&exec);
    assert!(out.contains("flo2 (1): first"), "{}", out);
    assert!(out.contains("flo2 (1): second"), "{}", out);
    let fetches = device
        .commands()
        .iter()
        .filter(|c| **c == CMD_SYNC_NEXT_MESSAGE)
        .count();
    assert_eq!(fetches, 2);
}

#[test]
fn test_wait_msg_wakes_on_signal() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_secs(3));

    let pusher = device.clone();
    let thread = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        pusher.deliver(message_frame(0x22, "late"));
    });

    let start = Instant::now();
    exec.run_chain(&mut chain(&["wait_msg"])).unwrap();
    thread.join().unwrap();

    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(output(&exec).contains(": late"));
}

#[test]
fn test_wait_msg_times_out_but_trywait_is_silent() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_millis(100));

    exec.run_chain(&mut chain(&["wm", "wmt", "0.1"])).unwrap();

    let out = output(&exec);
    assert_eq!(out.matches("Timeout waiting msg").count(), 1, "{}", out);
}

#[test]
fn test_login_success() {
    let device = Device::new();
    device
        .state
        .lock()
        .after_send
        .push((Duration::ZERO, login_frame(0x33, true)));
    let mut exec = executor(&device, Duration::from_millis(150));

    exec.run_chain(&mut chain(&["login", "rep1", "secret"])).unwrap();

    assert!(output(&exec).contains("Login success"));
}

#[test]
fn test_login_from_other_server_is_ignored() {
    let device = Device::new();
    {
        let mut state = device.state.lock();
        state.sent = (7, 200);
        state.after_send.push((Duration::ZERO, login_frame(0x11, true)));
    }
    let mut exec = executor(&device, Duration::from_millis(150));

    exec.run_chain(&mut chain(&["login", "rep1", "secret"])).unwrap();

    let out = output(&exec);
    assert!(out.contains("Timeout waiting login"), "{}", out);
}

#[test]
fn test_status_request_then_wait() {
    let device = Device::new();
    device
        .state
        .lock()
        .after_send
        .push((Duration::from_millis(100), status_frame(0x33)));
    let mut exec = executor(&device, Duration::from_secs(2));

    exec.run_chain(&mut chain(&["rs", "rep1", "ws"])).unwrap();

    let out = output(&exec);
    assert!(out.contains("\"bat\": 4012"), "{}", out);
}

#[test]
fn test_ambiguous_contact_continues_chain() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_millis(150));

    let result = exec.run_chain(&mut chain(&["msg", "flo", "hi", "msg", "nobody", "hi", "clock"]));

    assert!(result.is_ok());
    let out = output(&exec);
    assert!(out.contains("ambiguous"), "{}", out);
    assert!(out.contains("Unknown contact nobody"), "{}", out);
    assert!(out.contains("Current time :"), "{}", out);
    assert!(!device.commands().contains(&CMD_SEND_TXT_MSG));
}

#[test]
fn test_usage_error_aborts_chain() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_millis(150));

    let result = exec.run_chain(&mut chain(&["clock", "bogus", "clock"]));

    assert!(matches!(result, Err(CliError::Usage(_))));
    assert_eq!(exec.state(), ExecState::Fatal);
    let out = output(&exec);
    assert_eq!(out.matches("Current time :").count(), 1, "{}", out);
    assert!(out.contains("unknown command 'bogus'"), "{}", out);
}

#[test]
fn test_get_time_alias_reads_clock() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_millis(150));

    exec.run_chain(&mut chain(&["get_time"])).unwrap();

    assert!(output(&exec).contains("(1700000000)"));
}

#[test]
fn test_clock_is_served_from_cache() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_millis(150));

    exec.run_chain(&mut chain(&["clock", "clock"])).unwrap();

    let fetches = device
        .commands()
        .iter()
        .filter(|c| **c == meshcore_companion_protocol::CMD_GET_DEVICE_TIME)
        .count();
    assert_eq!(fetches, 1);
}

#[test]
fn test_refused_clock_sync_applies_offset() {
    let device = Device::new();
    {
        let mut state = device.state.lock();
        state.refuse_time = true;
        state.time_secs = chrono::Utc::now().timestamp() as u32 - 3600;
    }
    let mut exec = executor(&device, Duration::from_millis(150));

    exec.run_chain(&mut chain(&["clock", "sync", ".clock"])).unwrap();

    let out = output(&exec);
    assert!(out.contains("applying"), "{}", out);
    let reported: i64 = out
        .lines()
        .find_map(|l| l.trim().strip_prefix("\"time\": "))
        .and_then(|v| v.trim_end_matches(',').parse().ok())
        .unwrap();
    assert!((reported - chrono::Utc::now().timestamp()).abs() < 5, "{}", out);
}

#[test]
fn test_contacts_refresh_only_when_stale() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_millis(150));

    exec.run_chain(&mut chain(&["contacts", "contacts"])).unwrap();
    let loads = |d: &Device| d.commands().iter().filter(|c| **c == CMD_GET_CONTACTS).count();
    assert_eq!(loads(&device), 1);

    let mut advert = vec![meshcore_companion_protocol::PUSH_CODE_ADVERT];
    advert.extend_from_slice(&key(0x11));
    device.push(&advert);

    exec.run_chain(&mut chain(&["lc"])).unwrap();
    assert_eq!(loads(&device), 2);
    assert!(output(&exec).contains("rep1"));
}

#[test]
fn test_set_name_updates_cached_self_info() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_millis(150));

    exec.run_chain(&mut chain(&["get", "name", "set", "name", "relay", "get", "name"])).unwrap();

    let out = output(&exec);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines, vec!["base", "ok", "relay"]);
}

#[test]
fn test_reconnects_after_link_drop() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_millis(150));

    device.hang_up();
    exec.run_chain(&mut chain(&["get_bat"])).unwrap();

    assert!(output(&exec).contains("Battery level : 3912"));
}

#[test]
fn test_interrupt_ends_sleep() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_millis(150));
    let router = exec.session().router().clone();

    let thread = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        router.interrupt();
    });

    let start = Instant::now();
    let result = exec.run_chain(&mut chain(&["sleep", "10", "clock"]));
    thread.join().unwrap();

    assert!(matches!(result, Err(CliError::Interrupted)));
    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(!output(&exec).contains("Current time"));
}

#[test]
fn test_chat_mode_sends_and_selects() {
    let device = Device::new();
    device
        .state
        .lock()
        .after_send
        .push((Duration::ZERO, ack_frame(0x3905_0c12)));
    let (tx, rx) = crossbeam_channel::unbounded();
    let session = meshcore_cli::Session::open(Box::new(device.clone()), session_config()).unwrap();
    let mut exec =
        meshcore_cli::Executor::new(session, Vec::new(), options(Duration::from_millis(150)))
            .with_input(rx);

    for line in ["to flo2", "to", "hello there", "quit"] {
        tx.send(line.to_string()).unwrap();
    }
    exec.run_chain(&mut chain(&["chat"])).unwrap();

    let out = output(&exec);
    assert!(out.contains("flo2> "), "{}", out);
    let sent = device
        .state
        .lock()
        .received
        .iter()
        .find(|c| c[0] == CMD_SEND_TXT_MSG)
        .cloned()
        .unwrap();
    assert!(sent.ends_with(b"hello there"));
}

#[test]
fn test_late_ack_after_timeout_is_not_reported_later() {
    let device = Device::new();
    {
        let mut state = device.state.lock();
        state.sent = (0x3905_0c12, 200);
        state.after_send.push((Duration::from_millis(400), ack_frame(0x3905_0c12)));
    }
    let mut exec = executor(&device, Duration::from_millis(150));

    exec.run_chain(&mut chain(&["msg", "flo2", "hi", "wa", "sleep", "0.5", "wa"]))
        .unwrap();

    let out = output(&exec);
    assert_eq!(out.matches("Timeout waiting ack").count(), 2, "{}", out);
    assert!(!out.contains("Msg acked"), "{}", out);
}

#[test]
fn test_hang_up_during_wait_aborts_chain() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_millis(150));
    let peer = device.clone();

    let thread = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        peer.hang_up();
    });

    let start = Instant::now();
    let result = exec.run_chain(&mut chain(&["msg", "flo2", "hi", "wa", "clock"]));
    thread.join().unwrap();

    assert!(matches!(&result, Err(CliError::Disconnected(reason)) if reason == "peer hung up"), "{:?}", result);
    assert_eq!(exec.state(), ExecState::Fatal);
    // Released by the hang-up, not by the 3260ms ack estimate.
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!output(&exec).contains("Current time"));
    assert!(!device.commands().contains(&CMD_GET_DEVICE_TIME));
}

#[test]
fn test_failed_write_is_retried_on_a_new_link() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_millis(150));
    device.state.lock().fail_sends = Some((CMD_GET_DEVICE_TIME, 1));

    exec.run_chain(&mut chain(&["clock"])).unwrap();

    assert!(output(&exec).contains("Current time :"));
    let commands = device.commands();
    assert_eq!(commands.iter().filter(|c| **c == CMD_APP_START).count(), 2);
    assert_eq!(commands.iter().filter(|c| **c == CMD_GET_DEVICE_TIME).count(), 1);
}

#[test]
fn test_write_failing_after_reconnect_aborts_chain() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_millis(150));
    device.state.lock().fail_sends = Some((CMD_GET_DEVICE_TIME, 2));

    let result = exec.run_chain(&mut chain(&["clock", "get_bat"]));

    assert!(matches!(result, Err(CliError::Link(_))), "{:?}", result);
    assert_eq!(exec.state(), ExecState::Fatal);
    assert!(!device.commands().contains(&CMD_GET_BATT_AND_STORAGE));
}

#[test]
fn test_cli_line_prints_console_output() {
    let device = Device::new();
    let mut exec = executor(&device, Duration::from_millis(150));

    exec.run_chain(&mut chain(&["cli", "ver", "@neighbors"])).unwrap();

    let out = output(&exec);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines, vec!["> ver", "> neighbors"]);
    let sent: Vec<Vec<u8>> = device
        .state
        .lock()
        .received
        .iter()
        .filter(|c| c[0] == CMD_SEND_CLI)
        .cloned()
        .collect();
    assert_eq!(sent[1], [&[CMD_SEND_CLI][..], b"neighbors"].concat());
}

#[test]
fn test_json_chain_prints_one_array() {
    let device = Device::new();
    {
        let mut state = device.state.lock();
        state.inbox.push_back(message_frame(0x11, "first"));
        state.inbox.push_back(message_frame(0x11, "second"));
    }
    let mut exec = executor(&device, Duration::from_millis(150));

    exec.run_chain(&mut Chain::new(["get_bat", "sm", "wa", "sm"], true))
        .unwrap();

    let out = output(&exec);
    let value: Value = serde_json::from_str(&out).unwrap_or_else(|e| panic!("{}: {}", e, out));
    let items = value.as_array().unwrap();
    assert_eq!(items.len(), 4, "{}", out);
    assert_eq!(items[1].as_array().map(Vec::len), Some(2));
    assert_eq!(items[2]["error"], "Timeout waiting ack");
    assert_eq!(items[3], Value::Array(Vec::new()));
}
