//! Plain line-oriented chat mode.

use std::io::{BufRead, Write};
use std::sync::Arc;

use crossbeam_channel::{select, unbounded, Receiver};
use meshcore_companion_protocol::ContactInfo;

use crate::chain::Chain;
use crate::error::{CliError, Result};
use crate::event::Event;
use crate::executor::Executor;

/// First words that run as a command chain as typed.
const PASSTHROUGH: &[&str] = &[
    "set", "get", "clock", "time", "ver", "reboot", "advert", "floodadv", "chan", "card", "lc",
    "infos", "i", "contacts",
];

enum Input {
    Line(Option<String>),
    Event(Option<Arc<Event>>),
}

enum Flow {
    Continue,
    Quit,
}

/// Stdin lines, read on a background thread. The channel closes on EOF.
pub fn stdin_lines() -> Receiver<String> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .map_err(|e| tracing::error!("failed to spawn stdin reader: {}", e))
        .ok();
    rx
}

/// Run the chat loop until the user quits, input ends or the session is
/// torn down.
pub fn run<W: Write>(exec: &mut Executor<W>, to: Option<ContactInfo>) -> Result<()> {
    let lines = exec.input_lines();
    let mut to = to;
    let mut missed_ack = false;

    exec.subscribe(false)?;
    tracing::debug!(to = ?to.as_ref().map(|c| c.name.as_str()), "chat started");

    loop {
        exec.prompt(&prompt(to.as_ref(), missed_ack));

        let input = match exec.monitor() {
            Some(monitor) => select! {
                recv(lines) -> line => Input::Line(line.ok()),
                recv(monitor) -> event => Input::Event(event.ok()),
            },
            None => Input::Line(lines.recv().ok()),
        };
        let line = match input {
            Input::Event(Some(event)) => {
                exec.write_text("");
                exec.on_monitor_event(&event, false)?;
                continue;
            }
            Input::Event(None) => continue,
            Input::Line(Some(line)) => line,
            Input::Line(None) => {
                exec.write_text("");
                return Ok(());
            }
        };

        match handle_line(exec, &mut to, &mut missed_ack, line.trim()) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => return Ok(()),
            Err(CliError::Interrupted) => return Err(CliError::Interrupted),
            Err(e) => exec.report(&e, false),
        }
        exec.flush();
    }
}

fn prompt(to: Option<&ContactInfo>, missed_ack: bool) -> String {
    let name = to.map_or("", |c| c.name.as_str());
    let mark = if missed_ack { "!" } else { "" };
    format!("{}{}> ", name, mark)
}

fn handle_line<W: Write>(
    exec: &mut Executor<W>,
    to: &mut Option<ContactInfo>,
    missed_ack: &mut bool,
    line: &str,
) -> Result<Flow> {
    if line.is_empty() {
        return Ok(Flow::Continue);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word {
        "q" | "quit" => return Ok(Flow::Quit),
        "to" if rest.is_empty() => {
            let text = match to {
                Some(c) => c.name.clone(),
                None => "No recipient".to_string(),
            };
            exec.write_text(&text);
        }
        "to" => {
            *to = Some(exec.contact(rest)?);
            *missed_ack = false;
        }
        "list" => {
            exec.session().ensure_contacts()?;
            let contacts = exec.session().cache().contacts();
            for c in &contacts {
                exec.write_text(&c.name);
            }
        }
        "public" => run_chain(exec, vec!["public".to_string(), rest.to_string()])?,
        _ if line.len() > 1 && line.starts_with('@') => {
            run_chain(exec, vec!["cli".to_string(), line[1..].to_string()])?
        }
        _ if line.starts_with('$') => run_chain(exec, split_line(&line[1..]))?,
        _ if line.starts_with('.') => run_chain(exec, split_line(line))?,
        _ if PASSTHROUGH.contains(&word) => run_chain(exec, split_line(line))?,
        _ => {
            let Some(contact) = to.clone() else {
                exec.write_text("No recipient, select one with 'to <name>'");
                return Ok(Flow::Continue);
            };
            let key = contact.public_key.to_hex();
            match word {
                "sc" | "ec" | "rp" | "logout" if rest.is_empty() => {
                    run_chain(exec, vec![word.to_string(), key])?
                }
                "reset" if rest == "path" => run_chain(exec, vec!["rp".to_string(), key])?,
                "cmd" | "cp" | "login" if !rest.is_empty() => {
                    run_chain(exec, vec![word.to_string(), key, rest.to_string()])?
                }
                "rs" if rest.is_empty() => {
                    run_chain(exec, vec!["rs".to_string(), key, "ws".to_string()])?
                }
                _ if line.starts_with(':') => {
                    run_chain(exec, vec!["cmd".to_string(), key, line[1..].to_string()])?
                }
                _ => *missed_ack = !exec.chat(&contact, line)?,
            }
        }
    }
    Ok(Flow::Continue)
}

/// Run `tokens` as a chain. Only teardown ends the chat; other failures
/// were already printed.
fn run_chain<W: Write>(exec: &mut Executor<W>, tokens: Vec<String>) -> Result<()> {
    let mut chain = Chain::new(tokens, false);
    match exec.run_chain(&mut chain) {
        Err(CliError::Interrupted) => Err(CliError::Interrupted),
        _ => Ok(()),
    }
}

/// Split a line into words. Double quotes group words and are removed.
pub fn split_line(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_word = false;
    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}
