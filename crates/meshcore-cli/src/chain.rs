//! Command chain parsing.
//!
//! The chain is consumed left to right: each command takes exactly as many
//! following tokens as its signature declares. Parsing is lazy so commands
//! ahead of a bad one still run and print.

use std::collections::VecDeque;
use std::fmt;

use crate::error::CliError;

/// Every command the executor knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    Help,
    Version,
    Infos,
    Card,
    Reboot,
    Sleep,
    Cli,
    Chat,
    ChatTo,
    Msg,
    WaitAck,
    Chan,
    Public,
    Recv,
    SyncMsgs,
    WaitMsg,
    TryWaitMsg,
    Wmt8,
    MsgsSubscribe,
    Advert,
    FloodAdvert,
    Get,
    Set,
    Time,
    Clock,
    SyncTime,
    Battery,
    Contacts,
    ShareContact,
    ExportContact,
    RemoveContact,
    ResetPath,
    ChangePath,
    Login,
    WaitLogin,
    Logout,
    Cmd,
    ReqStatus,
    WaitStatus,
}

/// How many arguments a command takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many.
    Fixed(usize),
    /// `clock` takes an optional `sync`.
    Clock,
    /// `set <param> <value>`, or `set help`.
    Set,
    /// `get <param>`.
    Get,
}

/// Static description of a command.
#[derive(Debug, Clone, Copy)]
pub struct CommandDef {
    /// Which command.
    pub name: CommandName,
    /// Accepted spellings; the first is canonical.
    pub aliases: &'static [&'static str],
    /// Argument count.
    pub arity: Arity,
    /// Argument synopsis.
    pub args: &'static str,
    /// One-line description.
    pub about: &'static str,
    /// Help section.
    pub section: &'static str,
}

impl CommandDef {
    /// Canonical spelling.
    pub fn canonical(&self) -> &'static str {
        self.aliases[0]
    }

    /// Usage line for error messages.
    pub fn synopsis(&self) -> String {
        if self.args.is_empty() {
            self.canonical().to_string()
        } else {
            format!("{} {}", self.canonical(), self.args)
        }
    }
}

macro_rules! def {
    ($name:ident, [$($alias:literal),+], $arity:expr, $args:literal, $about:literal, $section:expr) => {
        CommandDef {
            name: CommandName::$name,
            aliases: &[$($alias),+],
            arity: $arity,
            args: $args,
            about: $about,
            section: $section,
        }
    };
}

const GENERAL: &str = "General commands";
const MESSAGING: &str = "Messaging";
const MANAGEMENT: &str = "Management";
const CONTACTS: &str = "Contacts";
const REPEATERS: &str = "Repeaters";

/// Command table.
pub const COMMANDS: &[CommandDef] = &[
    def!(Help, ["help"], Arity::Fixed(0), "", "print this help", GENERAL),
    def!(Chat, ["chat", "im", "interactive"], Arity::Fixed(0), "", "enter the chat (interactive) mode", GENERAL),
    def!(ChatTo, ["chat_to", "imto", "to"], Arity::Fixed(1), "<ct>", "enter chat with contact", GENERAL),
    def!(Infos, ["infos", "i"], Arity::Fixed(0), "", "print informations about the node", GENERAL),
    def!(Card, ["card"], Arity::Fixed(0), "", "export this node URI", GENERAL),
    def!(Version, ["ver", "query", "v", "q"], Arity::Fixed(0), "", "firmware version", GENERAL),
    def!(Reboot, ["reboot"], Arity::Fixed(0), "", "reboots node", GENERAL),
    def!(Sleep, ["sleep", "s"], Arity::Fixed(1), "<secs>", "sleeps for a given amount of secs", GENERAL),
    def!(Cli, ["cli", "@"], Arity::Fixed(1), "<cmd>", "send a cmd to node's cli (if avail)", GENERAL),
    def!(Msg, ["msg", "m", "{"], Arity::Fixed(2), "<name> <msg>", "send message to node by name", MESSAGING),
    def!(WaitAck, ["wait_ack", "wa", "}"], Arity::Fixed(0), "", "wait an ack", MESSAGING),
    def!(Chan, ["chan", "ch"], Arity::Fixed(2), "<nb> <msg>", "send message to channel number <nb>", MESSAGING),
    def!(Public, ["public", "dch"], Arity::Fixed(1), "<msg>", "send message to public channel (0)", MESSAGING),
    def!(Recv, ["recv", "r"], Arity::Fixed(0), "", "reads next msg", MESSAGING),
    def!(SyncMsgs, ["sync_msgs", "sm"], Arity::Fixed(0), "", "gets all unread msgs from the node", MESSAGING),
    def!(WaitMsg, ["wait_msg", "wm"], Arity::Fixed(0), "", "wait for a message and read it", MESSAGING),
    def!(TryWaitMsg, ["trywait_msg", "wmt"], Arity::Fixed(1), "<secs>", "wait for a message with a timeout", MESSAGING),
    def!(MsgsSubscribe, ["msgs_subscribe", "ms"], Arity::Fixed(0), "", "print incoming messages during sleep", MESSAGING),
    def!(Advert, ["advert", "a"], Arity::Fixed(0), "", "sends advert", MANAGEMENT),
    def!(FloodAdvert, ["flood_advert", "floodadv"], Arity::Fixed(0), "", "flood advert", MANAGEMENT),
    def!(Get, ["get"], Arity::Get, "<param>", "gets a param, \"get help\" for more", MANAGEMENT),
    def!(Set, ["set"], Arity::Set, "<param> <value>", "sets a param, \"set help\" for more", MANAGEMENT),
    def!(Time, ["time"], Arity::Fixed(1), "<epoch>", "sets time to given epoch", MANAGEMENT),
    def!(Clock, ["clock", "get_time"], Arity::Clock, "[sync]", "get current time, or sync it", MANAGEMENT),
    def!(SyncTime, ["sync_time", "st"], Arity::Fixed(0), "", "sync device clock", MANAGEMENT),
    def!(Battery, ["get_bat"], Arity::Fixed(0), "", "battery level in mV", MANAGEMENT),
    def!(Contacts, ["contacts", "list", "lc"], Arity::Fixed(0), "", "gets contact list", CONTACTS),
    def!(ShareContact, ["share_contact", "sc"], Arity::Fixed(1), "<ct>", "share a contact with others", CONTACTS),
    def!(ExportContact, ["export_contact", "ec"], Arity::Fixed(1), "<ct>", "get a contact's URI", CONTACTS),
    def!(RemoveContact, ["remove_contact"], Arity::Fixed(1), "<ct>", "removes a contact from this node", CONTACTS),
    def!(ResetPath, ["reset_path", "rp"], Arity::Fixed(1), "<ct>", "resets path to a contact to flood", CONTACTS),
    def!(ChangePath, ["change_path", "cp"], Arity::Fixed(2), "<ct> <pth>", "change the path to a contact", CONTACTS),
    def!(Login, ["login", "l", "[["], Arity::Fixed(2), "<name> <pwd>", "log into a node (rep) with given pwd", REPEATERS),
    def!(WaitLogin, ["wait_login", "wl", "]]"], Arity::Fixed(0), "", "wait for login", REPEATERS),
    def!(Logout, ["logout"], Arity::Fixed(1), "<name>", "log out of a repeater", REPEATERS),
    def!(Cmd, ["cmd", "c", "["], Arity::Fixed(2), "<name> <cmd>", "sends a command to a repeater (no ack)", REPEATERS),
    def!(Wmt8, ["wmt8", "]"], Arity::Fixed(0), "", "wait for a msg (reply) with a timeout", REPEATERS),
    def!(ReqStatus, ["req_status", "rs"], Arity::Fixed(1), "<name>", "requests status from a node", REPEATERS),
    def!(WaitStatus, ["wait_status", "ws"], Arity::Fixed(0), "", "wait and print reply", REPEATERS),
];

/// Look a command up by any of its spellings.
pub fn find(name: &str) -> Option<&'static CommandDef> {
    COMMANDS.iter().find(|def| def.aliases.contains(&name))
}

/// One parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Which command.
    pub name: CommandName,
    /// Positional arguments.
    pub args: Vec<String>,
    /// Output for this command is JSON (global flag or leading `.`).
    pub json: bool,
}

impl Invocation {
    /// Argument `i`, which the arity check guarantees exists.
    pub fn arg(&self, i: usize) -> &str {
        self.args.get(i).map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Remaining tokens of a command chain.
#[derive(Debug, Default)]
pub struct Chain {
    tokens: VecDeque<String>,
    json: bool,
}

impl Chain {
    /// Chain over `tokens`. `json` forces JSON output for every command.
    pub fn new<I, S>(tokens: I, json: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Chain {
            tokens: tokens.into_iter().map(Into::into).collect(),
            json,
        }
    }

    /// Whether output of the whole chain is collected as one JSON array.
    pub fn is_json(&self) -> bool {
        self.json
    }

    /// Whether every token was consumed.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Take the next command off the front. After an error the chain is
    /// emptied.
    pub fn next_command(&mut self) -> Option<Result<Invocation, CliError>> {
        let token = self.tokens.pop_front()?;
        let result = self.parse_one(token);
        if result.is_err() {
            self.tokens.clear();
        }
        Some(result)
    }

    fn parse_one(&mut self, token: String) -> Result<Invocation, CliError> {
        let (json, name) = match token.strip_prefix('.') {
            Some(rest) => (true, rest),
            None => (self.json, token.as_str()),
        };
        // `@ver` is shorthand for `cli ver`.
        if let Some(line) = name.strip_prefix('@').filter(|l| !l.is_empty()) {
            return Ok(Invocation {
                name: CommandName::Cli,
                args: vec![line.to_string()],
                json,
            });
        }
        let def = find(name).ok_or_else(|| CliError::Usage(format!("unknown command '{}'", name)))?;

        let count = match def.arity {
            Arity::Fixed(n) => n,
            Arity::Clock => usize::from(self.tokens.front().map_or(false, |t| t == "sync")),
            Arity::Set => match self.tokens.front() {
                Some(t) if t == "help" => 1,
                _ => 2,
            },
            Arity::Get => 1,
        };
        if self.tokens.len() < count {
            return Err(CliError::Usage(format!("usage: {}", def.synopsis())));
        }
        let args: Vec<String> = self.tokens.drain(..count).collect();
        Ok(Invocation {
            name: def.name,
            args,
            json,
        })
    }
}

/// Full help text.
pub fn help_text() -> String {
    let mut text = String::new();
    let mut section = "";
    for def in COMMANDS {
        if def.section != section {
            section = def.section;
            text.push_str(&format!("  {}\n", section));
        }
        let shortcuts = def.aliases[1..].join(" ");
        text.push_str(&format!(
            "    {:<22} : {:<40} {}\n",
            def.synopsis(),
            def.about,
            shortcuts
        ));
    }
    text
}

/// Help for `set help`.
pub const SET_HELP: &str = "Available parameters :
    pin <pin>               : ble pin
    radio <freq,bw,sf,cr>   : radio params
    tuning <rx_dly,af>      : tuning params
    tx <dbm>                : tx power
    name <name>             : node name
    lat <lat>               : latitude
    lon <lon>               : longitude
    coords <lat,lon>        : coordinates
    print_snr <on/off>      : toggle snr display in messages
    json_msgs <on/off>      : print received messages as json
    color <on/off>          : toggle colors";

/// Help for `get help`.
pub const GET_HELP: &str = "Gets parameters from node
    name      : node name
    bat       : battery level in mV
    coords    : adv coordinates
    radio     : radio parameters
    tx        : tx power
    print_snr : snr display in messages
    json_msgs : json display of messages
    color     : colors in messages";

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(tokens: &[&str]) -> Vec<Result<Invocation, CliError>> {
        let mut chain = Chain::new(tokens.iter().copied(), false);
        let mut out = Vec::new();
        while let Some(cmd) = chain.next_command() {
            out.push(cmd);
        }
        out
    }

    #[test]
    fn test_chain_consumes_declared_arity() {
        let parsed = parse_all(&["msg", "flo2", "hello there", "wa", "sleep", "2", "clock"]);
        let names: Vec<CommandName> = parsed.iter().map(|r| r.as_ref().unwrap().name).collect();
        assert_eq!(
            names,
            vec![CommandName::Msg, CommandName::WaitAck, CommandName::Sleep, CommandName::Clock]
        );
        assert_eq!(parsed[0].as_ref().unwrap().args, vec!["flo2", "hello there"]);
    }

    #[test]
    fn test_optional_and_variable_arity() {
        let parsed = parse_all(&["clock", "sync", "set", "help", "get", "bat", "set", "tx", "20"]);
        let cmds: Vec<Invocation> = parsed.into_iter().map(Result::unwrap).collect();
        assert_eq!(cmds[0].args, vec!["sync"]);
        assert_eq!(cmds[1].args, vec!["help"]);
        assert_eq!(cmds[2].args, vec!["bat"]);
        assert_eq!(cmds[3].args, vec!["tx", "20"]);
    }

    #[test]
    fn test_unknown_command_stops_chain() {
        let parsed = parse_all(&["ver", "bogus", "infos"]);
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].is_ok());
        assert!(matches!(&parsed[1], Err(CliError::Usage(m)) if m.contains("bogus")));
    }

    #[test]
    fn test_missing_argument_is_usage_error() {
        let parsed = parse_all(&["msg", "flo2"]);
        assert!(matches!(&parsed[0], Err(CliError::Usage(m)) if m == "usage: msg <name> <msg>"));
    }

    #[test]
    fn test_leading_dot_forces_json() {
        let parsed = parse_all(&[".ver", "infos"]);
        assert!(parsed[0].as_ref().unwrap().json);
        assert!(!parsed[1].as_ref().unwrap().json);
    }

    #[test]
    fn test_aliases_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for def in COMMANDS {
            for alias in def.aliases {
                assert!(seen.insert(*alias), "duplicate alias {}", alias);
            }
        }
    }

    #[test]
    fn test_at_prefix_is_a_cli_line() {
        let parsed = parse_all(&["@ver", "cli", "neighbors", "@"]);
        let first = parsed[0].as_ref().unwrap();
        assert_eq!((first.name, first.args.clone()), (CommandName::Cli, vec!["ver".to_string()]));
        let second = parsed[1].as_ref().unwrap();
        assert_eq!((second.name, second.args.clone()), (CommandName::Cli, vec!["neighbors".to_string()]));
        // A lone `@` is the alias and needs its argument.
        assert!(matches!(&parsed[2], Err(CliError::Usage(_))));
    }

    #[test]
    fn test_help_groups_by_section() {
        let help = help_text();
        let mut last = 0;
        for section in [GENERAL, MESSAGING, MANAGEMENT, CONTACTS, REPEATERS] {
            let at = help.find(section).unwrap_or_else(|| panic!("missing {}", section));
            assert!(at >= last, "{} out of order", section);
            last = at;
        }
        let general = &help[..help.find(MESSAGING).unwrap()];
        assert!(general.contains("reboot"));
        assert!(!general.contains("wait_ack"));
    }

    #[test]
    fn test_help_lists_every_command() {
        let help = help_text();
        for def in COMMANDS {
            assert!(help.contains(def.canonical()));
        }
    }
}
