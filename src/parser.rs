//! Twitch IRC line parser
//!
//! Turns raw socket reads into classified lines. Two wire profiles are
//! handled side by side because the server may send either at any time:
//!
//! ```text
//! @badge-info=subscriber/11;badges=subscriber/6;bits=100;color=#1E90FF;display-name=Ronni :ronni!ronni@ronni.tmi.twitch.tv PRIVMSG #ronni :cheer100
//! :ronni!ronni@ronni.tmi.twitch.tv PRIVMSG #ronni :Kappa Keepo Kappa
//! ```
//!
//! The tagged form wins when a line matches both. Parsing never fails: lines
//! that are not chat come back as `ParsedLine::Server` and are forwarded to
//! the host untouched.

use crate::message::ChatMessage;
use crate::types::{Channel, Rgb};

/// Chat-post command
const PRIVMSG: &str = "PRIVMSG";

/// Separator between prefix, command and trailing parameter
const TRAILING_JOINER: &str = " :";

/// Longest fragment kept while waiting for a line break (8191 tag bytes
/// plus a 512 byte message)
pub const MAX_LINE_LENGTH: usize = 8191 + 512;

/// Classified protocol line
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// Keep-alive ping; holds the reply line to send back
    Ping(String),
    Chat(ChatMessage),
    /// Anything else, verbatim
    Server(String),
}

/// Decode bytes one char per byte
///
/// The protocol layer we read is ASCII; bytes above 0x7F map to the
/// matching Latin-1 code point.
pub fn decode_8bit(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Accumulates reads and yields complete lines
///
/// A read may end in the middle of a line; the fragment is kept until the
/// rest arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a read and return every line it completed
    ///
    /// Lines are split on `\n`, `\r` or `\r\n`. Empty lines are dropped.
    /// A fragment that grows past `MAX_LINE_LENGTH` without a line break is
    /// handed out as a line of its own.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.push_str(&decode_8bit(bytes));

        let mut lines = Vec::new();
        if let Some(last_break) = self.pending.rfind(['\r', '\n']) {
            let rest = self.pending.split_off(last_break + 1);
            let complete = std::mem::replace(&mut self.pending, rest);
            lines.extend(
                complete
                    .split(['\r', '\n'])
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
        }

        if self.pending.len() > MAX_LINE_LENGTH {
            lines.push(std::mem::take(&mut self.pending));
        }
        lines
    }

    /// Bytes received after the last line break
    pub fn pending(&self) -> &str {
        &self.pending
    }
}

/// Classify one line
///
/// Returns None for blank lines.
pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    if let Some(reply) = ping_reply(line) {
        return Some(ParsedLine::Ping(reply));
    }

    let chat = if is_tagged_privmsg(line) {
        parse_tagged(line)
    } else {
        parse_plain(line)
    };

    Some(match chat {
        Some(message) => ParsedLine::Chat(message),
        None => ParsedLine::Server(line.to_string()),
    })
}

/// `PING :tmi.twitch.tv` → `PONG :tmi.twitch.tv`
pub fn ping_reply(line: &str) -> Option<String> {
    let payload = line.strip_prefix("PING ")?;
    if payload.is_empty() {
        return None;
    }
    Some(format!("PONG {payload}"))
}

fn is_tagged_privmsg(line: &str) -> bool {
    if !line.starts_with('@') {
        return false;
    }
    // Command is the second token after the tag block: "@tags :prefix PRIVMSG #chan :body"
    line.split(TRAILING_JOINER)
        .nth(1)
        .and_then(|rest| rest.split_whitespace().nth(1))
        == Some(PRIVMSG)
}

/// Tag-decorated chat line
fn parse_tagged(line: &str) -> Option<ChatMessage> {
    let mut parts = line.splitn(3, TRAILING_JOINER);
    let tags = parts.next()?;
    let head = parts.next()?;
    let body = parts.next().unwrap_or_default();

    let mut message = ChatMessage::default();
    apply_tags(&mut message, tags.strip_prefix('@').unwrap_or(tags));

    let mut head_tokens = head.split_whitespace();
    message.sender = nick_of(head_tokens.next()?)?.to_string();
    message.channel = head_tokens.nth(1).and_then(Channel::parse_optional);
    message.body = body.to_string();

    if message.body.is_empty() {
        return None;
    }
    Some(message)
}

/// Untagged chat line
fn parse_plain(line: &str) -> Option<ChatMessage> {
    let line = line.strip_prefix(':').unwrap_or(line);
    let (meta, body) = line.split_once(':')?;

    let meta: Vec<&str> = meta.split_whitespace().collect();
    if meta.len() < 2 || meta[1] != PRIVMSG {
        return None;
    }
    if body.is_empty() {
        return None;
    }

    let mut message = ChatMessage::plain(nick_of(meta[0])?, body);
    message.channel = meta.get(2).and_then(|c| Channel::parse_optional(c));
    Some(message)
}

/// `ronni!ronni@ronni.tmi.twitch.tv` → `ronni`
fn nick_of(prefix: &str) -> Option<&str> {
    let prefix = prefix.strip_prefix(':').unwrap_or(prefix);
    let (nick, _) = prefix.split_once('!')?;
    if nick.is_empty() {
        None
    } else {
        Some(nick)
    }
}

type TagHandler = fn(&mut ChatMessage, &str);

/// Tag vocabulary; keys not listed here are ignored
const TAG_HANDLERS: &[(&str, TagHandler)] = &[
    ("badge-info", apply_badges),
    ("badges", apply_badges),
    ("bits", apply_bits),
    ("color", apply_color),
    ("display-name", apply_display_name),
];

fn apply_tags(message: &mut ChatMessage, tags: &str) {
    for tag in tags.split(';') {
        let (key, value) = tag.split_once('=').unwrap_or((tag, ""));
        if let Some((_, handler)) = TAG_HANDLERS.iter().find(|(name, _)| *name == key) {
            handler(message, value);
        }
    }
}

/// `subscriber/6,premium/1,bits/1000`
fn apply_badges(message: &mut ChatMessage, value: &str) {
    for badge in value.split(',') {
        let Some((name, version)) = badge.split_once('/') else {
            continue;
        };
        if name != "subscriber" && name != "premium" {
            continue;
        }
        if let Some(tier) = parse_number(version) {
            message.is_subscriber = tier > 0.0;
        }
    }
}

fn apply_bits(message: &mut ChatMessage, value: &str) {
    if let Some(amount) = parse_number(value) {
        message.has_bits = true;
        message.bits_amount = amount;
    }
}

/// Plain decimal: digits with at most one `.`
///
/// `f32::from_str` alone would also take `NaN`, `inf` and exponents.
fn parse_number(value: &str) -> Option<f32> {
    let digits = value.bytes().filter(u8::is_ascii_digit).count();
    let dots = value.bytes().filter(|&b| b == b'.').count();
    if digits == 0 || digits + dots != value.len() || dots > 1 {
        return None;
    }
    value.parse().ok()
}

fn apply_color(message: &mut ChatMessage, value: &str) {
    if let Some(color) = Rgb::from_hex(value) {
        message.color = Some(color);
    }
}

fn apply_display_name(message: &mut ChatMessage, value: &str) {
    if !value.is_empty() {
        message.display_name = Some(value.to_string());
    }
}
