//! Message formatting for display.
//!
//! Handles placeholder substitution in the chat-facing text templates.
//! Supports placeholders: %message, %action, %location, %op, %privilege,
//! %newname, %target

use crate::config::types::FormatsConfig;

/// Default format for relayed chat lines.
pub const DEFAULT_CHAT_FORMAT: &str = "%message";

/// Default format for a client joining.
pub const DEFAULT_CONNECT_FORMAT: &str = "joined%location";

/// Default format for a client leaving.
pub const DEFAULT_DISCONNECT_FORMAT: &str = "left%location";

/// Default format for privilege changes.
pub const DEFAULT_MASTER_FORMAT: &str = "has %op %privilege";

/// Default format for renames.
pub const DEFAULT_RENAME_FORMAT: &str = "is now known as %newname";

/// Default format for kicks.
pub const DEFAULT_KICK_FORMAT: &str = "has kicked **%target**!";

/// Discord rejects messages longer than this.
pub const MAX_CHAT_MESSAGE_LEN: usize = 2000;

/// Placeholder names, without the leading `%`.
const PLACEHOLDERS: &[&str] = &[
    "message",
    "action",
    "location",
    "op",
    "privilege",
    "newname",
    "target",
];

/// Message formatter that substitutes placeholders in format strings.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    /// Format string for this formatter.
    format: String,
}

impl MessageFormatter {
    /// Create a new formatter with the given format string.
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }

    /// Format a message with the given context.
    ///
    /// Substitution is single-pass: placeholder-like text inside a value is
    /// left as is.
    pub fn format(&self, ctx: &FormatContext) -> String {
        let mut out = String::with_capacity(self.format.len() + ctx.message.len());
        let mut rest = self.format.as_str();

        while let Some(pos) = rest.find('%') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            match PLACEHOLDERS.iter().find(|p| after.starts_with(**p)) {
                Some(name) => {
                    ctx.write_value(name, &mut out);
                    rest = &after[name.len()..];
                }
                None => {
                    out.push('%');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Context for message formatting.
///
/// Values are expected to be escaped for the chat platform already.
#[derive(Debug, Clone, Default)]
pub struct FormatContext {
    pub message: String,
    pub action: String,
    /// GeoIP location, rendered as ` from <location>` when present.
    pub location: Option<String>,
    pub op: String,
    pub privilege: String,
    pub new_name: String,
    pub target: String,
}

impl FormatContext {
    fn write_value(&self, placeholder: &str, out: &mut String) {
        match placeholder {
            "message" => out.push_str(&self.message),
            "action" => out.push_str(&self.action),
            "location" => {
                if let Some(loc) = self.location.as_deref().filter(|l| !l.is_empty()) {
                    out.push_str(" from ");
                    out.push_str(loc);
                }
            }
            "op" => out.push_str(&self.op),
            "privilege" => out.push_str(&self.privilege),
            "newname" => out.push_str(&self.new_name),
            "target" => out.push_str(&self.target),
            _ => {}
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = op.into();
        self
    }

    pub fn with_privilege(mut self, privilege: impl Into<String>) -> Self {
        self.privilege = privilege.into();
        self
    }

    pub fn with_new_name(mut self, new_name: impl Into<String>) -> Self {
        self.new_name = new_name.into();
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }
}

/// One formatter per event type.
#[derive(Debug, Clone)]
pub struct EventFormats {
    pub chat: MessageFormatter,
    pub connect: MessageFormatter,
    pub disconnect: MessageFormatter,
    pub master: MessageFormatter,
    pub rename: MessageFormatter,
    pub kick: MessageFormatter,
}

impl Default for EventFormats {
    fn default() -> Self {
        Self {
            chat: MessageFormatter::new(DEFAULT_CHAT_FORMAT),
            connect: MessageFormatter::new(DEFAULT_CONNECT_FORMAT),
            disconnect: MessageFormatter::new(DEFAULT_DISCONNECT_FORMAT),
            master: MessageFormatter::new(DEFAULT_MASTER_FORMAT),
            rename: MessageFormatter::new(DEFAULT_RENAME_FORMAT),
            kick: MessageFormatter::new(DEFAULT_KICK_FORMAT),
        }
    }
}

impl EventFormats {
    /// Build formatters, falling back to defaults for anything not configured.
    pub fn from_config(config: Option<&FormatsConfig>) -> Self {
        let defaults = Self::default();
        let Some(config) = config else {
            return defaults;
        };

        let pick = |custom: &Option<String>, default: MessageFormatter| {
            custom.as_ref().map(MessageFormatter::new).unwrap_or(default)
        };

        Self {
            chat: pick(&config.chat, defaults.chat),
            connect: pick(&config.connect, defaults.connect),
            disconnect: pick(&config.disconnect, defaults.disconnect),
            master: pick(&config.master, defaults.master),
            rename: pick(&config.rename, defaults.rename),
            kick: pick(&config.kick, defaults.kick),
        }
    }
}

/// Find the last UTF-8 char boundary at or before `byte_index` in `s`.
///
/// Returns a byte offset that is safe to use for slicing `s`.
fn floor_char_boundary(s: &str, byte_index: usize) -> usize {
    if byte_index >= s.len() {
        return s.len();
    }
    let mut i = byte_index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Split a message into chunks that fit within the max length (in bytes).
///
/// Tries to split on word boundaries when possible. Never splits in the
/// middle of a multi-byte UTF-8 character.
pub fn split_message(message: &str, max_len: usize) -> Vec<String> {
    if message.len() <= max_len {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        remaining = remaining.trim_start();
        if remaining.is_empty() {
            break;
        }

        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let split_at = floor_char_boundary(remaining, max_len);

        // max_len smaller than the first character: force one char out
        if split_at == 0 {
            let first_char_end = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
            chunks.push(remaining[..first_char_end].to_string());
            remaining = &remaining[first_char_end..];
            continue;
        }

        let chunk = &remaining[..split_at];

        if let Some(space_idx) = chunk.rfind(' ') {
            chunks.push(remaining[..space_idx].to_string());
            remaining = &remaining[space_idx + 1..];
        } else {
            chunks.push(chunk.to_string());
            remaining = &remaining[split_at..];
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_without_location() {
        let formats = EventFormats::default();
        let ctx = FormatContext::default().with_action("joined");
        assert_eq!(formats.connect.format(&ctx), "joined");
    }

    #[test]
    fn test_connect_with_location() {
        let formats = EventFormats::default();
        let ctx = FormatContext::default().with_location(Some("FR".to_string()));
        assert_eq!(formats.connect.format(&ctx), "joined from FR");
        assert_eq!(formats.disconnect.format(&ctx), "left from FR");
    }

    #[test]
    fn test_master_rename_kick() {
        let formats = EventFormats::default();
        let ctx = FormatContext::default()
            .with_op("claimed")
            .with_privilege("master")
            .with_new_name("Carol")
            .with_target("spammer");

        assert_eq!(formats.master.format(&ctx), "has claimed master");
        assert_eq!(formats.rename.format(&ctx), "is now known as Carol");
        assert_eq!(formats.kick.format(&ctx), "has kicked **spammer**!");
    }

    #[test]
    fn test_custom_formats_override_defaults() {
        let config = FormatsConfig {
            chat: Some("> %message".to_string()),
            connect: None,
            disconnect: None,
            master: None,
            rename: None,
            kick: None,
        };
        let formats = EventFormats::from_config(Some(&config));

        assert_eq!(formats.chat.format(&FormatContext::message("hi")), "> hi");
        assert_eq!(
            formats.connect.format(&FormatContext::default().with_action("joined")),
            "joined"
        );
    }

    #[test]
    fn test_placeholders_inside_values_are_literal() {
        let formats = EventFormats::default();
        let ctx = FormatContext::message("100% sure, %op at %location")
            .with_op("claimed")
            .with_location(Some("FR".to_string()));
        assert_eq!(formats.chat.format(&ctx), "100% sure, %op at %location");
    }

    #[test]
    fn test_unknown_placeholder_kept() {
        let formatter = MessageFormatter::new("%user says %message");
        assert_eq!(
            formatter.format(&FormatContext::message("hi")),
            "%user says hi"
        );
    }

    #[test]
    fn test_split_message_short() {
        let chunks = split_message("Hello world", 50);
        assert_eq!(chunks, vec!["Hello world"]);
    }

    #[test]
    fn test_split_message_on_space() {
        let chunks = split_message("Hello beautiful world", 15);
        assert_eq!(chunks, vec!["Hello", "beautiful world"]);
    }

    #[test]
    fn test_split_message_no_space() {
        let chunks = split_message("HelloBeautifulWorld", 10);
        assert_eq!(chunks, vec!["HelloBeaut", "ifulWorld"]);
    }

    #[test]
    fn test_split_message_multibyte_utf8() {
        let chunks = split_message("café rest", 4);
        assert_eq!(chunks, vec!["caf", "é", "rest"]);
    }
}
