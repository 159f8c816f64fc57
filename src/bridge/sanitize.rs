//! Escaping in both directions.
//!
//! Text headed for the game is interpolated into a quoted console command,
//! so its quote and escape characters must be neutralised. Text headed for
//! the chat platform must not be able to inject markup.

/// Characters the game console treats specially inside a quoted argument.
const GAME_DIRTY: &[char] = &['"', '^'];

/// The game console's own escape character.
const GAME_ESCAPE: char = '^';

/// Characters significant to chat message formatting.
const CHAT_DIRTY: &[char] = &['.', '[', ']', '"', '\'', '\\'];

/// Maximum handle length presented on the chat platform.
pub const MAX_HANDLE_LEN: usize = 32;

/// Fallback handle when a game name sanitizes to nothing.
const EMPTY_HANDLE: &str = "player";

/// Escape text for interpolation into a quoted console command argument.
///
/// Line breaks are removed since one command must stay on one line.
pub fn escape_for_game(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            '\r' | '\n' => {}
            c if GAME_DIRTY.contains(&c) => {
                out.push(GAME_ESCAPE);
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Build one `s_talkbot_fakesay` console command.
pub fn fakesay_command(handle: &str, line: &str) -> String {
    format!(
        "s_talkbot_fakesay 0 \"_\" \"[{}]\" \"{}\"",
        escape_for_game(handle),
        escape_for_game(line)
    )
}

/// Chat-facing display name: the handle plus the originating server marker.
pub fn display_name(handle: &str, marker: &str) -> String {
    if marker.is_empty() {
        handle.to_string()
    } else {
        format!("{} @ {}", handle, marker)
    }
}

/// Escape Discord emphasis markup in a name rendered inside `**...**`.
pub fn escape_markdown(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('`', "\\`")
        .replace('*', "\\*")
        .replace('_', "\\_")
        .replace('~', "\\~")
}

/// Escapes game text before it is posted to the chat platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatEscaper {
    /// Strip every punctuation character instead of escaping a few.
    strict: bool,
}

impl ChatEscaper {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn escape(&self, text: &str) -> String {
        if self.strict {
            text.chars()
                .filter(|c| !c.is_control() && !is_ascii_markup(*c))
                .collect()
        } else {
            let mut out = String::with_capacity(text.len() + 8);
            for ch in text.chars() {
                if CHAT_DIRTY.contains(&ch) {
                    out.push('\\');
                }
                out.push(ch);
            }
            out
        }
    }
}

/// U+0021-002F, U+005B-0060, U+007B-007E.
fn is_ascii_markup(c: char) -> bool {
    matches!(c, '\u{21}'..='\u{2f}' | '\u{5b}'..='\u{60}' | '\u{7b}'..='\u{7e}')
}

/// Derive a chat handle from a game-supplied name.
pub fn sanitize_handle(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '@' | '#' | ':' | '`'))
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .take(MAX_HANDLE_LEN)
        .collect();

    if cleaned.is_empty() {
        EMPTY_HANDLE.to_string()
    } else {
        cleaned
    }
}

/// Handle candidate for a given collision attempt: `Alice`, `Alice_`, `Alice__`...
pub fn handle_candidate(base: &str, attempt: u32) -> String {
    let mut handle = sanitize_handle(base);
    for _ in 0..attempt {
        handle.push('_');
    }
    handle
}
