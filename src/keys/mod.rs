//! Synthetic keyboard input.
//!
//! Keystrokes reach gVim through the desktop, not through the channel: the
//! window owning the editor's pid is brought to the foreground and the keys
//! are typed into whatever has focus. Delivery is therefore best-effort and
//! racy with anything else that grabs focus.
//!
//! Key strings use Vim's angle-bracket notation for the few non-printing keys
//! the harness needs (`<esc>`, `<cr>`, ...); everything else is typed as-is.

#[cfg(not(windows))]
pub mod xdotool;
#[cfg(windows)]
pub mod win32;

use anyhow::Result;

/// One key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Escape,
    Tab,
    Backspace,
}

/// Platform facility that focuses a process window and types into it.
pub trait KeyInjector {
    /// Bring the top-level window of `pid` to the foreground.
    fn activate(&self, pid: u32) -> Result<()>;

    /// Type `keys` into the focused window.
    fn send(&self, keys: &[Key]) -> Result<()>;
}

/// Injector backed by the platform automation API.
#[cfg(windows)]
pub fn platform_injector() -> Box<dyn KeyInjector> {
    Box::new(win32::Win32Injector)
}

/// Injector backed by the platform automation API.
#[cfg(not(windows))]
pub fn platform_injector() -> Box<dyn KeyInjector> {
    Box::new(xdotool::XdotoolInjector::default())
}

fn named_key(name: &str) -> Option<Key> {
    match name.to_ascii_lowercase().as_str() {
        "esc" => Some(Key::Escape),
        "cr" | "enter" | "return" => Some(Key::Enter),
        "tab" => Some(Key::Tab),
        "bs" => Some(Key::Backspace),
        "lt" => Some(Key::Char('<')),
        _ => None,
    }
}

/// Parse a key string in Vim notation.
///
/// `<esc>`, `<cr>`/`<enter>`/`<return>`, `<tab>`, `<bs>` and `<lt>` are
/// recognised case-insensitively; `\r` and `\n` are Enter. Any other `<...>`
/// is typed literally.
pub fn parse_key_sequence(text: &str) -> Vec<Key> {
    let mut keys = Vec::with_capacity(text.len());
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if c == '<' {
            if let Some(end) = rest.find('>') {
                if let Some(key) = named_key(&rest[1..end]) {
                    keys.push(key);
                    rest = &rest[end + 1..];
                    continue;
                }
            }
        }

        keys.push(match c {
            '\r' | '\n' => Key::Enter,
            '\t' => Key::Tab,
            '\u{1b}' => Key::Escape,
            other => Key::Char(other),
        });
        rest = &rest[c.len_utf8()..];
    }

    keys
}

/// Render keys back to notation, for logs.
pub fn describe(keys: &[Key]) -> String {
    let mut out = String::new();
    for key in keys {
        match key {
            Key::Char('<') => out.push_str("<lt>"),
            Key::Char(c) => out.push(*c),
            Key::Enter => out.push_str("<cr>"),
            Key::Escape => out.push_str("<esc>"),
            Key::Tab => out.push_str("<tab>"),
            Key::Backspace => out.push_str("<bs>"),
        }
    }
    out
}


#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<Key> {
        s.chars().map(Key::Char).collect()
    }

    #[test]
    fn plain_text_is_literal() {
        assert_eq!(parse_key_sequence("echo 1"), chars("echo 1"));
    }

    #[test]
    fn carriage_return_and_notation_are_enter() {
        let mut expected = chars("echo x");
        expected.push(Key::Enter);
        assert_eq!(parse_key_sequence("echo x\r"), expected);
        assert_eq!(parse_key_sequence("echo x<cr>"), expected);
        assert_eq!(parse_key_sequence("echo x<CR>"), expected);
        assert_eq!(parse_key_sequence("echo x<Enter>"), expected);
    }

    #[test]
    fn escape_then_ex_command() {
        let keys = parse_key_sequence("<esc>:w<cr>");
        assert_eq!(
            keys,
            vec![Key::Escape, Key::Char(':'), Key::Char('w'), Key::Enter]
        );
    }

    #[test]
    fn unknown_notation_is_typed_literally() {
        assert_eq!(parse_key_sequence("<nope>"), chars("<nope>"));
        assert_eq!(parse_key_sequence("a < b"), chars("a < b"));
        assert_eq!(parse_key_sequence("<lt>cr>"), chars("<cr>"));
    }

    #[test]
    fn non_ascii_is_preserved() {
        assert_eq!(parse_key_sequence("échо"), chars("échо"));
    }

    #[test]
    fn describe_round_trips_notation() {
        let text = "<esc>:w /tmp/a<lt>b<cr>A<tab><bs>";
        assert_eq!(describe(&parse_key_sequence(text)), text);
    }
}
