//! IRC line parsing
//!
//! `[@tags ][:prefix ]COMMAND[ param]*[ :trailing]`

/// One parsed IRC line. Tags are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Parse a single line, with or without its trailing CRLF.
    ///
    /// Returns `None` for blank lines and lines without a command.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        if let Some(tagged) = rest.strip_prefix('@') {
            rest = tagged.split_once(' ').map_or("", |(_, tail)| tail);
        }
        rest = rest.trim_start_matches(' ');

        let mut prefix = None;
        if let Some(prefixed) = rest.strip_prefix(':') {
            let (head, tail) = prefixed.split_once(' ').unwrap_or((prefixed, ""));
            prefix = Some(head.to_string());
            rest = tail.trim_start_matches(' ');
        }

        let (command, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            let (param, tail) = rest.split_once(' ').unwrap_or((rest, ""));
            params.push(param.to_string());
            rest = tail;
        }

        Some(Self {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Nick part of a `nick!user@host` prefix
    #[must_use]
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split(['!', '@']).next().unwrap_or(prefix);
        (!nick.is_empty()).then_some(nick)
    }

    /// User part of a `nick!user@host` prefix
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        let (_, after_bang) = self.prefix.as_deref()?.split_once('!')?;
        let user = after_bang.split('@').next().unwrap_or(after_bang);
        (!user.is_empty()).then_some(user)
    }

    /// Name to attribute a message to: the user part, else the nick
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.user().or_else(|| self.nick())
    }

    #[must_use]
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_privmsg() {
        let msg = IrcMessage::parse(":bob!bob@bob.tmi.twitch.tv PRIVMSG #mogra :hello there\r\n")
            .unwrap();

        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#mogra", "hello there"]);
        assert_eq!(msg.nick(), Some("bob"));
        assert_eq!(msg.user(), Some("bob"));
    }

    #[test]
    fn test_parse_with_tags() {
        let msg = IrcMessage::parse(
            "@badge-info=;color=#1E90FF;display-name=Bob :bob!bob@bob.tmi.twitch.tv PRIVMSG #mogra :hi",
        )
        .unwrap();

        assert_eq!(msg.prefix.as_deref(), Some("bob!bob@bob.tmi.twitch.tv"));
        assert_eq!(msg.param(1), Some("hi"));
    }

    #[test]
    fn test_parse_ping_without_prefix() {
        let msg = IrcMessage::parse("PING :tmi.twitch.tv").unwrap();

        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.param(0), Some("tmi.twitch.tv"));
    }

    #[test]
    fn test_parse_numeric_reply() {
        let msg = IrcMessage::parse(":tmi.twitch.tv 001 wallbot :Welcome, GLHF!").unwrap();

        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, vec!["wallbot", "Welcome, GLHF!"]);
        assert_eq!(msg.nick(), Some("tmi.twitch.tv"));
        assert_eq!(msg.user(), None);
    }

    #[test]
    fn test_trailing_keeps_colons_and_spaces() {
        let msg = IrcMessage::parse(":a!b@c PRIVMSG #x :time is 12:30  ok").unwrap();
        assert_eq!(msg.param(1), Some("time is 12:30  ok"));
    }

    #[test]
    fn test_sender_falls_back_to_nick() {
        let msg = IrcMessage::parse(":bob PRIVMSG #mogra :hi").unwrap();
        assert_eq!(msg.user(), None);
        assert_eq!(msg.sender(), Some("bob"));
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        assert_eq!(IrcMessage::parse(""), None);
        assert_eq!(IrcMessage::parse("\r\n"), None);
        assert_eq!(IrcMessage::parse(":prefix.only"), None);
    }

    #[test]
    fn test_command_is_uppercased() {
        let msg = IrcMessage::parse("ping :x").unwrap();
        assert_eq!(msg.command, "PING");
    }
}
