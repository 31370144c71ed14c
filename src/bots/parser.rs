/// Splits chat text like `/stock=FB` into a command name and an argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotCommandParser {
    prefix: String,
}

impl Default for BotCommandParser {
    fn default() -> Self {
        Self::new("/")
    }
}

impl BotCommandParser {
    /// An empty prefix falls back to `/`.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: if prefix.is_empty() { "/".to_owned() } else { prefix },
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// True when the text starts with exactly one prefix symbol. A doubled
    /// prefix (`//like this`) is plain chat.
    pub fn is_valid_bot_command(&self, text: &str) -> bool {
        match text.strip_prefix(self.prefix.as_str()) {
            Some(rest) => !rest.starts_with(self.prefix.as_str()),
            None => false,
        }
    }

    /// Callers are expected to check [`Self::is_valid_bot_command`] first. On
    /// other input the whole text is treated as the command body.
    pub fn extract_command_and_args<'a>(&self, text: &'a str) -> (&'a str, &'a str) {
        let body = text.strip_prefix(self.prefix.as_str()).unwrap_or(text);
        body.split_once('=').unwrap_or((body, ""))
    }

    pub fn parse<'a>(&self, text: &'a str) -> Option<(&'a str, &'a str)> {
        self.is_valid_bot_command(text)
            .then(|| self.extract_command_and_args(text))
    }
}
