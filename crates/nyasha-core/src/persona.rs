//! Persona framing: prompt construction and reply clean-up.

use std::{path::Path, sync::OnceLock};

use regex::Regex;

use crate::Result;

/// Name the model is asked to answer as.
pub const PERSONA_NAME: &str = "Nyasha";

const DEFAULT_PERSONA_PROMPT: &str = "You are Nyasha, a warm, witty 24-year-old from Harare \
who chats with friends over text. Keep replies short and casual, like a real text message: \
one or two sentences, lowercase is fine, the occasional emoji or slang is welcome. \
Never say you are an AI, a bot, or a language model. If someone asks something you can't \
answer, deflect playfully the way a friend would. Reply only with your message, without \
quoting the user.";

/// Immutable persona text, loaded once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Persona {
    prompt: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self::new(DEFAULT_PERSONA_PROMPT)
    }
}

impl Persona {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }

    /// Load persona text from a file, falling back to the built-in text when the file is blank.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self::new(trimmed))
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Build the model prompt for one user message.
    pub fn build(&self, user_text: &str) -> String {
        build_prompt(&self.prompt, user_text)
    }
}

/// `persona + "\n\nUser: " + text + "\nNyasha:"`.
pub fn build_prompt(persona: &str, user_text: &str) -> String {
    format!("{persona}\n\nUser: {user_text}\n{PERSONA_NAME}:")
}

/// Remove a leading `Nyasha:` echo (any case) and surrounding whitespace.
pub fn strip_persona_echo(reply: &str) -> String {
    static ECHO: OnceLock<Regex> = OnceLock::new();
    let re = ECHO.get_or_init(|| {
        Regex::new(&format!(r"(?i)^{}:\s*", regex::escape(PERSONA_NAME)))
            .expect("persona echo pattern")
    });
    re.replace(reply.trim_start(), "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_exact_prompt() {
        let p = "You are a test persona.";
        assert_eq!(
            build_prompt(p, "hello"),
            "You are a test persona.\n\nUser: hello\nNyasha:"
        );
        assert_eq!(build_prompt(p, "hello"), build_prompt(p, "hello"));
    }

    #[test]
    fn persona_build_uses_its_prompt() {
        let persona = Persona::new("P");
        assert_eq!(persona.build("yo"), "P\n\nUser: yo\nNyasha:");
    }

    #[test]
    fn strips_leading_echo_case_insensitively() {
        assert_eq!(strip_persona_echo("Nyasha: lol k"), "lol k");
        assert_eq!(strip_persona_echo("NYASHA:hey"), "hey");
        assert_eq!(strip_persona_echo("  nyasha:   sure  \n"), "sure");
    }

    #[test]
    fn keeps_non_leading_mentions() {
        assert_eq!(
            strip_persona_echo("ask Nyasha: she knows"),
            "ask Nyasha: she knows"
        );
        assert_eq!(strip_persona_echo("Nyasha: Nyasha: hi"), "Nyasha: hi");
    }

    #[test]
    fn echo_only_reply_becomes_empty() {
        assert_eq!(strip_persona_echo("Nyasha:   "), "");
    }

    #[test]
    fn blank_persona_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persona.txt");

        std::fs::write(&path, "   \n").unwrap();
        assert_eq!(Persona::from_file(&path).unwrap(), Persona::default());

        std::fs::write(&path, "  custom persona\n").unwrap();
        assert_eq!(Persona::from_file(&path).unwrap().prompt(), "custom persona");
    }
}
