//! User interaction seam.
//!
//! The engine never touches the terminal directly. Confirmations, the
//! extract selection prompt, password entry and listing output all go
//! through an [`Interaction`], so embedders and tests can script them.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

use tracing::debug;
use zeroize::Zeroizing;

use targpg_common::{Error, Passphrase, Result};

/// Source of prompts, answers and output for an archive session.
pub trait Interaction {
    /// Show `prompt` and return one line of input, line ending removed.
    fn ask(&mut self, prompt: &str) -> Result<String>;

    /// Show `prompt` and read a password without echoing it.
    fn read_password(&mut self, prompt: &str) -> Result<Passphrase>;

    /// Write one line of output.
    fn show(&mut self, line: &str) -> Result<()>;

    /// Ask a yes/no question.
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        let answer = self.ask(prompt)?;
        Ok(is_affirmative(&answer))
    }
}

impl<T: Interaction + ?Sized> Interaction for &mut T {
    fn ask(&mut self, prompt: &str) -> Result<String> {
        (**self).ask(prompt)
    }

    fn read_password(&mut self, prompt: &str) -> Result<Passphrase> {
        (**self).read_password(prompt)
    }

    fn show(&mut self, line: &str) -> Result<()> {
        (**self).show(line)
    }

    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        (**self).confirm(prompt)
    }
}

/// Answers starting with `y` or `Y` count as yes.
pub fn is_affirmative(answer: &str) -> bool {
    answer.trim_start().starts_with(['y', 'Y'])
}

/// What a password is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordPurpose {
    /// Unlock an archive that already exists.
    Existing,
    /// Protect a new archive, or re-key an existing one.
    New,
}

/// Where the archive password comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordSource {
    /// First line of a file.
    File(PathBuf),
    /// Ask through the session's [`Interaction`].
    Prompt,
}

impl PasswordSource {
    /// Obtain a password.
    ///
    /// Files are read whole with a single trailing line ending removed.
    /// Prompting for a new password asks twice.
    ///
    /// # Errors
    /// - `Error::PasswordMismatch` if the confirmation differs
    /// - `Error::InvalidInput` if the password is empty
    pub fn resolve<I: Interaction + ?Sized>(
        &self,
        interaction: &mut I,
        purpose: PasswordPurpose,
    ) -> Result<Passphrase> {
        let password = match self {
            PasswordSource::File(path) => {
                let contents = Zeroizing::new(fs::read_to_string(path).map_err(|e| {
                    Error::InvalidInput(format!(
                        "cannot read password file {}: {}",
                        path.display(),
                        e
                    ))
                })?);
                debug!(path = %path.display(), "Read password from file");
                Passphrase::new(strip_line_ending(&contents))
            }
            PasswordSource::Prompt => match purpose {
                PasswordPurpose::Existing => interaction.read_password("Password: ")?,
                PasswordPurpose::New => {
                    let first = interaction.read_password("New Password: ")?;
                    let second = interaction.read_password("Confirm Password: ")?;
                    if !first.matches(&second) {
                        return Err(Error::PasswordMismatch);
                    }
                    first
                }
            },
        };

        if password.is_empty() {
            return Err(Error::InvalidInput("Password must not be empty".to_string()));
        }
        Ok(password)
    }
}

fn strip_line_ending(s: &str) -> &str {
    s.strip_suffix("\r\n")
        .or_else(|| s.strip_suffix('\n'))
        .unwrap_or(s)
}

/// Interaction driven by canned input.
///
/// Answers and passwords are consumed in order; running out is an error.
/// Everything shown is captured and available through [`output`].
///
/// [`output`]: ScriptedInteraction::output
#[derive(Debug, Default)]
pub struct ScriptedInteraction {
    answers: VecDeque<String>,
    passwords: VecDeque<Passphrase>,
    prompts: Vec<String>,
    output: Vec<String>,
}

impl ScriptedInteraction {
    /// Create with no canned input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an answer for the next `ask` or `confirm`.
    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answers.push_back(answer.into());
        self
    }

    /// Queue a password for the next `read_password`.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.passwords.push_back(Passphrase::new(password));
        self
    }

    /// Lines passed to `show`, in order.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// Prompts asked so far, password prompts included.
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }
}

impl Interaction for ScriptedInteraction {
    fn ask(&mut self, prompt: &str) -> Result<String> {
        self.prompts.push(prompt.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| Error::InvalidInput(format!("no answer for prompt {:?}", prompt)))
    }

    fn read_password(&mut self, prompt: &str) -> Result<Passphrase> {
        self.prompts.push(prompt.to_string());
        self.passwords
            .pop_front()
            .ok_or_else(|| Error::InvalidInput(format!("no password for prompt {:?}", prompt)))
    }

    fn show(&mut self, line: &str) -> Result<()> {
        self.output.push(line.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_affirmative() {
        assert!(is_affirmative("y"));
        assert!(is_affirmative("Yes"));
        assert!(is_affirmative("yeah"));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("n"));
        assert!(!is_affirmative("ok"));
    }

    #[test]
    fn test_confirm_consumes_answer() {
        let mut interaction = ScriptedInteraction::new().with_answer("y").with_answer("no");
        assert!(interaction.confirm("Create? ").unwrap());
        assert!(!interaction.confirm("Again? ").unwrap());
        assert!(interaction.confirm("Once more? ").is_err());
        assert_eq!(interaction.prompts().len(), 3);
    }

    #[test]
    fn test_password_file_strips_one_line_ending() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pass");
        let mut interaction = ScriptedInteraction::new();

        fs::write(&path, "secret\n").unwrap();
        let password = PasswordSource::File(path.clone())
            .resolve(&mut interaction, PasswordPurpose::Existing)
            .unwrap();
        assert!(password.matches(&Passphrase::new("secret")));

        fs::write(&path, "secret\r\n").unwrap();
        let password = PasswordSource::File(path.clone())
            .resolve(&mut interaction, PasswordPurpose::New)
            .unwrap();
        assert!(password.matches(&Passphrase::new("secret")));

        fs::write(&path, "secret \n\n").unwrap();
        let password = PasswordSource::File(path)
            .resolve(&mut interaction, PasswordPurpose::Existing)
            .unwrap();
        assert!(password.matches(&Passphrase::new("secret \n")));
        assert!(interaction.prompts().is_empty());
    }

    #[test]
    fn test_missing_password_file() {
        let dir = TempDir::new().unwrap();
        let result = PasswordSource::File(dir.path().join("nope"))
            .resolve(&mut ScriptedInteraction::new(), PasswordPurpose::Existing);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_prompt_existing_asks_once() {
        let mut interaction = ScriptedInteraction::new().with_password("password");
        let password = PasswordSource::Prompt
            .resolve(&mut interaction, PasswordPurpose::Existing)
            .unwrap();

        assert!(password.matches(&Passphrase::new("password")));
        assert_eq!(interaction.prompts(), ["Password: "]);
    }

    #[test]
    fn test_prompt_new_requires_confirmation() {
        let mut interaction = ScriptedInteraction::new()
            .with_password("password")
            .with_password("password");
        PasswordSource::Prompt
            .resolve(&mut interaction, PasswordPurpose::New)
            .unwrap();
        assert_eq!(interaction.prompts(), ["New Password: ", "Confirm Password: "]);

        let mut interaction = ScriptedInteraction::new()
            .with_password("password")
            .with_password("passwort");
        let result = PasswordSource::Prompt.resolve(&mut interaction, PasswordPurpose::New);
        assert!(matches!(result, Err(Error::PasswordMismatch)));
    }

    #[test]
    fn test_empty_password_rejected() {
        let mut interaction = ScriptedInteraction::new().with_password("");
        let result = PasswordSource::Prompt.resolve(&mut interaction, PasswordPurpose::Existing);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
