//! Credential input: environment, flags, or an interactive prompt

use anyhow::{anyhow, bail, Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use crossterm::tty::IsTty;
use std::fmt;
use std::io::{self, BufRead, Write};

pub const EMAIL_ENV: &str = "COURSYNC_EMAIL";
pub const PASSWORD_ENV: &str = "COURSYNC_PASSWORD";

/// Sign-in credentials
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Resolve credentials: explicit email, then environment, then prompts
pub fn read_credentials(email: Option<&str>) -> Result<Credentials> {
    let email = match non_empty(email.map(str::to_owned)).or_else(|| env_value(EMAIL_ENV)) {
        Some(email) => email,
        None => prompt_line("Email: ")?,
    };
    if email.is_empty() {
        bail!("An email address is required to sign in");
    }

    // Passwords may legitimately start or end with whitespace
    let password = match std::env::var(PASSWORD_ENV).ok().filter(|v| !v.is_empty()) {
        Some(password) => password,
        None => prompt_hidden("Password: ")?,
    };

    Ok(Credentials { email, password })
}

fn env_value(key: &str) -> Option<String> {
    non_empty(std::env::var(key).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

/// Read a line without echoing it. Falls back to a plain read when stdin is not a terminal.
pub fn prompt_hidden(prompt: &str) -> Result<String> {
    if !io::stdin().is_tty() {
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read password from stdin")?;
        return Ok(line.trim_end_matches(['\r', '\n']).to_string());
    }

    print!("{}", prompt);
    io::stdout().flush()?;

    terminal::enable_raw_mode().context("Failed to disable terminal echo")?;
    let result = read_hidden_line();
    terminal::disable_raw_mode().context("Failed to restore terminal")?;
    println!();

    result
}

fn read_hidden_line() -> Result<String> {
    let mut secret = String::new();

    loop {
        if let Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event::read()?
        {
            if kind == KeyEventKind::Release {
                continue;
            }
            match code {
                KeyCode::Enter => return Ok(secret),
                KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                    return Err(anyhow!("Password entry interrupted"));
                }
                KeyCode::Backspace => {
                    secret.pop();
                }
                KeyCode::Char(c) => secret.push(c),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let credentials = Credentials {
            email: "a@b.com".to_string(),
            password: "hunter2".to_string(),
        };

        let rendered = format!("{:?}", credentials);
        assert!(rendered.contains("a@b.com"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_explicit_email_and_env_password() {
        std::env::set_var(PASSWORD_ENV, "pw");

        let credentials = read_credentials(Some("  a@b.com ")).expect("credentials");
        assert_eq!(credentials.email, "a@b.com");
        assert_eq!(credentials.password, "pw");

        std::env::remove_var(PASSWORD_ENV);
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some(" x ".to_string())), Some("x".to_string()));
    }
}
