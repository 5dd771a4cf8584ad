//! Operator interaction during a restore.

use crate::utils::{BackupError, Result};
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CANCEL_POLL: Duration = Duration::from_millis(200);

pub trait Prompt {
    /// Pick one of `options`; `None` means the operator backed out
    fn choose(&mut self, title: &str, options: &[String]) -> Result<Option<usize>>;

    fn confirm(&mut self, question: &str) -> Result<bool>;
}

/// Numbered menu on stdout, answers read from stdin. A cancelled token ends
/// the wait for an answer.
pub struct StdinPrompt {
    cancel: CancellationToken,
}

impl StdinPrompt {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    fn read_line(&self, prompt: &str) -> Result<String> {
        if self.cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        print!("{}", prompt);
        io::stdout().flush()?;

        // The read blocks on its own thread while the token is polled
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut input = String::new();
            let read = io::stdin().lock().read_line(&mut input).map(|_| input);
            let _ = tx.send(read);
        });
        loop {
            match rx.recv_timeout(CANCEL_POLL) {
                Ok(read) => return Ok(read?.trim().to_string()),
                Err(RecvTimeoutError::Timeout) if self.cancel.is_cancelled() => {
                    println!();
                    return Err(BackupError::Cancelled);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into())
                }
            }
        }
    }
}

impl Prompt for StdinPrompt {
    fn choose(&mut self, title: &str, options: &[String]) -> Result<Option<usize>> {
        println!("{}", title);
        for (i, option) in options.iter().enumerate() {
            println!("  {:>2}) {}", i + 1, option);
        }
        loop {
            let answer = self.read_line("Select a number (empty to cancel): ")?;
            if answer.is_empty() {
                return Ok(None);
            }
            match parse_choice(&answer, options.len()) {
                Some(idx) => return Ok(Some(idx)),
                None => println!("Please enter a number between 1 and {}.", options.len()),
            }
        }
    }

    fn confirm(&mut self, question: &str) -> Result<bool> {
        let answer = self.read_line(&format!("{} (yes/no): ", question))?;
        Ok(answer.eq_ignore_ascii_case("yes"))
    }
}

/// One-based menu answer to a zero-based index
fn parse_choice(answer: &str, len: usize) -> Option<usize> {
    match answer.parse::<usize>() {
        Ok(n) if (1..=len).contains(&n) => Some(n - 1),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::collections::VecDeque;

    /// Canned answers for tests
    #[derive(Default)]
    pub struct ScriptedPrompt {
        pub choices: VecDeque<Option<usize>>,
        pub confirmations: VecDeque<bool>,
        pub asked: Vec<String>,
    }

    impl Prompt for ScriptedPrompt {
        fn choose(&mut self, title: &str, _options: &[String]) -> Result<Option<usize>> {
            self.asked.push(title.to_string());
            Ok(self.choices.pop_front().flatten())
        }

        fn confirm(&mut self, question: &str) -> Result<bool> {
            self.asked.push(question.to_string());
            Ok(self.confirmations.pop_front().unwrap_or(false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_choice() {
        assert_eq!(parse_choice("1", 3), Some(0));
        assert_eq!(parse_choice("3", 3), Some(2));
        assert_eq!(parse_choice("0", 3), None);
        assert_eq!(parse_choice("4", 3), None);
        assert_eq!(parse_choice("two", 3), None);
    }

    #[test]
    fn test_cancelled_prompt_does_not_wait_for_input() {
        let token = CancellationToken::new();
        token.cancel();
        let mut prompt = StdinPrompt::new(token);

        assert!(matches!(
            prompt.confirm("Overwrite?"),
            Err(BackupError::Cancelled)
        ));
        assert!(matches!(
            prompt.choose("Which?", &["a".to_string()]),
            Err(BackupError::Cancelled)
        ));
    }
}
