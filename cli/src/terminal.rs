//! Terminal-backed wallet and notice sink for the CLI.

use std::io::{self, BufRead, Write};
use std::sync::{Mutex, PoisonError};

use smoketron::{Notice, NoticeLevel, NoticeSink, WalletConnector, WalletError};

// =============================================================================
// WALLET
// =============================================================================

/// Wallet whose account comes from configuration and whose signatures come
/// from either an external signer command or the operator pasting one.
pub struct TerminalWallet {
    account: Mutex<Option<String>>,
    sign_command: Option<Vec<String>>,
}

impl TerminalWallet {
    pub fn new(account: Option<String>, sign_command: Option<&str>) -> Self {
        Self {
            account: Mutex::new(account.filter(|a| !a.trim().is_empty())),
            sign_command: sign_command.map(split_command).filter(|argv| !argv.is_empty()),
        }
    }
}

#[async_trait::async_trait]
impl WalletConnector for TerminalWallet {
    fn account(&self) -> Option<String> {
        self.account.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn sign_message(&self, message: &str) -> Result<Option<String>, WalletError> {
        let message = message.to_owned();
        let argv = self.sign_command.clone();
        tokio::task::spawn_blocking(move || match argv {
            Some(argv) => sign_with_command(&argv, &message),
            None => sign_interactively(&message),
        })
        .await
        .map_err(|e| WalletError::Rejected(e.to_string()))?
    }

    fn disconnect(&self) {
        *self.account.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Split a signer command line on whitespace. No quoting is supported.
fn split_command(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_owned).collect()
}

/// Run `argv` with the message appended as the final argument; stdout is the
/// signature.
fn sign_with_command(argv: &[String], message: &str) -> Result<Option<String>, WalletError> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(None);
    };
    tracing::debug!(program = %program, "invoking signer command");
    let output = std::process::Command::new(program)
        .args(args)
        .arg(message)
        .output()
        .map_err(|e| WalletError::Rejected(format!("signer `{program}` failed to start: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        return Err(WalletError::Rejected(if stderr.is_empty() { output.status.to_string() } else { stderr }));
    }
    Ok(non_empty(String::from_utf8_lossy(&output.stdout).trim()))
}

fn sign_interactively(message: &str) -> Result<Option<String>, WalletError> {
    let mut stderr = io::stderr().lock();
    let prompt = format!("Sign this message with your wallet:\n\n{message}\n\nPaste signature (empty to cancel): ");
    stderr
        .write_all(prompt.as_bytes())
        .and_then(|()| stderr.flush())
        .map_err(|e| WalletError::Rejected(e.to_string()))?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).map_err(|e| WalletError::Rejected(e.to_string()))?;
    Ok(non_empty(line.trim()))
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_owned()) }
}

// =============================================================================
// NOTICES
// =============================================================================

/// Prints notices to stderr, one line each. Loading notices are suppressed
/// unless `verbose` is set.
pub struct TerminalNotices {
    verbose: bool,
}

impl TerminalNotices {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl NoticeSink for TerminalNotices {
    fn notify(&self, notice: Notice) {
        let tag = match notice.level {
            NoticeLevel::Loading if !self.verbose => return,
            NoticeLevel::Loading => "..",
            NoticeLevel::Success => "ok",
            NoticeLevel::Error => "error",
            NoticeLevel::Info => "info",
        };
        eprintln!("[{tag}] {}", notice.message);
    }
}

#[cfg(test)]
#[path = "terminal_test.rs"]
mod tests;
