use super::*;

#[test]
fn split_command_drops_extra_whitespace() {
    assert_eq!(split_command("  cast wallet   sign "), vec!["cast", "wallet", "sign"]);
    assert!(split_command("   ").is_empty());
}

#[test]
fn blank_account_is_not_connected() {
    let wallet = TerminalWallet::new(Some("  ".into()), None);
    assert_eq!(wallet.account(), None);
}

#[test]
fn disconnect_forgets_account() {
    let wallet = TerminalWallet::new(Some("0xA".into()), Some("echo"));
    assert_eq!(wallet.account().as_deref(), Some("0xA"));
    wallet.disconnect();
    assert_eq!(wallet.account(), None);
}

#[cfg(unix)]
#[tokio::test]
async fn signer_command_output_is_the_signature() {
    let wallet = TerminalWallet::new(Some("0xA".into()), Some("echo 0xSIG"));
    let signature = wallet.sign_message("Sign in").await.unwrap();
    assert_eq!(signature.as_deref(), Some("0xSIG Sign in"));
}

#[cfg(unix)]
#[tokio::test]
async fn failing_signer_command_is_a_rejection() {
    let wallet = TerminalWallet::new(Some("0xA".into()), Some("false"));
    let err = wallet.sign_message("Sign in").await.unwrap_err();
    assert!(matches!(err, WalletError::Rejected(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn missing_signer_program_is_a_rejection() {
    let wallet = TerminalWallet::new(Some("0xA".into()), Some("smoketron-no-such-signer"));
    let err = wallet.sign_message("Sign in").await.unwrap_err();
    assert!(err.to_string().contains("failed to start"));
}
