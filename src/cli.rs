//! CLI surface (spec 6: "Startup surface"). Default action (no
//! subcommand) starts the server; the remaining subcommands are
//! maintenance utilities layered on top of the same config.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "mailengine", version, about = "Multi-tenant email-sync engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Encrypt plaintext account credentials at rest using the
    /// configured encryption secret (I5).
    Encrypt,
    /// Scan stored accounts for plaintext (unencrypted) secrets.
    Scan,
    /// Derive or verify the service/encryption password.
    Password {
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        hash: bool,
    },
    /// Service-secret token management.
    Tokens {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum TokenAction {
    /// Issues a new token (spec 6: "scopes ⊆ `{*, api, metrics}`"),
    /// comma-separated, e.g. `--scopes api,metrics`.
    Issue {
        #[arg(long, default_value = "api")]
        scopes: String,
    },
    Export,
    Import { path: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_with_no_subcommand() {
        let cli = Cli::parse_from(["mailengine"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn cli_parses_password_flags() {
        let cli = Cli::parse_from(["mailengine", "password", "--hash"]);
        match cli.command {
            Some(Command::Password { hash, .. }) => assert!(hash),
            _ => panic!("expected password subcommand"),
        }
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
