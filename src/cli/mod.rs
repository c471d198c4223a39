//! CLI module for PMP Key Manager
//!
//! Administrative subcommands over the configured key store. Every command
//! prints its result as JSON on stdout.

pub mod keys;

use clap::{Parser, Subcommand};

/// PMP Key Manager - API key issuance, validation and rate limiting
#[derive(Parser)]
#[command(name = "pmp-key-manager")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Storage backend (memory, redb, redis, postgres); overrides config
    #[arg(long, global = true)]
    pub backend: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Issue a new key and print it with its secret
    Create(keys::CreateArgs),

    /// List an owner's keys
    List(keys::ListArgs),

    /// Show one key
    Get(keys::GetArgs),

    /// Change an owner's key
    Update(keys::UpdateArgs),

    /// Delete an owner's key
    Delete(keys::DeleteArgs),

    /// Check a secret and stamp its last use
    Validate(keys::SecretArgs),

    /// Validate a secret and charge its rate window
    Authenticate(keys::SecretArgs),

    /// Record a request against a key's rate window
    CheckRateLimit(keys::RateLimitArgs),
}
