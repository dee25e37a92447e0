//! Input validation shared by discovery and command push

use thiserror::Error;

/// User-facing rejections, raised before any network activity
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid subnet format: {0}")]
    InvalidSubnet(String),
    #[error("subnet {subnet} has {hosts} hosts, limit is {limit}")]
    SubnetTooLarge {
        subnet: String,
        hosts: u128,
        limit: usize,
    },
    #[error("concurrency limit must be at least 1")]
    InvalidConcurrency,
    #[error("no targets selected")]
    NoTargets,
    #[error("no commands provided")]
    NoCommands,
}

/// Split newline-separated command text into commands, dropping blank lines
pub fn parse_commands(text: &str) -> Result<Vec<String>, ValidationError> {
    let commands: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if commands.is_empty() {
        return Err(ValidationError::NoCommands);
    }
    Ok(commands)
}
