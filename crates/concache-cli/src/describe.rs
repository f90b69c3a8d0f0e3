//! Describe command implementation for concache CLI.

use crate::colors;
use crate::session::{self, Session};

/// Execute the describe command.
pub fn execute(session: &Session, ops: &[String]) -> anyhow::Result<()> {
    let query = session::parse_query(ops)?;
    let summaries = session.service.describe(&session.identity, &query)?;

    println!("{}", "─".repeat(50));
    for summary in &summaries {
        let size = summary
            .size
            .map_or_else(|| "-".to_string(), |s| s.to_string());
        match &summary.default_attr {
            Some(attr) => println!(
                "{}{}{}: {} {}(default attribute {}){}  [{}]",
                colors::BOLD,
                summary.label,
                colors::RESET,
                summary.args,
                colors::DIM,
                attr,
                colors::RESET,
                size
            ),
            None => println!(
                "{}{}{}: {}  [{}]",
                colors::BOLD,
                summary.label,
                colors::RESET,
                summary.args,
                size
            ),
        }
    }
    println!("{}", "─".repeat(50));

    Ok(())
}
