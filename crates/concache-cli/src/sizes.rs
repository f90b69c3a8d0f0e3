//! Sizes command implementation for concache CLI.
//!
//! Reports the progress of a query without ever starting a computation.

use std::net::SocketAddr;

use crate::query::print_sizes;
use crate::session::{self, Session};

/// Execute the sizes command.
pub fn execute(session: &Session, ops: &[String], contact: Option<SocketAddr>) -> anyhow::Result<()> {
    let query = session::parse_query(ops)?;

    match session
        .service
        .concordance_sizes(&session.identity, &query, contact)?
    {
        Some(sizes) => {
            print_sizes(&sizes);
            Ok(())
        }
        None => anyhow::bail!(
            "No cached or running concordance for this query in {}; run `concache query` first",
            session.identity.corpus()
        ),
    }
}
