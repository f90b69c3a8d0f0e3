//! Hidden `worker` command: the process behind `query --async`.
//!
//! Reads one request from stdin, answers on stdout as soon as the claim is
//! settled and then computes until the concordance is committed. Logs go to
//! stderr, which the launching process points at the corpus run directory.

use crate::session::Session;

pub async fn execute(session: Session) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin().lock();
        let stdout = std::io::stdout();
        session
            .service
            .serve_worker(&session.identity, stdin, stdout)
    })
    .await??;
    Ok(())
}
