//! Query command implementation for concache CLI.
//!
//! Computes a concordance through the cache and prints its first lines.
//! With `--async`, returns as soon as the first page is available and then
//! follows the background computation until it finishes. The computation
//! runs in a worker process, so it also finishes if following stops.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use concache_core::{ConcordanceOptions, ConcordanceSizes, MinSize, Query};

use crate::colors;
use crate::session::{self, Session};

/// How often progress is polled while following.
const FOLLOW_INTERVAL: Duration = Duration::from_millis(200);

/// Options of the query command.
pub struct QueryArgs {
    pub ops: Vec<String>,
    pub asynchronous: bool,
    pub follow: bool,
    pub no_cache: bool,
    pub sample: u64,
    pub min_size: Option<u64>,
    pub lines: usize,
}

/// Execute the query command.
pub async fn execute(session: Session, args: QueryArgs) -> anyhow::Result<()> {
    let query = session::parse_query(&args.ops)?;
    let options = ConcordanceOptions {
        asynchronous: args.asynchronous,
        cache: !args.no_cache,
        min_size: args.min_size.map(MinSize::AtLeast),
        sample_size: args.sample,
        page_size: args.lines as u64,
        ..ConcordanceOptions::default()
    };

    println!(
        "\n{}Query{} {}{}{} ({} positions)",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        session.identity.corpus(),
        colors::RESET,
        session.corpus.positions()
    );

    let start = Instant::now();
    let service = session.service.clone();
    let identity = session.identity.clone();
    let task_query = query.clone();
    let conc = tokio::task::spawn_blocking(move || {
        service.get_concordance(&identity, &task_query, &options)
    })
    .await?;

    let conc = match conc {
        Ok(conc) => conc,
        Err(e) => {
            print_sizes(&ConcordanceSizes::failed());
            return Err(e.into());
        }
    };

    print_sizes(&conc.sizes().with_search_size(Some(session.corpus.positions() as u64)));
    for &hit in conc.result().hits().iter().take(args.lines) {
        println!(
            "{}{:>8}{}  {}",
            colors::DIM,
            hit + 1,
            colors::RESET,
            session.corpus.line(hit).unwrap_or_default()
        );
    }
    println!(
        "{}Done in {:.2}s{}",
        colors::DIM,
        start.elapsed().as_secs_f64(),
        colors::RESET
    );

    if let (false, Some(contact)) = (conc.finished(), conc.contact()) {
        println!("contact: {}", contact);
        if args.follow {
            follow(&session, &query, contact).await?;
        }
    }

    Ok(())
}

/// Poll a running computation until it finishes or the user presses Ctrl-C.
async fn follow(session: &Session, query: &Query, contact: SocketAddr) -> anyhow::Result<()> {
    println!(
        "{}Following computation... (Ctrl+C to stop){}",
        colors::DIM,
        colors::RESET
    );

    let mut ticker = tokio::time::interval(FOLLOW_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let service = session.service.clone();
                let identity = session.identity.clone();
                let query = query.clone();
                let sizes = tokio::task::spawn_blocking(move || {
                    service.concordance_sizes(&identity, &query, Some(contact))
                })
                .await??;

                match sizes {
                    Some(sizes) if sizes.finished => {
                        println!("{}Finished{}", colors::GREEN, colors::RESET);
                        print_sizes(&sizes);
                        return Ok(());
                    }
                    Some(sizes) => println!("{}... {} hits{}", colors::DIM, sizes.size, colors::RESET),
                    None => anyhow::bail!("The computation ended without a result"),
                }
            }
            _ = &mut ctrl_c => {
                println!(
                    "\n{}Stopped following; the computation continues in the background (see `concache sizes`){}",
                    colors::YELLOW,
                    colors::RESET
                );
                return Ok(());
            }
        }
    }
}

/// Print sizes in the fixed order used by every command.
pub fn print_sizes(sizes: &ConcordanceSizes) {
    println!("finished: {}", u8::from(sizes.finished));
    println!("size: {}", sizes.size);
    match sizes.relative_size {
        Some(relative) => println!("relative size: {:.2}", relative),
        None => println!("relative size: -"),
    }
    println!("full size: {}", sizes.full_size);
}
