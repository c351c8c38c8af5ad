//! The `quiverdb` shell binary.
//!
//! Usage: `quiverdb [path]` — opens the database at `path`, or a volatile
//! in-memory instance for the default `:memory:` target. `RUST_LOG` controls
//! tracing verbosity. Exits 0 on EOF.

use eyre::Result;
use quiverdb::cli::Repl;
use quiverdb::Database;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let target = std::env::args().nth(1).unwrap_or_else(|| ":memory:".to_string());
    let db = if target == ":memory:" {
        Database::in_memory()?
    } else {
        Database::open(&target)?
    };

    Repl::new(db)?.run()
}
