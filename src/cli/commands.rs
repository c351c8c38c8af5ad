//! Shell meta-commands (`\dt`, `\di`, `\dbgmvcc`, `\txn`, `\help`).
//!
//! Meta-commands bypass the SQL front-end entirely; the REPL dispatches any
//! line starting with a backslash here before the statement buffer is
//! touched.

use crate::database::{Database, Session};
use crate::error::DbError;
use crate::txn::TransactionState;
use eyre::Result;

const HELP: &str = "\
Meta-commands:
  \\dt              list tables
  \\di              list indexes
  \\dbgmvcc <table> dump a table's version chains
  \\txn             show the current transaction
  \\txn <id>        attach to a running transaction by id
  \\txn gc          run garbage collection
  \\txn -1          detach from the current transaction
  \\help            this text
Statements end with ';'. Ctrl-D exits.
";

fn invalid(msg: impl Into<String>) -> eyre::Report {
    DbError::InvalidInput(msg.into()).into()
}

/// Executes one meta-command line (starting with `\`), returning its output.
pub fn run_meta(db: &Database, session: &mut Session, line: &str) -> Result<String> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or("");
    match command {
        "\\help" => Ok(HELP.to_string()),
        "\\dt" => {
            let names = db.catalog().table_names();
            if names.is_empty() {
                return Ok("no tables\n".into());
            }
            let mut out = String::new();
            for name in names {
                let table = db.catalog().table(&name).expect("listed table resolves");
                out.push_str(&format!("{} {}\n", table.name, table.schema));
            }
            Ok(out)
        }
        "\\di" => {
            let indexes = db.catalog().all_indexes();
            if indexes.is_empty() {
                return Ok("no indexes\n".into());
            }
            let mut out = String::new();
            for index in indexes {
                out.push_str(&format!(
                    "{} on {}({}) using {}\n",
                    index.name,
                    index.table_name,
                    index
                        .key_schema
                        .columns()
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                    index.kind.name(),
                ));
            }
            Ok(out)
        }
        "\\dbgmvcc" => {
            let table = parts.next().ok_or_else(|| invalid("usage: \\dbgmvcc <table>"))?;
            db.dump_version_chains(table)
        }
        "\\txn" => match parts.next() {
            None => match &session.txn {
                Some(txn) => Ok(format!(
                    "txn{} read_ts={} state={}\n",
                    txn.seq(),
                    txn.read_ts(),
                    txn.state()
                )),
                None => Ok("not inside a transaction (auto-commit)\n".into()),
            },
            Some("gc") => {
                db.garbage_collect()?;
                Ok(format!("GC done, watermark={}\n", db.txn_manager().watermark()))
            }
            Some("-1") => {
                session.txn = None;
                Ok("detached\n".into())
            }
            Some(id) => {
                let seq: u64 = id.parse().map_err(|_| invalid(format!("bad txn id: {id}")))?;
                let txn = db
                    .txn_manager()
                    .get_txn_by_seq(seq)
                    .ok_or_else(|| invalid(format!("no such transaction: {seq}")))?;
                if !matches!(txn.state(), TransactionState::Running | TransactionState::Tainted) {
                    return Err(invalid(format!("txn{seq} is {}", txn.state())));
                }
                session.txn = Some(txn);
                Ok(format!("attached to txn{seq}\n"))
            }
        },
        other => Err(invalid(format!("unknown meta-command: {other} (try \\help)"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::in_memory().unwrap()
    }

    #[test]
    fn dt_and_di_list_catalog_contents() {
        let db = db();
        let mut session = Session::default();
        db.execute("CREATE TABLE t(a INTEGER PRIMARY KEY)", &mut session).unwrap();
        let tables = run_meta(&db, &mut session, "\\dt").unwrap();
        assert!(tables.contains("t (a INTEGER)"));
        let indexes = run_meta(&db, &mut session, "\\di").unwrap();
        assert!(indexes.contains("t_pkey on t(a) using btree"));
    }

    #[test]
    fn txn_attach_and_detach() {
        let db = db();
        let mut session = Session::default();
        db.execute("BEGIN", &mut session).unwrap();
        let seq = session.txn.as_ref().unwrap().seq();

        let mut other = Session::default();
        let out = run_meta(&db, &mut other, &format!("\\txn {seq}")).unwrap();
        assert!(out.contains("attached"));
        assert_eq!(other.txn.as_ref().unwrap().seq(), seq);

        run_meta(&db, &mut other, "\\txn -1").unwrap();
        assert!(other.txn.is_none());

        assert!(run_meta(&db, &mut other, "\\txn 999").is_err());
    }

    #[test]
    fn txn_gc_runs() {
        let db = db();
        let mut session = Session::default();
        let out = run_meta(&db, &mut session, "\\txn gc").unwrap();
        assert!(out.contains("watermark"));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let db = db();
        let mut session = Session::default();
        assert!(run_meta(&db, &mut session, "\\frobnicate").is_err());
    }
}
