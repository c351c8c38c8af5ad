//! # REPL
//!
//! The interactive loop: read a line with rustyline, dispatch meta-commands
//! immediately, accumulate SQL until a terminating `;`, execute, render.
//!
//! The prompt carries the managed transaction's id and state so a failed
//! statement is visible at a glance:
//!
//! ```text
//! quiverdb> BEGIN;
//! quiverdb(txn3:RUNNING)> UPDATE t SET a = 1;
//! quiverdb(txn3:TAINTED)> ABORT;
//! ```
//!
//! Statement errors print and return to the prompt; only EOF (Ctrl-D) or an
//! interrupt ends the loop, with exit status 0.

use super::commands::run_meta;
use super::table::format_table;
use crate::database::{Database, Session};
use eyre::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::time::Instant;

const CONTINUATION_PROMPT: &str = "      -> ";

pub struct Repl {
    db: Database,
    session: Session,
    editor: DefaultEditor,
    buffer: String,
}

impl Repl {
    pub fn new(db: Database) -> Result<Self> {
        Ok(Self {
            db,
            session: Session::default(),
            editor: DefaultEditor::new()?,
            buffer: String::new(),
        })
    }

    fn prompt(&self) -> String {
        match &self.session.txn {
            Some(txn) => format!("quiverdb(txn{}:{})> ", txn.seq(), txn.state()),
            None => "quiverdb> ".to_string(),
        }
    }

    /// Runs until EOF; returns normally so the process exits 0.
    pub fn run(&mut self) -> Result<()> {
        println!("quiverdb shell — \\help for meta-commands");
        loop {
            let prompt = if self.buffer.is_empty() {
                self.prompt()
            } else {
                CONTINUATION_PROMPT.to_string()
            };
            match self.editor.readline(&prompt) {
                Ok(line) => self.handle_line(&line),
                Err(ReadlineError::Interrupted) => {
                    self.buffer.clear();
                    println!("^C");
                }
                Err(ReadlineError::Eof) => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        let _ = self.editor.add_history_entry(line);

        if self.buffer.is_empty() && trimmed.starts_with('\\') {
            match run_meta(&self.db, &mut self.session, trimmed) {
                Ok(output) => print!("{output}"),
                Err(err) => eprintln!("error: {err}"),
            }
            return;
        }

        self.buffer.push_str(line);
        self.buffer.push('\n');
        if !trimmed.ends_with(';') {
            return;
        }
        let sql = std::mem::take(&mut self.buffer);
        self.run_statement(sql.trim());
    }

    fn run_statement(&mut self, sql: &str) {
        let started = Instant::now();
        match self.db.execute(sql, &mut self.session) {
            Ok(result) => {
                if let Some(message) = &result.message {
                    println!("{message}");
                }
                if let Some(schema) = &result.schema {
                    print!("{}", format_table(schema, &result.rows));
                }
                println!("({:.1} ms)", started.elapsed().as_secs_f64() * 1e3);
            }
            Err(err) => eprintln!("error: {err}"),
        }
    }
}
