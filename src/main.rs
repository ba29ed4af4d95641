#[macro_use]
mod errors;
mod cursor;
mod engine;
mod node;
mod pager;
mod row;
mod shell;
mod table;

use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use table::Table;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "mysqlite", version = VERSION, about = "Tiny disk-backed key-value store.")]
struct Cli {
    /// Database file to open (created if it doesn't exist yet).
    #[arg(default_value = "data.db")]
    db_path: PathBuf,
}

fn main() {
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open("mysqlite.log")
        .expect("Failed to open log file");

    tracing_subscriber::fmt()
        .with_writer(file)
        .with_ansi(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    std::process::exit(run(&cli.db_path));
}

fn run(db_path: &std::path::Path) -> i32 {
    let mut table = match Table::open(db_path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut input = String::new();

    loop {
        input.clear();
        match stdin.lock().read_line(&mut input) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }

        let line = input.trim_end();
        if line.is_empty() {
            continue;
        }

        match shell::parse(line) {
            Ok(stmt) => match shell::execute(&mut table, stmt, &mut stdout) {
                Ok(true) => continue,
                Ok(false) => return close(table),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return 1;
                }
            },
            Err(e) => {
                let _ = writeln!(stdout, "Error: {}", e);
            }
        }
    }

    close(table)
}

fn close(table: Table) -> i32 {
    match table.close() {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}
