//! # StrataKV interactive shell
//!
//! A small REPL over the engine's public API: reads commands from
//! stdin, prints results to stdout, exits on EOF. Suitable both for
//! poking at a database by hand and for scripted smoke tests (pipe a
//! command file in).
//!
//! ## Commands
//!
//! ```text
//! SET key value        Insert or overwrite a key
//! GET key              Print the value or (nil)
//! DEL key              Delete a key
//! SCAN [start [end]]   List entries in [start, end) in key order
//! FLUSH                Force the memtable into a level-0 table
//! STATS                Print level shape and sequence number
//! EXIT / QUIT          Close the database and leave
//! ```
//!
//! ## Configuration (environment variables)
//!
//! ```text
//! STRATA_DIR              database directory   (default: "strata-data")
//! STRATA_SYNC             fsync each write     (default: "false")
//! STRATA_WRITE_BUFFER_KB  memtable size in KiB (default: 4096)
//! STRATA_BLOOM_BITS       filter bits per key  (default: 10)
//! ```

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use engine::{Db, Options, ReadOptions, WriteOptions};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(io::stderr)
        .init();

    let dir = env_or("STRATA_DIR", "strata-data");
    let sync: bool = env_or("STRATA_SYNC", "false").parse().unwrap_or(false);
    let write_buffer_kb: usize = env_or("STRATA_WRITE_BUFFER_KB", "4096")
        .parse()
        .unwrap_or(4096);
    let bloom_bits: usize = env_or("STRATA_BLOOM_BITS", "10").parse().unwrap_or(10);

    let options = Options {
        write_buffer_size: write_buffer_kb * 1024,
        bloom_bits_per_key: bloom_bits,
        ..Options::default()
    };
    let db = Db::open(options, &dir).with_context(|| format!("opening database at {dir}"))?;
    let write_options = WriteOptions { sync };

    println!(
        "StrataKV ready (dir={dir}, sync={sync}, write_buffer={write_buffer_kb}KiB, bloom_bits={bloom_bits})"
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else { continue };

        match command.to_ascii_uppercase().as_str() {
            "SET" => {
                let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                    println!("usage: SET key value");
                    continue;
                };
                match db.put(&write_options, key.as_bytes(), value.as_bytes()) {
                    Ok(()) => println!("OK"),
                    Err(e) => println!("ERR {e}"),
                }
            }
            "GET" => {
                let Some(key) = parts.next() else {
                    println!("usage: GET key");
                    continue;
                };
                match db.get(&ReadOptions::default(), key.as_bytes()) {
                    Ok(Some(value)) => println!("{}", String::from_utf8_lossy(&value)),
                    Ok(None) => println!("(nil)"),
                    Err(e) => println!("ERR {e}"),
                }
            }
            "DEL" => {
                let Some(key) = parts.next() else {
                    println!("usage: DEL key");
                    continue;
                };
                match db.delete(&write_options, key.as_bytes()) {
                    Ok(()) => println!("OK"),
                    Err(e) => println!("ERR {e}"),
                }
            }
            "SCAN" => {
                let start = parts.next();
                let end = parts.next();
                let mut iter = db.iter(&ReadOptions::default());
                match start {
                    Some(s) => iter.seek(s.as_bytes()),
                    None => iter.seek_to_first(),
                }
                let mut count = 0usize;
                while iter.valid() {
                    if let Some(e) = end {
                        if iter.key() >= e.as_bytes() {
                            break;
                        }
                    }
                    println!(
                        "{} -> {}",
                        String::from_utf8_lossy(iter.key()),
                        String::from_utf8_lossy(iter.value())
                    );
                    count += 1;
                    iter.next();
                }
                if let Err(e) = iter.status() {
                    println!("ERR {e}");
                } else {
                    println!("({count} entries)");
                }
            }
            "FLUSH" => match db.flush() {
                Ok(()) => println!("OK"),
                Err(e) => println!("ERR {e}"),
            },
            "STATS" => println!("{}", db.level_summary()),
            "EXIT" | "QUIT" => break,
            other => println!("unknown command: {other}"),
        }
    }

    println!("bye");
    Ok(())
}
