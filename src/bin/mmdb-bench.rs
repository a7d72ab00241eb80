use anyhow::{Context, Result};
use clap::Parser;
use mmdb_reader::{Database, OpenMode};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "mmdb-bench")]
#[command(
    about = "Benchmark lookups against a MaxMind DB file",
    long_about = "mmdb-bench - Benchmark by reading IPs from the IP file and looking up each one in the MMDB file\n\n\
    Prints the running lookup rate every 1000 lookups.\n\n\
    Examples:\n\
      mmdb-bench GeoLite2-City.mmdb ips.txt\n\
      mmdb-bench GeoLite2-City.mmdb ips.txt --mode file --count 50000"
)]
#[command(version)]
struct Cli {
    /// MMDB file to query
    #[arg(value_name = "DATABASE")]
    database: PathBuf,

    /// File with one IP address per line
    #[arg(value_name = "IP_FILE")]
    ip_file: PathBuf,

    /// Stop after this many lookups
    #[arg(short = 'n', long, default_value_t = 200_000)]
    count: u64,

    /// How to access the database: auto, file, memory or mmap
    #[arg(short, long, default_value = "memory")]
    mode: OpenMode,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let db = Database::builder(&cli.database)
        .mode(cli.mode)
        .open()
        .with_context(|| format!("Failed to open database {}", cli.database.display()))?;
    log::info!("{:?}", db);

    let file = File::open(&cli.ip_file)
        .with_context(|| format!("Failed to open IP file {}", cli.ip_file.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    benchmark(&db, BufReader::new(file), cli.count, &mut out)
}

fn benchmark<R: BufRead, W: Write>(db: &Database, input: R, count: u64, out: &mut W) -> Result<()> {
    let start = Instant::now();
    let mut n = 0u64;

    for (line_no, line) in input.lines().enumerate() {
        if n == count {
            break;
        }
        let line = line.context("Failed to read IP file")?;
        let ip = line.trim();
        if ip.is_empty() {
            continue;
        }

        db.get(ip)
            .with_context(|| format!("Lookup failed on line {}", line_no + 1))?;
        n += 1;

        if n % 1000 == 0 {
            write_status(out, start, n)?;
        }
    }

    if n % 1000 != 0 {
        write_status(out, start, n)?;
    }
    Ok(())
}

fn write_status<W: Write>(out: &mut W, start: Instant, n: u64) -> Result<()> {
    let elapsed = start.elapsed().as_secs_f64();
    let rate = if elapsed > 0.0 { n as f64 / elapsed } else { 0.0 };
    writeln!(
        out,
        "{} @ {:.2} lookups per second ({} seconds elapsed)",
        n, rate, elapsed as u64
    )?;
    Ok(())
}
