mod config;
mod db;
mod extract;
mod fetcher;
mod llm;
mod pacer;
mod pipeline;
mod scout;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};

use config::ScoutConfig;
use fetcher::{Fetcher, ProxyBackend, ReaderSource, SpiderSource, DEFAULT_RETRIES};
use llm::OpenAiChat;
use pacer::Pacer;
use scout::Scout;

#[derive(Parser)]
#[command(name = "comp_scout", about = "Job-board scout and salary extractor")]
struct Cli {
    /// SQLite file for stored salary records
    #[arg(long, global = true, default_value = db::DB_PATH)]
    db: PathBuf,

    /// Content-extraction proxy to route fetches through
    #[arg(long, global = true, value_enum, default_value_t = Proxy::Reader)]
    proxy: Proxy,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Proxy {
    /// Prefix reader proxy (READER_BASE_URL, optional READER_API_KEY)
    Reader,
    /// spider.cloud (requires SPIDER_API_KEY)
    Spider,
}

#[derive(Subcommand)]
enum Commands {
    /// Find job postings on a careers page whose titles match a keyword
    Discover { board_url: String, keyword: String },
    /// List candidate job links on a careers page without checking titles
    Links { board_url: String },
    /// Fetch one page through the proxy and print its text
    Fetch {
        url: String,
        #[arg(long, default_value_t = DEFAULT_RETRIES)]
        retries: u32,
    },
    /// Fetch one posting and extract title, company and salary
    Extract { url: String },
    /// Single un-retried fetch with a step-by-step report
    DebugFetch { url: String },
    /// Discover + extract + store in one pipeline
    Run {
        board_url: String,
        keyword: String,
        /// Max postings to mine
        #[arg(short = 'n', long, default_value_t = pipeline::DEFAULT_MINE_LIMIT)]
        limit: usize,
    },
    /// Stored salary records and per-company summary
    Overview {
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Show storage statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let config = ScoutConfig::from_env();

    let backend = match cli.proxy {
        Proxy::Reader => ProxyBackend::Reader(ReaderSource::new(&config.proxy)?),
        Proxy::Spider => {
            let key = config
                .spider_api_key
                .clone()
                .context("SPIDER_API_KEY environment variable must be set for --proxy spider")?;
            ProxyBackend::Spider(SpiderSource::new(key)?)
        }
    };
    let fetcher = Fetcher::new(backend, Pacer::new(config.proxy.rate_tier));
    let model = config.model.as_ref().map(OpenAiChat::new).transpose()?;

    let result = match cli.command {
        Commands::Discover { board_url, keyword } => {
            check_inputs(&board_url, Some(&keyword))?;
            let urls = Scout::new(&fetcher, model.as_ref())
                .discover_job_links(&board_url, &keyword)
                .await;
            if urls.is_empty() {
                println!("No matching jobs found for '{}'.", keyword);
            } else {
                for (i, url) in urls.iter().enumerate() {
                    println!("{:>3}. {}", i + 1, url);
                }
                println!("\n{} matching postings", urls.len());
            }
            Ok(())
        }
        Commands::Links { board_url } => {
            check_inputs(&board_url, None)?;
            let report = Scout::new(&fetcher, model.as_ref())
                .inspect_board(&board_url)
                .await?;
            println!(
                "{} links on page, {} plausible job links:",
                report.total_links,
                report.candidates.len()
            );
            for c in &report.candidates {
                println!("  {:<40} {}", truncate(&c.display_text, 40), c.url);
            }
            Ok(())
        }
        Commands::Fetch { url, retries } => {
            check_inputs(&url, None)?;
            match fetcher.fetch_page_content(&url, retries).await {
                Some(text) => println!("{}", text),
                None => println!("Failed to fetch {}", url),
            }
            Ok(())
        }
        Commands::Extract { url } => {
            check_inputs(&url, None)?;
            let Some(raw) = fetcher.fetch(&url).await else {
                println!("Failed to fetch {}", url);
                return Ok(());
            };
            let record = extract::parse_job_description(model.as_ref(), &raw).await;
            println!("{}", serde_json::to_string_pretty(&record)?);
            println!("\nPreview:\n{}", truncate(&raw, 500));
            Ok(())
        }
        Commands::DebugFetch { url } => {
            check_inputs(&url, None)?;
            let log = fetcher.debug_fetch(&url).await;
            for step in &log.steps {
                println!("{}", step);
            }
            if log.success {
                println!("\n{}", log.preview);
            }
            Ok(())
        }
        Commands::Run {
            board_url,
            keyword,
            limit,
        } => {
            check_inputs(&board_url, Some(&keyword))?;
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;

            let urls = Scout::new(&fetcher, model.as_ref())
                .discover_job_links(&board_url, &keyword)
                .await;
            if urls.is_empty() {
                println!("No matching jobs found. Discovery filtered out all links or found none.");
                return Ok(());
            }
            println!("Discovered {} postings, mining up to {}...", urls.len(), limit);

            let report = pipeline::mine(&conn, &fetcher, model.as_ref(), &urls, limit).await?;
            for row in &report.saved {
                println!(
                    "  + {} at {}: ${} - ${}",
                    row.role_title, row.company_name, row.salary_min, row.salary_max
                );
            }
            if !report.skipped.is_empty() {
                println!("\nSkipped:");
                for s in &report.skipped {
                    println!("  - {}", s);
                }
            }
            if !report.errors.is_empty() {
                println!("\nErrors:");
                for e in &report.errors {
                    println!("  ! {}", e);
                }
            }
            if report.saved.is_empty() && report.skipped.is_empty() && report.errors.is_empty() {
                println!("No data was extracted.");
            } else {
                println!(
                    "\nSaved {} posting(s) out of {} processed.",
                    report.saved.len(),
                    report.processed
                );
            }
            Ok(())
        }
        Commands::Overview { limit } => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;
            let rows = db::fetch_comp(&conn, limit)?;
            if rows.is_empty() {
                println!("No salary records stored.");
                return Ok(());
            }

            println!(
                "{:>4} | {:<20} | {:<32} | {:>9} | {:>9} | {:>9} | {:<3} | {:<10} | {}",
                "#", "Company", "Role", "Min", "Max", "Mid", "Cur", "Scraped", "Source"
            );
            println!("{}", "-".repeat(150));
            for r in &rows {
                println!(
                    "{:>4} | {:<20} | {:<32} | {:>9} | {:>9} | {:>9} | {:<3} | {:<10} | {}",
                    r.id,
                    truncate(&r.company_name, 20),
                    truncate(&r.role_title, 32),
                    r.salary_min,
                    r.salary_max,
                    r.midpoint(),
                    r.currency,
                    truncate_chars(&r.scraped_at, 10),
                    truncate(r.source_url.as_deref().unwrap_or("-"), 40)
                );
            }

            println!("\n--- By company ---");
            for s in db::market_summary(&conn)? {
                println!(
                    "  {:<20} {:>3} roles | avg mid {:>9.0} | range {} - {}",
                    truncate(&s.company, 20),
                    s.records,
                    s.avg_midpoint,
                    s.min,
                    s.max
                );
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Records:   {}", s.total);
            println!("Companies: {}", s.companies);
            println!("Roles:     {}", s.roles);
            println!("Last run:  {}", s.last_scraped.as_deref().unwrap_or("-"));
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn check_inputs(url: &str, keyword: Option<&str>) -> anyhow::Result<()> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("Invalid URL format. Must start with http:// or https://");
    }
    if keyword.is_some_and(|k| k.trim().is_empty()) {
        bail!("Role keyword is required.");
    }
    Ok(())
}

/// Prefix of at most `max` characters, never splitting a char.
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Display truncation with a trailing ellipsis.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", truncate_chars(s, max))
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
        assert_eq!(truncate("https://boards.greenhouse.io", 6), "https:...");
        assert_eq!(truncate("short", 6), "short");
    }

    #[test]
    fn input_checks() {
        assert!(check_inputs("https://acme.com/careers", Some("engineer")).is_ok());
        assert!(check_inputs("acme.com/careers", None).is_err());
        assert!(check_inputs("https://acme.com/careers", Some("  ")).is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(std::time::Duration::from_secs(75)), "1m 15s");
        assert_eq!(format_duration(std::time::Duration::from_secs(3725)), "1h 2m 5s");
    }
}
