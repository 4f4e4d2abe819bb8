use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::{self, NewComp};
use crate::extract::{parse_job_description, JobRecord};
use crate::fetcher::{Fetcher, PageSource};
use crate::llm::ChatModel;
use crate::truncate;

/// How many discovered postings a run mines by default.
pub const DEFAULT_MINE_LIMIT: usize = 4;
const MINE_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Accept(NewComp),
    Skip(String),
}

/// Turn an extracted record into something storable, or say why not.
pub fn validate(record: &JobRecord, source_url: &str) -> Validation {
    if record.job_title.is_empty() || record.company.is_empty() {
        return Validation::Skip(format!(
            "{} (missing job title or company)",
            truncate(source_url, 50)
        ));
    }
    if record.max <= 0 {
        return Validation::Skip(format!(
            "{} at {} (no salary found)",
            record.job_title, record.company
        ));
    }

    let (salary_min, salary_max) = if record.min > record.max {
        (record.max, record.min)
    } else {
        (record.min, record.max)
    };

    Validation::Accept(NewComp {
        company_name: record.company.clone(),
        role_title: record.job_title.clone(),
        salary_min,
        salary_max,
        source_url: source_url.to_string(),
    })
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub processed: usize,
    pub saved: Vec<NewComp>,
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

/// Fetch, extract, validate and store the first `limit` postings.
pub async fn mine<S: PageSource, M: ChatModel>(
    conn: &Connection,
    fetcher: &Fetcher<S>,
    model: Option<&M>,
    urls: &[String],
    limit: usize,
) -> Result<RunReport> {
    let urls = &urls[..urls.len().min(limit)];
    let mut report = RunReport::default();

    let pb = ProgressBar::new(urls.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    for (i, url) in urls.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(MINE_PAUSE).await;
        }
        pb.set_message(truncate(url, 40));
        report.processed += 1;

        let Some(raw) = fetcher.fetch(url).await else {
            report.errors.push(format!("Failed to fetch {}", truncate(url, 50)));
            pb.inc(1);
            continue;
        };

        let record = parse_job_description(model, &raw).await;
        match validate(&record, url) {
            Validation::Skip(reason) => {
                info!("Skipped {}", reason);
                report.skipped.push(reason);
            }
            Validation::Accept(row) => {
                if let Some((min, max)) = db::find_existing(conn, &row.company_name, &row.role_title)? {
                    report.skipped.push(format!(
                        "{} at {} (already stored: ${}-${})",
                        row.role_title, row.company_name, min, max
                    ));
                } else {
                    match db::insert_comp(conn, &row) {
                        Ok(_) => {
                            info!(
                                "Saved {} at {}: ${}-${}",
                                row.role_title, row.company_name, row.salary_min, row.salary_max
                            );
                            report.saved.push(row);
                        }
                        Err(e) => {
                            warn!("Failed to save {}: {}", row.role_title, e);
                            report.errors.push(format!("Error saving {}: {}", row.role_title, e));
                        }
                    }
                }
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "Mined {} postings ({} saved, {} skipped, {} errors)",
        report.processed,
        report.saved.len(),
        report.skipped.len(),
        report.errors.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateTier;
    use crate::fetcher::FetchOutcome;
    use crate::llm::LlmError;
    use crate::pacer::Pacer;
    use crate::testing::{FnModel, ScriptedSource};

    fn record(title: &str, company: &str, min: i64, max: i64) -> JobRecord {
        JobRecord {
            job_title: title.into(),
            company: company.into(),
            min,
            max,
        }
    }

    #[test]
    fn validation_rules() {
        let url = "https://jobs.lever.co/acme/1";

        assert!(matches!(validate(&record("", "Acme", 1, 2), url), Validation::Skip(_)));
        assert!(matches!(validate(&record("SRE", "", 1, 2), url), Validation::Skip(_)));
        assert!(matches!(validate(&record("SRE", "Acme", 100, 0), url), Validation::Skip(_)));
        assert!(matches!(validate(&JobRecord::default(), url), Validation::Skip(_)));

        match validate(&record("SRE", "Acme", 200000, 150000), url) {
            Validation::Accept(row) => {
                assert_eq!((row.salary_min, row.salary_max), (150000, 200000));
                assert_eq!(row.source_url, url);
            }
            other => panic!("expected accept, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn mines_stores_and_dedups() {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();

        let urls: Vec<String> = (1..=6).map(|i| format!("https://jobs.lever.co/acme/{}", i)).collect();
        let source = ScriptedSource::new()
            .page(&urls[0], "ROLE=SRE|150000|200000")
            .page(&urls[1], "ROLE=SRE|160000|210000")
            .script(&urls[2], vec![FetchOutcome::Status(404)])
            .page(&urls[3], "ROLE=Analyst|0|0")
            .page(&urls[4], "ROLE=Designer|90000|100000")
            .page(&urls[5], "ROLE=Never|1|2");
        let fetcher = Fetcher::new(source, Pacer::with_interval(RateTier::Authenticated, Duration::ZERO));
        let model = FnModel::new(|prompt: &str| {
            let line = prompt
                .lines()
                .find_map(|l| l.trim().strip_prefix("Text: ROLE="))
                .ok_or_else(|| LlmError::MalformedResponse("no role".into()))?;
            let parts: Vec<&str> = line.split('|').collect();
            Ok(format!(
                r#"{{"job_title":"{}","company":"Acme","min":{},"max":{}}}"#,
                parts[0], parts[1], parts[2]
            ))
        });

        let report = mine(&conn, &fetcher, Some(&model), &urls, 5).await.unwrap();

        assert_eq!(report.processed, 5);
        assert_eq!(report.saved.len(), 2);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.skipped[0].contains("already stored"));
        assert_eq!(fetcher.source().calls(&urls[5]), 0);
        assert_eq!(db::get_stats(&conn).unwrap().total, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_posting_is_a_fetch_failure() {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();

        let urls = vec!["https://jobs.lever.co/acme/7".to_string()];
        let source = ScriptedSource::new().page(&urls[0], "\n  \n");
        let fetcher = Fetcher::new(source, Pacer::with_interval(RateTier::Authenticated, Duration::ZERO));
        let model = FnModel::new(|_: &str| {
            Ok(r#"{"job_title":"SRE","company":"Acme","min":1,"max":2}"#.to_string())
        });

        let report = mine(&conn, &fetcher, Some(&model), &urls, 5).await.unwrap();

        assert_eq!(model.calls(), 0);
        assert!(report.saved.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Failed to fetch"));
    }
}
