use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

pub const DB_PATH: &str = "data/comp.sqlite";

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS comp_data (
            id            INTEGER PRIMARY KEY,
            company_name  TEXT NOT NULL,
            role_title    TEXT NOT NULL,
            salary_min    INTEGER,
            salary_max    INTEGER,
            currency      TEXT NOT NULL DEFAULT 'USD',
            source_url    TEXT,
            scraped_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_comp_company_role ON comp_data(company_name, role_title);
        ",
    )?;
    Ok(())
}

/// A validated salary record ready to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComp {
    pub company_name: String,
    pub role_title: String,
    pub salary_min: i64,
    pub salary_max: i64,
    pub source_url: String,
}

#[derive(Debug, Clone)]
pub struct CompRow {
    pub id: i64,
    pub company_name: String,
    pub role_title: String,
    pub salary_min: i64,
    pub salary_max: i64,
    pub currency: String,
    pub source_url: Option<String>,
    pub scraped_at: String,
}

impl CompRow {
    pub fn midpoint(&self) -> i64 {
        (self.salary_min + self.salary_max) / 2
    }
}

/// Salary range already stored for this company and role, if any.
pub fn find_existing(conn: &Connection, company: &str, role: &str) -> Result<Option<(i64, i64)>> {
    let range = conn
        .query_row(
            "SELECT salary_min, salary_max FROM comp_data
             WHERE company_name = ?1 AND role_title = ?2 LIMIT 1",
            params![company, role],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(range)
}

pub fn insert_comp(conn: &Connection, row: &NewComp) -> Result<i64> {
    conn.execute(
        "INSERT INTO comp_data (company_name, role_title, salary_min, salary_max, source_url, scraped_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            row.company_name,
            row.role_title,
            row.salary_min,
            row.salary_max,
            row.source_url,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn fetch_comp(conn: &Connection, limit: usize) -> Result<Vec<CompRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, company_name, role_title, COALESCE(salary_min, 0), COALESCE(salary_max, 0), currency,
                source_url, scraped_at
         FROM comp_data ORDER BY company_name, role_title LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok(CompRow {
                id: row.get(0)?,
                company_name: row.get(1)?,
                role_title: row.get(2)?,
                salary_min: row.get(3)?,
                salary_max: row.get(4)?,
                currency: row.get(5)?,
                source_url: row.get(6)?,
                scraped_at: row.get(7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Per-company view of stored ranges.
#[derive(Debug, Clone)]
pub struct CompanySummary {
    pub company: String,
    pub records: i64,
    pub avg_midpoint: f64,
    pub min: i64,
    pub max: i64,
}

pub fn market_summary(conn: &Connection) -> Result<Vec<CompanySummary>> {
    let mut stmt = conn.prepare(
        "SELECT company_name, COUNT(*),
                AVG((salary_min + salary_max) / 2.0), MIN(salary_min), MAX(salary_max)
         FROM comp_data
         GROUP BY company_name
         ORDER BY company_name",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CompanySummary {
                company: row.get(0)?,
                records: row.get(1)?,
                avg_midpoint: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                min: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                max: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub struct Stats {
    pub total: i64,
    pub companies: i64,
    pub roles: i64,
    pub last_scraped: Option<String>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let stats = conn.query_row(
        "SELECT COUNT(*), COUNT(DISTINCT company_name), COUNT(DISTINCT role_title), MAX(scraped_at)
         FROM comp_data",
        [],
        |row| {
            Ok(Stats {
                total: row.get(0)?,
                companies: row.get(1)?,
                roles: row.get(2)?,
                last_scraped: row.get(3)?,
            })
        },
    )?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn comp(company: &str, role: &str, min: i64, max: i64) -> NewComp {
        NewComp {
            company_name: company.into(),
            role_title: role.into(),
            salary_min: min,
            salary_max: max,
            source_url: format!("https://jobs.lever.co/{}/1", company.to_lowercase()),
        }
    }

    #[test]
    fn insert_and_find() {
        let conn = memory();
        assert_eq!(find_existing(&conn, "Acme", "SRE").unwrap(), None);

        insert_comp(&conn, &comp("Acme", "SRE", 150000, 200000)).unwrap();
        assert_eq!(find_existing(&conn, "Acme", "SRE").unwrap(), Some((150000, 200000)));
        assert_eq!(find_existing(&conn, "Acme", "Data Analyst").unwrap(), None);

        let rows = fetch_comp(&conn, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].currency, "USD");
        assert_eq!(rows[0].midpoint(), 175000);
        assert_eq!(rows[0].source_url.as_deref(), Some("https://jobs.lever.co/acme/1"));
        assert!(chrono::DateTime::parse_from_rfc3339(&rows[0].scraped_at).is_ok());
    }

    #[test]
    fn summary_groups_by_company() {
        let conn = memory();
        insert_comp(&conn, &comp("Acme", "SRE", 150000, 200000)).unwrap();
        insert_comp(&conn, &comp("Acme", "Analyst", 90000, 110000)).unwrap();
        insert_comp(&conn, &comp("Globex", "SRE", 120000, 140000)).unwrap();

        let summary = market_summary(&conn).unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].company, "Acme");
        assert_eq!(summary[0].records, 2);
        assert_eq!(summary[0].min, 90000);
        assert_eq!(summary[0].max, 200000);
        assert!((summary[0].avg_midpoint - 137500.0).abs() < f64::EPSILON);

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.companies, 2);
        assert_eq!(stats.roles, 2);
        assert!(stats.last_scraped.is_some());
    }
}
