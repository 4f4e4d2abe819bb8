use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::llm::ChatModel;
use crate::truncate_chars;

const TITLE_EXCERPT_CHARS: usize = 2000;
const MAX_TITLE_CHARS: usize = 200;

const RECORD_PROMPT: &str = r#"
Extract Base Salary Range, Job Title, and Company Name.
Ignore equity/benefits. Convert "150k" to 150000.
If no salary found, return 0.

Return JSON only, exactly this shape:
{
    "job_title": "String",
    "company": "String",
    "min": Number,
    "max": Number
}

Text: {text}
"#;

const TITLE_PROMPT: &str = r#"
Extract ONLY the job title from this job posting page content.
Return just the job title as a plain string, nothing else.

Content (first 2000 chars):
{content}

Job title:"#;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").unwrap());
static TITLE_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(job title:|title:|the job title is:)\s*").unwrap()
});

/// Salary, title and company pulled from one posting. All four fields are always set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub job_title: String,
    pub company: String,
    pub min: i64,
    pub max: i64,
}

/// Fields recovered from a model reply; `None` marks absent or wrong-typed values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialRecord {
    pub job_title: Option<String>,
    pub company: Option<String>,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl PartialRecord {
    fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.job_title.is_none() {
            missing.push("job_title");
        }
        if self.company.is_none() {
            missing.push("company");
        }
        if self.min.is_none() {
            missing.push("min");
        }
        if self.max.is_none() {
            missing.push("max");
        }
        missing
    }

    fn into_record(self) -> JobRecord {
        JobRecord {
            job_title: self.job_title.unwrap_or_default(),
            company: self.company.unwrap_or_default(),
            min: self.min.unwrap_or(0),
            max: self.max.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordParse {
    Complete(JobRecord),
    Malformed {
        partial: PartialRecord,
        missing: Vec<&'static str>,
    },
}

impl RecordParse {
    /// Collapse to a record, filling `""` / `0` for anything missing.
    pub fn into_record(self) -> JobRecord {
        match self {
            RecordParse::Complete(record) => record,
            RecordParse::Malformed { partial, .. } => partial.into_record(),
        }
    }

    fn unusable() -> Self {
        let partial = PartialRecord::default();
        let missing = partial.missing();
        RecordParse::Malformed { partial, missing }
    }
}

/// Validate a model reply against the four-key record shape.
pub fn parse_record(reply: &str) -> RecordParse {
    let body = match FENCE_RE.captures(reply) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => reply.trim(),
    };

    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            warn!("Model reply is not JSON: {}", e);
            return RecordParse::unusable();
        }
    };

    let Some(obj) = value.as_object() else {
        warn!("Model reply is JSON but not an object");
        return RecordParse::unusable();
    };

    let partial = PartialRecord {
        job_title: text_field(obj, "job_title"),
        company: text_field(obj, "company"),
        min: amount_field(obj, "min"),
        max: amount_field(obj, "max"),
    };

    let missing = partial.missing();
    if missing.is_empty() {
        RecordParse::Complete(partial.into_record())
    } else {
        RecordParse::Malformed { partial, missing }
    }
}

fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)?.as_str().map(|s| s.trim().to_string())
}

fn amount_field(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    match obj.get(key)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

/// Read "$150,000", "150000" or "150k" as a whole number.
pub fn parse_amount(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(*c, '$' | ',' | ' ' | '_'))
        .collect::<String>()
        .to_ascii_lowercase();

    let (digits, scale) = match cleaned.strip_suffix('k') {
        Some(d) => (d, 1000.0),
        None => (cleaned.as_str(), 1.0),
    };

    let n: f64 = digits.parse().ok()?;
    n.is_finite().then(|| (n * scale).round() as i64)
}

/// Ask the model for title, company and base salary range of a posting.
///
/// Never fails: a missing model, a failed call, or an unusable reply all
/// produce a record with empty names and zero salary.
pub async fn parse_job_description<M: ChatModel>(model: Option<&M>, text: &str) -> JobRecord {
    let Some(model) = model else {
        error!("Salary extraction skipped: OPENAI_API_KEY not configured");
        return JobRecord::default();
    };

    let prompt = RECORD_PROMPT.replace("{text}", text);
    let reply = match model.complete(&prompt).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("Salary extraction failed [{}]: {}", e.kind(), e);
            return JobRecord::default();
        }
    };

    let parsed = parse_record(&reply);
    if let RecordParse::Malformed { missing, .. } = &parsed {
        warn!("Model reply missing fields {:?}; filling defaults", missing);
        debug!("Reply received: {}", truncate_chars(&reply, 200));
    }
    parsed.into_record()
}

/// Cheap title-only extraction used while scanning candidate links.
pub async fn extract_job_title<M: ChatModel>(model: &M, content: &str) -> Option<String> {
    let prompt = TITLE_PROMPT.replace("{content}", truncate_chars(content, TITLE_EXCERPT_CHARS));

    match model.complete(&prompt).await {
        Ok(reply) => clean_title(&reply),
        Err(e) => {
            warn!("Title extraction failed [{}]: {}", e.kind(), e);
            None
        }
    }
}

fn clean_title(reply: &str) -> Option<String> {
    let title = reply.trim().trim_matches('"').trim_matches('\'');
    let title = TITLE_PREFIX_RE.replace(title, "");
    let title = truncate_chars(title.trim(), MAX_TITLE_CHARS);
    (!title.is_empty()).then(|| title.to_string())
}
