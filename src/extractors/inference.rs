// src/extractors/inference.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::candidate::{DocumentType, FiscalPeriod};
use super::heuristics::{parse_date, parse_fiscal_period, YearWindow};
use crate::utils::error::InferenceError;

/// Fields an inference answer is asked to fill, and which of them must be present.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionSchema {
    pub fields: Vec<&'static str>,
    pub required: Vec<&'static str>,
    pub document_types: Vec<&'static str>,
}

impl ExtractionSchema {
    /// The report-candidate schema: `{title, url, date, type, year, quarter}`.
    pub fn report_candidates() -> Self {
        Self {
            fields: vec!["title", "url", "date", "type", "year", "quarter"],
            required: vec!["title", "url", "type"],
            document_types: DocumentType::TYPED.iter().map(|t| t.as_str()).collect(),
        }
    }
}

/// One structured answer item. Every field is untrusted until `validate` passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferredReport {
    pub title: Option<String>,
    pub url: Option<String>,
    pub date: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    pub year: Option<i32>,
    pub quarter: Option<u8>,
}

/// An inference answer that passed schema validation and normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInference {
    pub title: String,
    pub doc_type: DocumentType,
    pub fiscal_period: Option<FiscalPeriod>,
    pub published_at: Option<DateTime<Utc>>,
}

fn text_field(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn int_field(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().trim_start_matches(['q', 'Q']).parse().ok(),
        _ => None,
    })
}

impl InferredReport {
    /// Lenient read of one answer object; wrong-typed fields become `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            title: text_field(obj, &["title", "name"]),
            url: text_field(obj, &["url", "href", "link"]),
            date: text_field(obj, &["date", "published", "published_at", "publication_date"]),
            doc_type: text_field(obj, &["type", "category", "document_type"]),
            year: int_field(obj, &["year", "fiscal_year"]).and_then(|y| i32::try_from(y).ok()),
            quarter: int_field(obj, &["quarter", "fiscal_quarter"]).and_then(|q| u8::try_from(q).ok()),
        })
    }

    /// Checks the required fields and normalizes the rest. Returns the names of
    /// the missing or unusable required fields on failure.
    pub fn validate(&self, schema: &ExtractionSchema, years: YearWindow) -> Result<ValidatedInference, Vec<&'static str>> {
        let doc_type = self
            .doc_type
            .as_deref()
            .map(DocumentType::coerce)
            .filter(|t| *t != DocumentType::Unknown);

        let missing: Vec<&'static str> = schema
            .required
            .iter()
            .copied()
            .filter(|field| match *field {
                "title" => self.title.is_none(),
                "url" => self.url.is_none(),
                "type" => doc_type.is_none(),
                "date" => self.date.as_deref().and_then(|d| parse_date(d, years)).is_none(),
                _ => false,
            })
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }

        let fiscal_period = match (self.year, self.quarter) {
            (Some(year), Some(quarter)) => parse_fiscal_period(&format!("Q{quarter} {year}"), years),
            _ => None,
        }
        .or_else(|| self.title.as_deref().and_then(|t| parse_fiscal_period(t, years)));

        Ok(ValidatedInference {
            title: self.title.clone().unwrap_or_default(),
            doc_type: doc_type.unwrap_or(DocumentType::Unknown),
            fiscal_period,
            published_at: self.date.as_deref().and_then(|d| parse_date(d, years)),
        })
    }
}

/// Reads a model answer: a JSON array, or an object holding one under `reports`,
/// possibly wrapped in a Markdown code fence.
pub fn parse_answer(raw: &str) -> Result<Vec<InferredReport>, InferenceError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_str(body).map_err(|e| InferenceError::MalformedAnswer(e.to_string()))?;
    let items = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => match obj.get("reports").or_else(|| obj.get("documents")) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Err(InferenceError::MalformedAnswer("object without a reports array".into())),
        },
        _ => return Err(InferenceError::MalformedAnswer("answer is neither an array nor an object".into())),
    };
    Ok(items.iter().filter_map(InferredReport::from_value).collect())
}

/// The structured-inference capability: document text in, candidate fields out.
/// An empty list means the model could not produce a conforming answer.
#[async_trait]
pub trait InferenceCapability: Send + Sync {
    async fn infer(&self, document_text: &str, schema: &ExtractionSchema) -> Result<Vec<InferredReport>, InferenceError>;
}

/// Inference over an OpenAI-compatible chat-completions endpoint.
pub struct HttpInference {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpInference {
    pub fn new(endpoint: String, model: String, api_key: Option<String>) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;
        Ok(Self { client, endpoint, model, api_key })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn prompt(document_text: &str, schema: &ExtractionSchema) -> String {
        format!(
            "The lines below are links found on a company's investor-relations pages, one per line as \
             `title | url | surrounding text`. For each link that is a quarterly earnings document, return an \
             object with the fields {fields}. `type` must be one of {types}. `date` is the publication date as \
             YYYY-MM-DD when it is stated. Use the url exactly as given. Do not invent links. Answer with a JSON \
             object {{\"reports\": [...]}} and nothing else; return an empty list if no link qualifies.\n\n{text}",
            fields = schema.fields.join(", "),
            types = schema.document_types.join(", "),
            text = document_text,
        )
    }
}

#[async_trait]
impl InferenceCapability for HttpInference {
    async fn infer(&self, document_text: &str, schema: &ExtractionSchema) -> Result<Vec<InferredReport>, InferenceError> {
        let request = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": "You extract structured data about financial reports and answer with JSON only."},
                {"role": "user", "content": Self::prompt(document_text, schema)},
            ],
        });

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        tracing::debug!("Sending {} characters to inference model {}", document_text.len(), self.model);
        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(InferenceError::Http(response.status()));
        }

        let body: Value = response.json().await?;
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| InferenceError::MalformedAnswer("missing choices[0].message.content".into()))?;
        parse_answer(content)
    }
}
