use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel the backend uses for a flag with no verbatim source excerpt.
pub const ANCHOR_NONE: &str = "N/A";

/// Maximum clause title length, in chars, before truncation.
const TITLE_MAX_CHARS: usize = 80;

// ---------------------------------------------------------------------------
// Analysis payload (wire shape: camelCase, tolerant of missing lists)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Red,
    Yellow,
    Green,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Red => write!(f, "red"),
            Severity::Yellow => write!(f, "yellow"),
            Severity::Green => write!(f, "green"),
        }
    }
}

/// One backend-identified risk or strength.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
    pub analysis_text: String,
    /// Verbatim contract excerpt, or the `"N/A"` sentinel.
    #[serde(default = "default_anchor")]
    pub original_text: String,
}

fn default_anchor() -> String {
    ANCHOR_NONE.to_string()
}

/// Full analysis report. Immutable once produced; re-analysis replaces it
/// wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(default)]
    pub contract_type: String,
    #[serde(default)]
    pub key_details: Vec<String>,
    #[serde(default)]
    pub red_flags: Vec<Flag>,
    #[serde(default)]
    pub yellow_flags: Vec<Flag>,
    #[serde(default)]
    pub green_flags: Vec<Flag>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub health_score: f64,
}

/// True when `text` is a usable anchor excerpt rather than the sentinel.
pub fn usable_anchor(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case(ANCHOR_NONE)
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// The loaded contract. `cleaned_text` is authoritative after ingestion and
/// is rewritten in place by completed negotiation turns.
#[derive(Debug, Clone)]
pub struct Contract {
    pub id: String,
    pub raw_text: String,
    pub cleaned_text: String,
    pub jurisdiction: String,
}

impl Contract {
    /// Ingest raw text: assign an id and run the single normalization pass.
    pub fn ingest(raw: &str, jurisdiction: &str) -> Contract {
        Contract {
            id: Uuid::new_v4().to_string(),
            raw_text: raw.to_string(),
            cleaned_text: normalize_text(raw),
            jurisdiction: jurisdiction.to_string(),
        }
    }
}

/// Single normalization pass applied at ingestion: unify line endings, strip
/// trailing whitespace per line, collapse runs of blank lines to one, trim
/// the ends.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    for line in unified.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

// ---------------------------------------------------------------------------
// Clause — the negotiable unit derived from non-green flags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
    Medium,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Medium => write!(f, "medium"),
        }
    }
}

/// A client-side negotiable unit anchored to document text.
///
/// Identity is `"{severity}-{index}"`, frozen at derivation; removing
/// earlier clauses never renumbers later ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clause {
    pub id: String,
    pub title: String,
    pub body: String,
    pub anchor_text: String,
    pub risk_level: RiskLevel,
}

impl Clause {
    /// Derive the full clause list from an analysis: one clause per
    /// red/yellow flag, in flag order, reds first.
    pub fn derive_all(analysis: &AnalysisResult) -> Vec<Clause> {
        let mut clauses = Vec::with_capacity(
            analysis.red_flags.len() + analysis.yellow_flags.len(),
        );
        for (index, flag) in analysis.red_flags.iter().enumerate() {
            clauses.push(Clause::from_flag(Severity::Red, index, flag));
        }
        for (index, flag) in analysis.yellow_flags.iter().enumerate() {
            clauses.push(Clause::from_flag(Severity::Yellow, index, flag));
        }
        clauses
    }

    fn from_flag(severity: Severity, index: usize, flag: &Flag) -> Clause {
        let body = if usable_anchor(&flag.original_text) {
            flag.original_text.clone()
        } else {
            flag.analysis_text.clone()
        };
        Clause {
            id: format!("{severity}-{index}"),
            title: truncate_title(&flag.analysis_text),
            body,
            anchor_text: flag.original_text.clone(),
            risk_level: match severity {
                Severity::Red => RiskLevel::High,
                _ => RiskLevel::Medium,
            },
        }
    }
}

fn truncate_title(text: &str) -> String {
    if text.chars().count() <= TITLE_MAX_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(TITLE_MAX_CHARS - 3).collect();
    format!("{}...", head.trim_end())
}

// ---------------------------------------------------------------------------
// Chat transcript
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Agent => write!(f, "agent"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> ChatMessage {
        ChatMessage { role: Role::User, text: text.into() }
    }

    pub fn agent(text: impl Into<String>) -> ChatMessage {
        ChatMessage { role: Role::Agent, text: text.into() }
    }
}

// ---------------------------------------------------------------------------
// Request bodies (wire shape: snake_case per endpoint contract)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ExplainRequest {
    pub risk_text: String,
    pub contract_context: String,
}

#[derive(Debug, Deserialize)]
pub struct ExplainResponse {
    pub explanation: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtractResponse {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

impl From<&ChatMessage> for HistoryEntry {
    fn from(message: &ChatMessage) -> Self {
        HistoryEntry {
            role: message.role.to_string(),
            content: message.text.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NegotiateRequest {
    pub message: String,
    pub contract_context: String,
    pub jurisdiction: String,
    pub analysis_context: String,
    pub selected_clause: String,
    pub history: Vec<HistoryEntry>,
}

// ---------------------------------------------------------------------------
// Negotiation stream records
// ---------------------------------------------------------------------------

/// One newline-delimited record on the negotiation stream.
///
/// Unknown `type` tags fail to parse and are skipped by the reconciler like
/// any other malformed line.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Informational; carries no state transition.
    Strategy {
        #[serde(default)]
        content: Option<String>,
    },
    TextDelta {
        #[serde(default)]
        content: String,
    },
    EditStart,
    EditDelta {
        #[serde(default)]
        content: String,
    },
    Done,
}
