use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::models::{AnalysisResult, Clause, Contract};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no contract loaded")]
    NoContract,
    #[error("session io: {0}")]
    Io(#[from] std::io::Error),
    #[error("session encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The serialized session shape: contract id + text, the analysis, the live
/// clause list, and the jurisdiction. File binaries (e.g. the uploaded docx)
/// are never serialized and must be re-acquired after a reload.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionSnapshot {
    contract_id: Option<String>,
    contract_content: Option<String>,
    analysis_result: Option<AnalysisResult>,
    flags: Vec<Clause>,
    jurisdiction: String,
}

/// Session state store.
///
/// One explicitly-scoped record holding the loaded contract, its analysis,
/// and the derived clause list; persisted as JSON so state survives across
/// invocations. Setters keep derived fields in step: analysis and clause
/// list always change together, and neither exists without a contract.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    contract: Option<Contract>,
    analysis: Option<AnalysisResult>,
    clauses: Vec<Clause>,
    jurisdiction: String,
}

pub const DEFAULT_JURISDICTION: &str = "US";

impl SessionStore {
    /// Load the session at `path`, or start fresh when the file is absent.
    /// A corrupt file is logged and discarded rather than blocking the user.
    pub fn load(path: &Path) -> SessionStore {
        let snapshot = match fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<SessionSnapshot>(&raw) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(path = %path.display(), %err, "corrupt session file, starting fresh");
                    SessionSnapshot::default()
                }
            },
            Err(_) => SessionSnapshot::default(),
        };
        SessionStore::from_snapshot(path.to_path_buf(), snapshot)
    }

    fn from_snapshot(path: PathBuf, snapshot: SessionSnapshot) -> SessionStore {
        let jurisdiction = if snapshot.jurisdiction.is_empty() {
            DEFAULT_JURISDICTION.to_string()
        } else {
            snapshot.jurisdiction
        };
        let contract = match (snapshot.contract_id, snapshot.contract_content) {
            (Some(id), Some(content)) => Some(Contract {
                id,
                // the normalization pass already ran at ingestion; the
                // persisted content is the authoritative cleaned text
                raw_text: content.clone(),
                cleaned_text: content,
                jurisdiction: jurisdiction.clone(),
            }),
            _ => None,
        };
        // analysis without a contract would violate the pairing invariant
        let (analysis, clauses) = if contract.is_some() {
            (snapshot.analysis_result, snapshot.flags)
        } else {
            if snapshot.analysis_result.is_some() {
                warn!("dropping orphaned analysis from session file");
            }
            (None, Vec::new())
        };
        SessionStore { path, contract, analysis, clauses, jurisdiction }
    }

    /// Persist the current state. Written atomically (temp file + rename) so
    /// a crash mid-write cannot corrupt the session.
    pub fn save(&self) -> Result<(), SessionError> {
        let snapshot = SessionSnapshot {
            contract_id: self.contract.as_ref().map(|c| c.id.clone()),
            contract_content: self.contract.as_ref().map(|c| c.cleaned_text.clone()),
            analysis_result: self.analysis.clone(),
            flags: self.clauses.clone(),
            jurisdiction: self.jurisdiction.clone(),
        };
        let encoded = serde_json::to_string_pretty(&snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    // -- setters ------------------------------------------------------------

    /// Replace the loaded contract. Any previous analysis belongs to the
    /// previous contract and is cleared in the same step.
    pub fn set_contract(&mut self, contract: Contract) {
        self.jurisdiction = contract.jurisdiction.clone();
        self.contract = Some(contract);
        self.analysis = None;
        self.clauses.clear();
    }

    /// Replace the analysis wholesale and derive the clause list in the same
    /// call. Requires a loaded contract.
    pub fn set_analysis(&mut self, analysis: AnalysisResult) -> Result<(), SessionError> {
        if self.contract.is_none() {
            return Err(SessionError::NoContract);
        }
        self.clauses = Clause::derive_all(&analysis);
        self.analysis = Some(analysis);
        Ok(())
    }

    pub fn set_jurisdiction(&mut self, jurisdiction: &str) {
        self.jurisdiction = jurisdiction.to_string();
        if let Some(contract) = &mut self.contract {
            contract.jurisdiction = jurisdiction.to_string();
        }
    }

    /// Remove one clause from the live list. Returns whether it was present.
    pub fn remove_clause(&mut self, id: &str) -> bool {
        let before = self.clauses.len();
        self.clauses.retain(|clause| clause.id != id);
        self.clauses.len() != before
    }

    /// Overwrite the contract body with negotiated text.
    pub fn update_contract_text(&mut self, text: String) -> Result<(), SessionError> {
        let contract = self.contract.as_mut().ok_or(SessionError::NoContract)?;
        contract.cleaned_text = text;
        Ok(())
    }

    /// Clear everything back to a fresh session.
    pub fn reset(&mut self) {
        self.contract = None;
        self.analysis = None;
        self.clauses.clear();
        self.jurisdiction = DEFAULT_JURISDICTION.to_string();
    }

    // -- accessors ----------------------------------------------------------

    pub fn contract(&self) -> Option<&Contract> {
        self.contract.as_ref()
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        self.analysis.as_ref()
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn clause(&self, id: &str) -> Option<&Clause> {
        self.clauses.iter().find(|clause| clause.id == id)
    }

    pub fn jurisdiction(&self) -> &str {
        &self.jurisdiction
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
