//! Negotiation batch orchestration.
//!
//! Builds the negotiation request from session state, drives the stream
//! through the reconciler, and applies the turn's consequences: completed
//! clauses leave the live list and the selection set, and an edited document
//! is written back to the store.

use std::collections::HashSet;

use tracing::info;

use crate::api::ApiClient;
use crate::error::ApiError;
use crate::models::{Clause, HistoryEntry, NegotiateRequest};
use crate::session::SessionStore;
use crate::{Reconciler, TurnOutcome};

/// Instruction used when the caller supplies none.
pub const DEFAULT_INSTRUCTION: &str =
    "Negotiate the selected clauses toward fairer terms.";

// ---------------------------------------------------------------------------
// Selection set
// ---------------------------------------------------------------------------

/// The clause ids currently chosen for negotiation, with announcement
/// memory.
///
/// Selecting a clause announces it at most once while the set stays
/// non-empty; deselect-then-reselect does not repeat the announcement. A
/// full deselect clears the memory, so announcing again afterwards is
/// allowed.
#[derive(Debug, Default)]
pub struct SelectionSet {
    selected: Vec<String>,
    announced: HashSet<String>,
}

impl SelectionSet {
    pub fn new() -> SelectionSet {
        SelectionSet::default()
    }

    pub fn ids(&self) -> &[String] {
        &self.selected
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.selected.iter().any(|selected| selected == id)
    }

    /// Add a clause. Returns the announcement to append to the transcript,
    /// or `None` when the clause was already selected or already announced.
    pub fn select(&mut self, clause: &Clause) -> Option<String> {
        if self.contains(&clause.id) {
            return None;
        }
        self.selected.push(clause.id.clone());
        if self.announced.insert(clause.id.clone()) {
            Some(format!("Selected: {}", clause.title))
        } else {
            None
        }
    }

    pub fn deselect(&mut self, id: &str) {
        self.selected.retain(|selected| selected != id);
        if self.selected.is_empty() {
            self.announced.clear();
        }
    }

    pub fn clear(&mut self) {
        self.selected.clear();
        self.announced.clear();
    }

    /// Drop ids that no longer name a live clause.
    pub fn prune(&mut self, live: &[Clause]) {
        self.selected
            .retain(|id| live.iter().any(|clause| &clause.id == id));
        if self.selected.is_empty() {
            self.announced.clear();
        }
    }
}

// ---------------------------------------------------------------------------
// Request construction
// ---------------------------------------------------------------------------

/// Build one negotiation request for the targeted clauses.
///
/// `selected_clause` is the double-newline join of the clause bodies;
/// `history` is the transcript as it stood before this turn's user message.
/// Unknown clause ids are rejected before any network traffic.
pub fn build_request(
    session: &SessionStore,
    history: &[crate::models::ChatMessage],
    clause_ids: &[String],
    instruction: Option<&str>,
) -> Result<NegotiateRequest, ApiError> {
    let contract = session
        .contract()
        .ok_or_else(|| ApiError::InvalidInput("no contract loaded".to_string()))?;
    let analysis = session
        .analysis()
        .ok_or_else(|| ApiError::InvalidInput("no analysis available".to_string()))?;
    if clause_ids.is_empty() {
        return Err(ApiError::InvalidInput("no clauses selected".to_string()));
    }
    let mut bodies = Vec::with_capacity(clause_ids.len());
    for id in clause_ids {
        let clause = session
            .clause(id)
            .ok_or_else(|| ApiError::InvalidInput(format!("unknown clause id: {id}")))?;
        bodies.push(clause.body.clone());
    }
    let analysis_context = serde_json::to_string(analysis)
        .map_err(|err| ApiError::MalformedResponse(err.to_string()))?;
    Ok(NegotiateRequest {
        message: instruction.unwrap_or(DEFAULT_INSTRUCTION).to_string(),
        contract_context: contract.cleaned_text.clone(),
        jurisdiction: session.jurisdiction().to_string(),
        analysis_context,
        selected_clause: bodies.join("\n\n"),
        history: history.iter().map(HistoryEntry::from).collect(),
    })
}

// ---------------------------------------------------------------------------
// Turn drivers
// ---------------------------------------------------------------------------

/// Negotiate a batch of clauses in one turn.
///
/// On a completed turn (`done` observed) the targeted clauses are removed
/// from the live list and the selection set, and an edited document is
/// written back to the session. A turn that errors before `done` leaves the
/// clause list untouched so the caller can retry. Stream failures after the
/// stream opened are reported inline on the transcript, not as an `Err`.
pub async fn negotiate_many(
    client: &ApiClient,
    session: &mut SessionStore,
    selection: &mut SelectionSet,
    reconciler: &mut Reconciler,
    clause_ids: &[String],
    instruction: Option<&str>,
) -> Result<TurnOutcome, ApiError> {
    let request = build_request(session, &reconciler.transcript, clause_ids, instruction)?;
    reconciler.push_user_message(request.message.clone());
    let mut stream = match client.open_negotiation_stream(&request).await {
        Ok(stream) => stream,
        Err(err) => {
            // mid-conversation failures surface inline, then bubble up
            reconciler.fail_turn(&err);
            return Err(err);
        }
    };
    let outcome = reconciler.run_turn(&mut stream).await;
    apply_outcome(session, selection, reconciler, clause_ids, outcome);
    Ok(outcome)
}

/// Apply a finished turn's consequences to the session.
///
/// Only a turn that reached `done` removes clauses; anything else leaves the
/// list untouched so the same batch can be retried.
pub fn apply_outcome(
    session: &mut SessionStore,
    selection: &mut SelectionSet,
    reconciler: &Reconciler,
    clause_ids: &[String],
    outcome: TurnOutcome,
) {
    if !outcome.done {
        return;
    }
    for id in clause_ids {
        session.remove_clause(id);
        selection.deselect(id);
    }
    if outcome.edited {
        let _ = session.update_contract_text(reconciler.document.clone());
    }
    info!(clauses = clause_ids.len(), edited = outcome.edited, "negotiation turn complete");
}

/// Negotiate a single clause.
pub async fn negotiate_one(
    client: &ApiClient,
    session: &mut SessionStore,
    selection: &mut SelectionSet,
    reconciler: &mut Reconciler,
    clause_id: &str,
    instruction: Option<&str>,
) -> Result<TurnOutcome, ApiError> {
    let ids = vec![clause_id.to_string()];
    negotiate_many(client, session, selection, reconciler, &ids, instruction).await
}
