pub mod anchor;
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod negotiate;
pub mod session;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use api::NegotiationStream;
use error::ApiError;
use models::{ChatMessage, Role, StreamEvent};

// ---------------------------------------------------------------------------
// Reconciler states
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Message,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No active request.
    Idle,
    /// Request sent, socket open, first bytes not yet classified.
    Awaiting,
    Streaming(StreamMode),
}

// ---------------------------------------------------------------------------
// View events (for live rendering)
// ---------------------------------------------------------------------------

/// Notification sent to the presentation layer as the stream is applied.
/// When no channel is attached the reconciler works silently.
#[derive(Debug, Clone)]
pub enum ViewEvent {
    /// The current agent reply grew by `text`.
    AgentDelta { text: String },
    /// A discrete agent message was appended (stream errors).
    AgentMessage { text: String },
    /// An edit phase began; the document panel should take focus.
    ShowDocument,
    /// The whole document was replaced with `text`.
    DocumentReplaced { text: String },
    TurnEnded { done: bool, edited: bool },
}

/// How one negotiation turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Whether a `done` event was observed. A turn that ends any other way
    /// is retryable.
    pub done: bool,
    /// Whether the document buffer was rewritten this turn.
    pub edited: bool,
}

// ---------------------------------------------------------------------------
// Reconciler — the negotiation stream state machine
// ---------------------------------------------------------------------------

/// Converts the newline-delimited event stream of one or more negotiation
/// turns into two independently updated artifacts: the chat transcript and
/// the document buffer.
///
/// Byte chunks may split lines (and multi-byte characters) at arbitrary
/// offsets; lines are reassembled from raw bytes before JSON parsing.
/// Malformed lines are skipped individually. Events are applied strictly in
/// arrival order.
pub struct Reconciler {
    state: StreamState,
    /// Full chat transcript, oldest first.
    pub transcript: Vec<ChatMessage>,
    /// Current document text. Replaced wholesale by each `edit_delta`;
    /// partial edits survive an aborted turn.
    pub document: String,
    edit_buffer: String,
    line_buffer: Vec<u8>,
    /// True once the current turn's agent reply exists; deltas coalesce into
    /// it until the turn ends.
    reply_open: bool,
    turn_edited: bool,
    malformed_lines: usize,
    cancel: CancellationToken,
    /// When set, view notifications are sent here instead of being dropped.
    pub view_tx: Option<mpsc::UnboundedSender<ViewEvent>>,
}

impl Reconciler {
    pub fn new(document: String) -> Reconciler {
        Reconciler {
            state: StreamState::Idle,
            transcript: Vec::new(),
            document,
            edit_buffer: String::new(),
            line_buffer: Vec::new(),
            reply_open: false,
            turn_edited: false,
            malformed_lines: 0,
            cancel: CancellationToken::new(),
            view_tx: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn malformed_lines(&self) -> usize {
        self.malformed_lines
    }

    /// Token the consuming view may trigger to abandon the stream. Once
    /// cancelled, no further state mutation occurs.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Install a fresh cancellation token. Call before reusing a reconciler
    /// whose previous turn was cancelled.
    pub fn reset_cancel(&mut self) {
        self.cancel = CancellationToken::new();
    }

    pub fn push_user_message(&mut self, text: impl Into<String>) {
        self.transcript.push(ChatMessage::user(text));
        self.reply_open = false;
    }

    /// Start a turn: the request is on the wire, first bytes not yet seen.
    pub fn begin_turn(&mut self) {
        self.state = StreamState::Awaiting;
        self.reply_open = false;
        self.turn_edited = false;
        self.edit_buffer.clear();
        self.line_buffer.clear();
    }

    // -----------------------------------------------------------------------
    // Byte-level feeding
    // -----------------------------------------------------------------------

    /// Feed one network read. Complete lines are parsed and applied; a
    /// trailing partial line stays buffered for the next read.
    pub fn feed_chunk(&mut self, bytes: &[u8]) {
        if self.cancel.is_cancelled() {
            return;
        }
        if matches!(self.state, StreamState::Idle | StreamState::Awaiting) {
            self.state = StreamState::Streaming(StreamMode::Message);
        }
        self.line_buffer.extend_from_slice(bytes);
        while let Some(pos) = self.line_buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.line_buffer.drain(..=pos).collect();
            self.apply_line(&line[..line.len() - 1]);
        }
    }

    /// Apply whatever is left in the line buffer (a final line the server
    /// sent without a trailing newline).
    pub fn flush_remainder(&mut self) {
        if self.cancel.is_cancelled() || self.line_buffer.is_empty() {
            return;
        }
        let line: Vec<u8> = std::mem::take(&mut self.line_buffer);
        self.apply_line(&line);
    }

    fn apply_line(&mut self, line: &[u8]) {
        let trimmed = trim_ascii(line);
        if trimmed.is_empty() {
            return;
        }
        match serde_json::from_slice::<StreamEvent>(trimmed) {
            Ok(event) => self.apply_event(event),
            Err(err) => {
                // one bad record must not abort the rest of the stream
                self.malformed_lines += 1;
                warn!(%err, "skipping malformed stream record");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Event application
    // -----------------------------------------------------------------------

    pub fn apply_event(&mut self, event: StreamEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        match event {
            StreamEvent::Strategy { content } => {
                debug!(content = content.as_deref().unwrap_or(""), "strategy event");
            }
            StreamEvent::TextDelta { content } => self.append_agent_delta(&content),
            StreamEvent::EditStart => {
                // reset + panel switch happen once per occurrence, even when
                // the event repeats
                self.edit_buffer.clear();
                self.state = StreamState::Streaming(StreamMode::Editing);
                self.emit(ViewEvent::ShowDocument);
            }
            StreamEvent::EditDelta { content } => {
                if self.state != StreamState::Streaming(StreamMode::Editing) {
                    warn!("edit_delta before edit_start; applying anyway");
                    self.state = StreamState::Streaming(StreamMode::Editing);
                }
                self.edit_buffer.push_str(&content);
                // the backend streams a complete regenerated document, so
                // every delta replaces the whole buffer, not a cursor region
                self.document = self.edit_buffer.clone();
                self.turn_edited = true;
                self.emit(ViewEvent::DocumentReplaced { text: self.document.clone() });
            }
            StreamEvent::Done => {
                let edited = self.turn_edited;
                self.state = StreamState::Idle;
                self.reply_open = false;
                self.emit(ViewEvent::TurnEnded { done: true, edited });
            }
        }
    }

    fn append_agent_delta(&mut self, content: &str) {
        let coalesce = self.reply_open
            && matches!(self.transcript.last(), Some(message) if message.role == Role::Agent);
        if coalesce {
            if let Some(last) = self.transcript.last_mut() {
                last.text.push_str(content);
            }
        } else {
            self.transcript.push(ChatMessage::agent(content));
            self.reply_open = true;
        }
        self.emit(ViewEvent::AgentDelta { text: content.to_string() });
    }

    /// Record a transport failure as a single inline agent message and
    /// return to idle. Partial edits already applied stay applied.
    pub fn fail_turn(&mut self, err: &ApiError) {
        let text = err.user_message();
        self.transcript.push(ChatMessage::agent(text.clone()));
        self.reply_open = false;
        self.state = StreamState::Idle;
        self.emit(ViewEvent::AgentMessage { text });
    }

    fn emit(&self, event: ViewEvent) {
        if let Some(tx) = &self.view_tx {
            let _ = tx.send(event);
        }
    }

    // -----------------------------------------------------------------------
    // Turn driver
    // -----------------------------------------------------------------------

    /// Drive one full turn from an open stream. Returns when a `done` event
    /// arrives, the stream ends, a transport error occurs, or the token is
    /// cancelled. Never returns an error: stream failures become inline
    /// agent messages per the error-handling contract.
    pub async fn run_turn(&mut self, stream: &mut NegotiationStream) -> TurnOutcome {
        self.begin_turn();
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.state = StreamState::Idle;
                    return TurnOutcome { done: false, edited: self.turn_edited };
                }
                chunk = stream.next_chunk() => match chunk {
                    Some(Ok(bytes)) => {
                        self.feed_chunk(&bytes);
                        if self.state == StreamState::Idle {
                            // done observed inside this chunk
                            return TurnOutcome { done: true, edited: self.turn_edited };
                        }
                    }
                    Some(Err(err)) => {
                        let edited = self.turn_edited;
                        self.fail_turn(&err);
                        self.emit(ViewEvent::TurnEnded { done: false, edited });
                        return TurnOutcome { done: false, edited };
                    }
                    None => {
                        self.flush_remainder();
                        let done = self.state == StreamState::Idle;
                        let edited = self.turn_edited;
                        if !done {
                            self.state = StreamState::Idle;
                            self.emit(ViewEvent::TurnEnded { done: false, edited });
                        }
                        return TurnOutcome { done, edited };
                    }
                }
            }
        }
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::TextDelta { content: text.to_string() }
    }

    fn edit(text: &str) -> StreamEvent {
        StreamEvent::EditDelta { content: text.to_string() }
    }

    fn make_reconciler() -> Reconciler {
        Reconciler::new("original document".to_string())
    }

    // -- coalescing ---------------------------------------------------------

    #[test]
    fn test_deltas_coalesce_into_one_message() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.apply_event(delta("Hel"));
        rec.apply_event(delta("lo"));
        assert_eq!(rec.transcript.len(), 1);
        assert_eq!(rec.transcript[0].text, "Hello");
        assert_eq!(rec.transcript[0].role, Role::Agent);
    }

    #[test]
    fn test_delta_after_user_message_starts_new_agent_message() {
        let mut rec = make_reconciler();
        rec.push_user_message("please fix clause 3");
        rec.begin_turn();
        rec.apply_event(delta("Sure"));
        assert_eq!(rec.transcript.len(), 2);
        assert_eq!(rec.transcript[1].role, Role::Agent);
        assert_eq!(rec.transcript[1].text, "Sure");
    }

    #[test]
    fn test_turn_boundary_breaks_coalescing() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.apply_event(delta("first turn"));
        rec.apply_event(StreamEvent::Done);
        rec.begin_turn();
        rec.apply_event(delta("second turn"));
        assert_eq!(rec.transcript.len(), 2);
        assert_eq!(rec.transcript[0].text, "first turn");
        assert_eq!(rec.transcript[1].text, "second turn");
    }

    // -- the canonical event sequence ---------------------------------------

    #[test]
    fn test_message_then_edit_sequence() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.apply_event(delta("A"));
        rec.apply_event(delta("B"));
        rec.apply_event(StreamEvent::EditStart);
        rec.apply_event(edit("X"));
        rec.apply_event(edit("Y"));
        rec.apply_event(StreamEvent::Done);

        assert_eq!(rec.transcript.last().expect("message").text, "AB");
        assert_eq!(rec.document, "XY");
        assert_eq!(rec.state(), StreamState::Idle);
    }

    #[test]
    fn test_message_only_turn_leaves_document_alone() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.apply_event(delta("no edits today"));
        rec.apply_event(StreamEvent::Done);
        assert_eq!(rec.document, "original document");
        assert_eq!(rec.state(), StreamState::Idle);
    }

    // -- edit semantics -----------------------------------------------------

    #[test]
    fn test_edit_start_switches_mode_and_clears_buffer() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.apply_event(StreamEvent::EditStart);
        assert_eq!(rec.state(), StreamState::Streaming(StreamMode::Editing));
        rec.apply_event(edit("abc"));
        assert_eq!(rec.document, "abc");
    }

    #[test]
    fn test_repeated_edit_start_resets_buffer_each_time() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.apply_event(StreamEvent::EditStart);
        rec.apply_event(edit("discarded draft"));
        rec.apply_event(StreamEvent::EditStart);
        rec.apply_event(edit("final"));
        assert_eq!(rec.document, "final");
    }

    #[test]
    fn test_edit_delta_replaces_whole_document_each_time() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.apply_event(StreamEvent::EditStart);
        rec.apply_event(edit("Section 1."));
        assert_eq!(rec.document, "Section 1.");
        rec.apply_event(edit(" Section 2."));
        assert_eq!(rec.document, "Section 1. Section 2.");
    }

    #[test]
    fn test_edit_delta_without_edit_start_still_applies() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.apply_event(edit("orphan content"));
        assert_eq!(rec.document, "orphan content");
        assert_eq!(rec.state(), StreamState::Streaming(StreamMode::Editing));
    }

    #[test]
    fn test_strategy_event_is_inert() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        let state_before = rec.state();
        rec.apply_event(StreamEvent::Strategy { content: Some("open strong".to_string()) });
        assert_eq!(rec.state(), state_before);
        assert!(rec.transcript.is_empty());
        assert_eq!(rec.document, "original document");
    }

    // -- line reassembly ----------------------------------------------------

    #[test]
    fn test_whole_lines_parse() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.feed_chunk(b"{\"type\":\"text_delta\",\"content\":\"Hel\"}\n{\"type\":\"text_delta\",\"content\":\"lo\"}\n");
        assert_eq!(rec.transcript[0].text, "Hello");
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.feed_chunk(b"{\"type\":\"text_del");
        rec.feed_chunk(b"ta\",\"content\":\"Hel\"}\n{\"type\":\"text_delta\",\"con");
        rec.feed_chunk(b"tent\":\"lo\"}\n");
        assert_eq!(rec.transcript.len(), 1);
        assert_eq!(rec.transcript[0].text, "Hello");
    }

    #[test]
    fn test_split_inside_multibyte_char() {
        let payload = "{\"type\":\"text_delta\",\"content\":\"\u{00a7} 7\"}\n".as_bytes();
        // split inside the two-byte section-sign character
        let split = payload.iter().position(|&b| b >= 0x80).expect("multibyte") + 1;
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.feed_chunk(&payload[..split]);
        rec.feed_chunk(&payload[split..]);
        assert_eq!(rec.transcript[0].text, "\u{00a7} 7");
    }

    #[test]
    fn test_final_line_without_newline_flushes() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.feed_chunk(b"{\"type\":\"text_delta\",\"content\":\"tail\"}");
        assert!(rec.transcript.is_empty());
        rec.flush_remainder();
        assert_eq!(rec.transcript[0].text, "tail");
    }

    #[test]
    fn test_malformed_line_skipped_stream_continues() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.feed_chunk(b"{\"type\":\"text_delta\",\"content\":\"A\"}\n");
        rec.feed_chunk(b"{totally broken\n");
        rec.feed_chunk(b"{\"type\":\"unknown_kind\"}\n");
        rec.feed_chunk(b"{\"type\":\"text_delta\",\"content\":\"B\"}\n");
        assert_eq!(rec.transcript[0].text, "AB");
        assert_eq!(rec.malformed_lines(), 2);
    }

    #[test]
    fn test_blank_lines_ignored() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.feed_chunk(b"\n  \n{\"type\":\"text_delta\",\"content\":\"x\"}\n\n");
        assert_eq!(rec.transcript.len(), 1);
        assert_eq!(rec.malformed_lines(), 0);
    }

    // -- state transitions --------------------------------------------------

    #[test]
    fn test_begin_turn_enters_awaiting() {
        let mut rec = make_reconciler();
        assert_eq!(rec.state(), StreamState::Idle);
        rec.begin_turn();
        assert_eq!(rec.state(), StreamState::Awaiting);
    }

    #[test]
    fn test_first_bytes_enter_message_mode() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.feed_chunk(b"{\"type\":\"strategy\"}\n");
        assert_eq!(rec.state(), StreamState::Streaming(StreamMode::Message));
    }

    #[test]
    fn test_done_returns_to_idle() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.feed_chunk(b"{\"type\":\"done\"}\n");
        assert_eq!(rec.state(), StreamState::Idle);
    }

    // -- failure handling ---------------------------------------------------

    #[test]
    fn test_fail_turn_appends_single_agent_error() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.apply_event(delta("partial reply"));
        rec.fail_turn(&ApiError::NetworkUnreachable("reset by peer".to_string()));
        assert_eq!(rec.transcript.len(), 2);
        assert_eq!(rec.transcript[1].role, Role::Agent);
        assert!(rec.transcript[1].text.contains("network connection"));
        assert_eq!(rec.state(), StreamState::Idle);
    }

    #[test]
    fn test_partial_edits_survive_failure() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.apply_event(StreamEvent::EditStart);
        rec.apply_event(edit("half-finished rewrite"));
        rec.fail_turn(&ApiError::Timeout(std::time::Duration::from_secs(60)));
        assert_eq!(rec.document, "half-finished rewrite");
    }

    #[test]
    fn test_delta_after_error_message_is_new_message() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.fail_turn(&ApiError::EmptyExtraction);
        rec.begin_turn();
        rec.apply_event(delta("fresh reply"));
        assert_eq!(rec.transcript.len(), 2);
        assert_eq!(rec.transcript[1].text, "fresh reply");
    }

    // -- cancellation -------------------------------------------------------

    #[test]
    fn test_cancelled_reconciler_ignores_chunks() {
        let mut rec = make_reconciler();
        rec.begin_turn();
        rec.feed_chunk(b"{\"type\":\"text_delta\",\"content\":\"kept\"}\n");
        rec.cancel_token().cancel();
        rec.feed_chunk(b"{\"type\":\"text_delta\",\"content\":\"dropped\"}\n");
        rec.flush_remainder();
        assert_eq!(rec.transcript.len(), 1);
        assert_eq!(rec.transcript[0].text, "kept");
    }

    #[test]
    fn test_reset_cancel_allows_new_turn() {
        let mut rec = make_reconciler();
        rec.cancel_token().cancel();
        rec.reset_cancel();
        rec.begin_turn();
        rec.feed_chunk(b"{\"type\":\"text_delta\",\"content\":\"after reset\"}\n");
        assert_eq!(rec.transcript[0].text, "after reset");
    }

    // -- view events --------------------------------------------------------

    fn drain(rx: &mut mpsc::UnboundedReceiver<ViewEvent>) -> Vec<ViewEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_edit_start_emits_show_document_once_per_occurrence() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rec = make_reconciler();
        rec.view_tx = Some(tx);
        rec.begin_turn();
        rec.apply_event(StreamEvent::EditStart);
        rec.apply_event(edit("x"));
        let events = drain(&mut rx);
        let shows = events
            .iter()
            .filter(|e| matches!(e, ViewEvent::ShowDocument))
            .count();
        assert_eq!(shows, 1);
    }

    #[test]
    fn test_document_replacement_events_carry_growing_buffer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rec = make_reconciler();
        rec.view_tx = Some(tx);
        rec.begin_turn();
        rec.apply_event(StreamEvent::EditStart);
        rec.apply_event(edit("a"));
        rec.apply_event(edit("b"));
        let replacements: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ViewEvent::DocumentReplaced { text } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(replacements, vec!["a".to_string(), "ab".to_string()]);
    }

    #[test]
    fn test_done_emits_turn_ended() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rec = make_reconciler();
        rec.view_tx = Some(tx);
        rec.begin_turn();
        rec.apply_event(delta("hi"));
        rec.apply_event(StreamEvent::Done);
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(ViewEvent::TurnEnded { done: true, edited: false })
        ));
    }

    // -- run_turn (async driver) --------------------------------------------

    #[tokio::test]
    async fn test_run_turn_full_sequence() {
        let mut rec = make_reconciler();
        let mut stream = NegotiationStream::from_chunks(vec![
            Ok(b"{\"type\":\"text_delta\",\"content\":\"A\"}\n{\"type\":\"text_delta\",\"content\":\"B\"}\n".to_vec()),
            Ok(b"{\"type\":\"edit_start\"}\n{\"type\":\"edit_delta\",\"content\":\"X\"}\n".to_vec()),
            Ok(b"{\"type\":\"edit_delta\",\"content\":\"Y\"}\n{\"type\":\"done\"}\n".to_vec()),
        ]);
        let outcome = rec.run_turn(&mut stream).await;
        assert!(outcome.done);
        assert!(outcome.edited);
        assert_eq!(rec.transcript.last().expect("message").text, "AB");
        assert_eq!(rec.document, "XY");
        assert_eq!(rec.state(), StreamState::Idle);
    }

    #[tokio::test]
    async fn test_run_turn_transport_error_becomes_inline_message() {
        let mut rec = make_reconciler();
        let mut stream = NegotiationStream::from_chunks(vec![
            Ok(b"{\"type\":\"text_delta\",\"content\":\"partial\"}\n".to_vec()),
            Err(ApiError::NetworkUnreachable("broken pipe".to_string())),
        ]);
        let outcome = rec.run_turn(&mut stream).await;
        assert!(!outcome.done);
        assert_eq!(rec.transcript.len(), 2);
        assert!(rec.transcript[1].text.contains("network connection"));
        assert_eq!(rec.state(), StreamState::Idle);
    }

    #[tokio::test]
    async fn test_run_turn_eof_without_done_is_not_done() {
        let mut rec = make_reconciler();
        let mut stream = NegotiationStream::from_chunks(vec![Ok(
            b"{\"type\":\"text_delta\",\"content\":\"cut off\"}\n".to_vec(),
        )]);
        let outcome = rec.run_turn(&mut stream).await;
        assert!(!outcome.done);
        assert_eq!(rec.state(), StreamState::Idle);
        assert_eq!(rec.transcript[0].text, "cut off");
    }

    #[tokio::test]
    async fn test_run_turn_trailing_line_without_newline() {
        let mut rec = make_reconciler();
        let mut stream = NegotiationStream::from_chunks(vec![
            Ok(b"{\"type\":\"text_delta\",\"content\":\"hi\"}\n".to_vec()),
            Ok(b"{\"type\":\"done\"}".to_vec()),
        ]);
        let outcome = rec.run_turn(&mut stream).await;
        assert!(outcome.done);
        assert_eq!(rec.state(), StreamState::Idle);
    }

    #[tokio::test]
    async fn test_run_turn_pre_cancelled_stops_immediately() {
        let mut rec = make_reconciler();
        rec.cancel_token().cancel();
        let mut stream = NegotiationStream::from_chunks(vec![Ok(
            b"{\"type\":\"text_delta\",\"content\":\"never applied\"}\n".to_vec(),
        )]);
        let outcome = rec.run_turn(&mut stream).await;
        assert!(!outcome.done);
        assert!(rec.transcript.is_empty());
    }
}
