//! The session state machine and streaming turn loop (spec §4.5,
//! component C6). One [`SessionEngine`] instance is spawned as its own
//! task per live session (spec §5); all external mutation arrives as a
//! [`recall_protocol::ClientFrame`] on its inbound channel, never as a
//! direct call into its state from another task.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use recall_core::{
    blocks_new_session, complete_with_timeout, stream_with_timeout, ChatConfig, ChatMessage,
    Clock, EngineError, IdGenerator, LlmClient, LlmError, LlmErrorKind, MessageId,
    MessageRepository, MessageRole, MetricsRepository, OutcomeId, OutcomeRepository,
    RabbitholeEvent, RabbitholeId, RabbitholeRepository, RecallAttempt, RecallOutcome,
    RecallPointId, RecallPointRepository, RecallSet, RecallSetId, RecallSetRepository,
    RecallSetStatus, Role, Session, SessionId, SessionMessage, SessionMetrics,
    SessionRepository, SessionStatus, StreamEvent,
};
use recall_evaluator::{evaluate, EvaluateInput, EvaluatorSettings};
use recall_protocol::{ClientFrame, Correction as WireCorrection, ServerFrame, SourceKind};
use recall_rabbithole::{detect_enter, detect_return, DetectorSettings, RabbitholeAgent, RabbitholeClientFactory};
use recall_transcription::{process as transcribe, SourceKind as TranscriptionSourceKind, TranscriptionConfig};

use crate::checklist::Checklist;
use crate::collaborators::SessionCollaborators;

const TUTOR_MODEL: &str = "tutor-default";
const TRANSCRIPTION_MODEL: &str = "transcription-default";
/// Capacity of the per-session inbound queue. A second `user_message` that
/// arrives before the first is drained is rejected as busy at the channel
/// boundary rather than queued (spec §4.5 step 1, §8 boundary behavior).
const INBOUND_QUEUE_CAPACITY: usize = 1;

pub enum SubmitOutcome {
    Accepted,
    Busy,
}

/// A handle to a spawned session task. The only way callers — the
/// transport layer — can mutate a running session.
#[derive(Clone)]
pub struct SessionHandle {
    inbound: mpsc::Sender<ClientFrame>,
}

impl SessionHandle {
    pub fn submit(&self, frame: ClientFrame) -> SubmitOutcome {
        match self.inbound.try_send(frame) {
            Ok(()) => SubmitOutcome::Accepted,
            Err(_) => SubmitOutcome::Busy,
        }
    }
}

struct RabbitholeSlot {
    agent: RabbitholeAgent,
    trigger_message_index: u32,
    /// `point_recalled`/`all_points_recalled` frames produced while this
    /// tangent is open, released in order on return (spec §4.5 "Buffered
    /// ticks during rabbithole").
    buffered_ticks: Vec<ServerFrame>,
}

/// Owns every piece of mutable state for one live session. Never
/// constructed directly by callers outside this crate — use [`start`].
pub struct SessionEngine {
    collab: SessionCollaborators,
    outbound: mpsc::Sender<ServerFrame>,
    recall_set: RecallSet,
    session: Session,
    checklist: Checklist,
    /// The main, index-addressable transcript. Messages exchanged inside
    /// an open rabbithole never appear here (spec §8 invariant 5) — only
    /// the trigger and return markers do.
    transcript: Vec<SessionMessage>,
    next_message_index: u32,
    all_points_recalled_emitted: bool,
    tutor: Box<dyn LlmClient>,
    evaluator_client: Box<dyn LlmClient>,
    detector_client: Box<dyn LlmClient>,
    transcription_client: Box<dyn LlmClient>,
    transcription_config: TranscriptionConfig,
    evaluator_settings: EvaluatorSettings,
    detector_settings: DetectorSettings,
    rabbithole: Option<RabbitholeSlot>,
    /// Bound on every direct tutor/rabbithole-agent LLM call (spec §6.2
    /// `LlmConfig.timeout_seconds`). The evaluator/detector/transcription
    /// settings carry their own copy of this value.
    llm_timeout: Duration,
}

/// Run session start (spec §4.5 "Starting") and spawn the turn-loop task.
///
/// Returns as soon as `session_started` has been emitted; the returned
/// handle is the only way to drive the session forward from here.
pub async fn start(
    hello: ClientFrame,
    collab: SessionCollaborators,
    outbound: mpsc::Sender<ServerFrame>,
) -> Result<SessionHandle, EngineError> {
    let ClientFrame::Hello { session_id: hello_id, resume_from_index } = hello else {
        return Err(EngineError::InvalidRequest("first frame must be hello".to_string()));
    };

    let (recall_set, session, mut checklist, transcript) = load_or_create_session(&collab, &hello_id).await?;

    let llm_timeout = Duration::from_secs(collab.config.llm.timeout_seconds);

    let tutor_prompt = crate::prompt::build_tutor_system_prompt(&recall_set.discussion_system_prompt, &checklist);
    let tutor = collab.client_factory.build(tutor_prompt);
    let evaluator_client = collab.client_factory.build(
        "You grade whether a student's latest turn demonstrates a known fact from a checklist.".to_string(),
    );
    let detector_client = collab.client_factory.build(
        "You detect conversational tangents away from a study topic, and returns back to it.".to_string(),
    );
    let transcription_client =
        collab.client_factory.build("You clean up transcribed study-conversation text.".to_string());

    let point_texts: Vec<(String, String)> =
        checklist.entries().into_iter().map(|e| (e.content, e.context)).collect();
    let terminology = recall_transcription::extract_terminology(
        transcription_client.as_ref(),
        &point_texts,
        TRANSCRIPTION_MODEL,
        llm_timeout,
    )
    .await;
    let transcription_config = TranscriptionConfig {
        recall_set_terminology: terminology,
        enable_notation_detection: true,
        request_timeout: llm_timeout,
    };

    let evaluator_settings = EvaluatorSettings {
        confidence_threshold: collab.config.session.evaluator_confidence_threshold,
        request_timeout: llm_timeout,
        ..EvaluatorSettings::default()
    };
    let detector_settings = DetectorSettings {
        enter_threshold: collab.config.session.rabbithole_enter_threshold,
        return_threshold: collab.config.session.rabbithole_return_threshold,
        request_timeout: llm_timeout,
        ..DetectorSettings::default()
    };

    let mut transcript = transcript;
    let opening_index = if transcript.is_empty() {
        let now = collab.clock.now();
        let cfg = ChatConfig::new(TUTOR_MODEL.to_string(), 1024, 0.7);
        let opening_prompt = vec![ChatMessage::user(
            "Begin the session: greet the student and introduce the first checklist topic.".to_string(),
        )];
        let opening = complete_with_timeout(tutor.as_ref(), &opening_prompt, &cfg, llm_timeout).await?;
        let message = SessionMessage {
            id: MessageId::from(collab.ids.new_id(MessageId::PREFIX)),
            session_id: session.id.clone(),
            role: MessageRole::Assistant,
            content: opening.text,
            timestamp: now,
            token_count: Some(opening.usage.output_tokens),
            message_index: 0,
        };
        collab.messages.create(message.clone()).await?;
        transcript.push(message);
        0
    } else {
        // The tutor's opening message is always persisted at `messageIndex=0`
        // (spec §4.5 step 6), regardless of how far the transcript has grown
        // since — a resuming client always gets 0 here, never the last
        // message's index.
        0
    };

    let next_message_index = transcript.len() as u32;

    outbound
        .send(ServerFrame::SessionStarted {
            total_points: checklist.total() as u32,
            recalled_count: checklist.recalled_count() as u32,
            opening_message_index: opening_index,
        })
        .await
        .ok();

    if let Some(from) = resume_from_index {
        for message in transcript.iter().filter(|m| m.message_index >= from) {
            let frame = match message.role {
                MessageRole::User => ServerFrame::UserMessageAccepted {
                    message_index: message.message_index,
                    display_text: message.content.clone(),
                    corrections: Vec::new(),
                },
                MessageRole::Assistant | MessageRole::System => {
                    outbound.send(ServerFrame::AssistantToken { delta: message.content.clone() }).await.ok();
                    ServerFrame::AssistantComplete { message_index: message.message_index }
                }
            };
            outbound.send(frame).await.ok();
        }
    }

    let engine = SessionEngine {
        collab,
        outbound,
        recall_set,
        session,
        checklist,
        transcript,
        next_message_index,
        all_points_recalled_emitted: false,
        tutor,
        evaluator_client,
        detector_client,
        transcription_client,
        transcription_config,
        evaluator_settings,
        detector_settings,
        rabbithole: None,
        llm_timeout,
    };

    let (tx, rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
    tokio::spawn(engine.run(rx));
    Ok(SessionHandle { inbound: tx })
}

async fn load_or_create_session(
    collab: &SessionCollaborators,
    hello_id: &str,
) -> Result<(RecallSet, Session, Checklist, Vec<SessionMessage>), EngineError> {
    if let Some(existing) = collab.sessions.find_by_id(&SessionId::from(hello_id)).await? {
        if !blocks_new_session(existing.status) {
            return Err(EngineError::Conflict { id: hello_id.to_string(), status: format!("{:?}", existing.status) });
        }
        let set = collab
            .recall_sets
            .find_by_id(&existing.recall_set_id)
            .await?
            .ok_or_else(|| EngineError::NotFound { id: existing.recall_set_id.to_string() })?;

        let mut points = Vec::new();
        for id in &existing.target_recall_point_ids {
            if let Some(point) = collab.recall_points.find_by_id(id).await? {
                points.push(point);
            }
        }
        let outcomes = collab.outcomes.find_by_session_id(&existing.id).await?;
        let recalled_ids: Vec<RecallPointId> = outcomes.iter().map(|o| o.recall_point_id.clone()).collect();
        let mut checklist = Checklist::new(points);
        checklist.restore_checked(&recalled_ids);

        let messages = collab.messages.find_by_session_id(&existing.id).await?;
        Ok((set, existing, checklist, messages))
    } else {
        let set_id = RecallSetId::from(hello_id);
        let set = collab
            .recall_sets
            .find_by_id(&set_id)
            .await?
            .ok_or_else(|| EngineError::NotFound { id: hello_id.to_string() })?;
        if set.status != RecallSetStatus::Active {
            return Err(EngineError::Conflict { id: set.id.to_string(), status: format!("{:?}", set.status) });
        }
        if collab.sessions.find_in_progress(&set.id).await?.is_some() {
            return Err(EngineError::SessionAlreadyInProgress { id: set.id.to_string() });
        }
        let due = collab
            .recall_points
            .find_due(&set.id, collab.config.session.max_target_points_per_session)
            .await?;
        if due.is_empty() {
            return Err(EngineError::NoDuePoints { id: set.id.to_string() });
        }

        let now = collab.clock.now();
        let session = Session {
            id: SessionId::from(collab.ids.new_id(SessionId::PREFIX)),
            recall_set_id: set.id.clone(),
            status: SessionStatus::InProgress,
            target_recall_point_ids: due.iter().map(|p| p.id.clone()).collect(),
            started_at: now,
            ended_at: None,
        };
        collab.sessions.create(session.clone()).await?;
        Ok((set, session, Checklist::new(due), Vec::new()))
    }
}

impl SessionEngine {
    async fn run(mut self, mut inbound: mpsc::Receiver<ClientFrame>) {
        while let Some(frame) = inbound.recv().await {
            match frame {
                ClientFrame::Hello { .. } => {
                    warn!(session_id = %self.session.id, "hello received after session start, ignoring");
                }
                ClientFrame::UserMessage { text, source_kind } => {
                    self.handle_user_message(text, source_kind).await;
                }
                ClientFrame::LeaveSession => {
                    self.handle_leave().await;
                    break;
                }
                ClientFrame::Abandon => {
                    self.handle_abandon().await;
                    break;
                }
                ClientFrame::Complete => {
                    if self.handle_complete().await {
                        break;
                    }
                }
            }
        }
        info!(session_id = %self.session.id, "session task ended");
    }

    async fn handle_user_message(&mut self, text: String, source_kind: SourceKind) {
        let now = self.collab.clock.now();
        let transcription_source = match source_kind {
            SourceKind::Voice => TranscriptionSourceKind::Voice,
            SourceKind::Typed => TranscriptionSourceKind::Typed,
        };
        let processed = transcribe(
            self.transcription_client.as_ref(),
            &text,
            transcription_source,
            false,
            &self.transcription_config,
            TRANSCRIPTION_MODEL,
        )
        .await;

        let in_rabbithole = self.rabbithole.is_some();
        let returning = if in_rabbithole {
            let tail = self.rabbithole_tail();
            detect_return(self.detector_client.as_ref(), &tail, &self.detector_settings).await.return_to_main
        } else {
            false
        };

        // Inner rabbithole turns never touch the main transcript (spec §8
        // invariant 5) — only the entering and returning turns do.
        let persisted_index = if !in_rabbithole || returning {
            let index = self.next_message_index;
            if let Err(e) = self.persist_message(MessageRole::User, processed.llm_text.clone(), now).await {
                self.emit_error(&e).await;
                return;
            }
            Some(index)
        } else {
            None
        };

        self.emit(ServerFrame::UserMessageAccepted {
            message_index: persisted_index.unwrap_or(self.next_message_index),
            display_text: processed.display_text,
            corrections: processed
                .corrections
                .into_iter()
                .map(|c| WireCorrection { original: c.original, corrected: c.corrected })
                .collect(),
        })
        .await;

        if in_rabbithole {
            if returning {
                self.handle_rabbithole_return(now).await;
            } else {
                self.handle_rabbithole_turn(&processed.llm_text, now).await;
            }
            return;
        }

        let window = self.collab.config.session.evaluator_recent_message_window as usize;
        let recent = self.conversation_messages_tail(window);
        let enter = detect_enter(self.detector_client.as_ref(), &processed.llm_text, &recent, &self.detector_settings).await;
        if enter.enter {
            let trigger_index = persisted_index.expect("main-line turns always persist before detection");
            self.enter_rabbithole(enter.topic.unwrap_or_else(|| "an unplanned tangent".to_string()), trigger_index, now).await;
            return;
        }

        self.run_main_line_turn(now).await;
    }

    async fn run_main_line_turn(&mut self, _entered_at: DateTime<Utc>) {
        let cfg = ChatConfig::new(TUTOR_MODEL.to_string(), 1024, 0.7);
        let history = self.conversation_messages();
        let mut stream = match stream_with_timeout(self.tutor.as_ref(), &history, &cfg, self.llm_timeout).await {
            Ok(s) => s,
            Err(e) => {
                self.emit_llm_error(e).await;
                return;
            }
        };

        let mut assistant_text = String::new();
        let mut failed = false;
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::TextDelta { text } => {
                    assistant_text.push_str(&text);
                    self.emit(ServerFrame::AssistantToken { delta: text }).await;
                }
                StreamEvent::Done { .. } => break,
                StreamEvent::Error { kind, message } => {
                    self.emit_llm_error(LlmError::new(kind, message)).await;
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            // Never persist a partial assistant message (spec §4.5 "Failure
            // handling inside the loop").
            return;
        }

        let now = self.collab.clock.now();
        let assistant_index = self.next_message_index;
        if let Err(e) = self.persist_message(MessageRole::Assistant, assistant_text, now).await {
            self.emit_error(&e).await;
            return;
        }
        self.emit(ServerFrame::AssistantComplete { message_index: assistant_index }).await;

        self.run_evaluator(now).await;
    }

    async fn run_evaluator(&mut self, now: DateTime<Utc>) {
        if self.checklist.is_empty() {
            return;
        }
        let window = self.collab.config.session.evaluator_recent_message_window as usize;
        let input = EvaluateInput {
            recent_messages: self.conversation_messages_tail(window),
            unchecked_points: self.checklist.entries(),
            just_recalled_point_ids: Vec::new(),
            recall_set_context: self.recall_set.name.clone(),
        };
        let evaluation = evaluate(self.evaluator_client.as_ref(), &input, &self.evaluator_settings).await;

        for demo in evaluation.demonstrated {
            let Some(point) = self.checklist.find_unchecked(&demo.point_id).cloned() else {
                continue;
            };
            let params = recall_fsrs::FsrsParameters {
                desired_retention: self.collab.config.session.desired_retention,
                ..recall_fsrs::FsrsParameters::default()
            };
            let mut updated = point.clone();
            updated.fsrs_state = recall_fsrs::update(&point.fsrs_state, demo.rating, now, &params);
            updated.recall_history.push(RecallAttempt { timestamp: now, success: true, latency_ms: 0 });
            let updated = match self.collab.recall_points.update(updated).await {
                Ok(p) => p,
                Err(e) => {
                    self.emit_error(&e).await;
                    continue;
                }
            };

            let outcome = RecallOutcome {
                id: OutcomeId::from(self.collab.ids.new_id(OutcomeId::PREFIX)),
                session_id: self.session.id.clone(),
                recall_point_id: demo.point_id.clone(),
                success: true,
                confidence: demo.confidence,
                rating: demo.rating,
                reasoning: demo.reasoning,
                message_index_start: demo.message_index_start,
                message_index_end: demo.message_index_end,
                time_spent_ms: 0,
            };
            if let Err(e) = self.collab.outcomes.create(outcome).await {
                self.emit_error(&e).await;
                continue;
            }

            self.checklist.replace_unchecked(updated);
            self.checklist.mark_recalled(&demo.point_id);
            self.emit_or_buffer(ServerFrame::PointRecalled {
                point_id: demo.point_id.to_string(),
                recalled_count: self.checklist.recalled_count() as u32,
                total_points: self.checklist.total() as u32,
            })
            .await;
        }

        if self.checklist.is_empty() && !self.all_points_recalled_emitted {
            self.all_points_recalled_emitted = true;
            self.emit_or_buffer(ServerFrame::AllPointsRecalled {
                recalled_count: self.checklist.recalled_count() as u32,
                total_points: self.checklist.total() as u32,
            })
            .await;
        }
    }

    async fn enter_rabbithole(&mut self, topic: String, trigger_message_index: u32, now: DateTime<Utc>) {
        let agent = RabbitholeAgent::new(
            self.collab.client_factory.as_ref(),
            topic.clone(),
            &self.recall_set.name,
            &self.recall_set.description,
            1,
            TUTOR_MODEL,
        );
        self.rabbithole = Some(RabbitholeSlot { agent, trigger_message_index, buffered_ticks: Vec::new() });
        self.emit(ServerFrame::RabbitholeEntered { topic, depth: 1, trigger_message_index }).await;

        // `Open()` seeds the agent's own history with its synthetic opening
        // exchange (spec §4.3) so the first real in-tangent turn has a
        // well-formed user/assistant history to extend. That text is never
        // sent to the client: the outbound sequence for this turn ends at
        // `rabbithole_entered` (spec §8 property 7) — the student's next
        // in-tangent message gets the first reply actually shown to them.
        let reply = {
            let timeout = self.llm_timeout;
            let slot = self.rabbithole.as_mut().expect("just inserted");
            await_with_timeout(timeout, slot.agent.open(now)).await
        };
        if let Err(e) = reply {
            self.emit_llm_error(e).await;
        }
    }

    async fn handle_rabbithole_turn(&mut self, user_text: &str, now: DateTime<Utc>) {
        let reply = {
            let timeout = self.llm_timeout;
            let slot = self.rabbithole.as_mut().expect("handle_rabbithole_turn without an active slot");
            await_with_timeout(timeout, slot.agent.respond(user_text, now)).await
        };
        match reply {
            Ok(text) => {
                self.emit(ServerFrame::AssistantToken { delta: text }).await;
                let index = self.next_message_index.saturating_sub(1);
                self.emit(ServerFrame::AssistantComplete { message_index: index }).await;
            }
            Err(e) => {
                self.emit_llm_error(e).await;
                return;
            }
        }
        // The evaluator still watches a tangent for incidental
        // demonstrations; any ticks it fires get buffered (see `emit_or_buffer`).
        self.run_evaluator(now).await;
    }

    async fn handle_rabbithole_return(&mut self, now: DateTime<Utc>) {
        let slot = self.rabbithole.take().expect("handle_rabbithole_return without an active slot");
        let return_message_index = self.next_message_index.saturating_sub(1);

        let event = RabbitholeEvent {
            id: RabbitholeId::from(self.collab.ids.new_id(RabbitholeId::PREFIX)),
            session_id: self.session.id.clone(),
            topic: slot.agent.topic.clone(),
            depth: slot.agent.depth,
            trigger_message_index: slot.trigger_message_index,
            return_message_index: Some(return_message_index),
            conversation_history: slot
                .agent
                .history()
                .into_iter()
                .map(|t| recall_core::ChatTurn { role: t.role, content: t.content, timestamp: t.timestamp })
                .collect(),
        };
        if let Err(e) = self.collab.rabbitholes.create(event).await {
            self.emit_error(&e).await;
        }

        self.emit(ServerFrame::RabbitholeReturned { topic: slot.agent.topic, return_message_index }).await;
        for frame in slot.buffered_ticks {
            self.emit(frame).await;
        }

        self.run_main_line_turn(now).await;
    }

    async fn handle_leave(&mut self) {
        // `leave_session` pauses, it does not terminate: `status` stays
        // `in_progress` so a later `hello` with the same id resumes here.
        self.emit(ServerFrame::SessionPaused).await;
    }

    async fn handle_abandon(&mut self) {
        let now = self.collab.clock.now();
        self.session.status = SessionStatus::Abandoned;
        self.session.ended_at = Some(now);
        if let Err(e) = self.collab.sessions.update(self.session.clone()).await {
            self.emit_error(&e).await;
        }
        self.persist_and_emit_metrics(now).await;
        self.emit(ServerFrame::SessionAbandoned).await;
    }

    /// Returns `true` if the turn loop should end.
    async fn handle_complete(&mut self) -> bool {
        if !self.checklist.is_empty() {
            self.emit(ServerFrame::Error {
                code: "invalid_request".to_string(),
                message: "complete is only accepted after every point has been recalled".to_string(),
            })
            .await;
            return false;
        }
        let now = self.collab.clock.now();
        self.session.status = SessionStatus::Completed;
        self.session.ended_at = Some(now);
        if let Err(e) = self.collab.sessions.update(self.session.clone()).await {
            self.emit_error(&e).await;
        }
        let metrics = self.persist_and_emit_metrics(now).await;
        self.emit(ServerFrame::SessionCompleted { metrics_summary: metrics.into() }).await;
        true
    }

    async fn persist_and_emit_metrics(&mut self, ended_at: DateTime<Utc>) -> SessionMetrics {
        let outcomes = self.collab.outcomes.find_by_session_id(&self.session.id).await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to load outcomes for metrics, treating as empty");
            Vec::new()
        });
        let rabbithole_count = self
            .collab
            .rabbitholes
            .find_by_session_id(&self.session.id)
            .await
            .map(|events| events.len() as u32)
            .unwrap_or(0);
        let timestamps: Vec<DateTime<Utc>> = self.transcript.iter().map(|m| m.timestamp).collect();

        let metrics = crate::metrics::compute_metrics(
            self.session.id.clone(),
            self.session.started_at,
            ended_at,
            &timestamps,
            &outcomes,
            rabbithole_count,
            self.checklist.recalled_count(),
            self.checklist.total(),
            self.collab.config.session.stall_threshold_ms,
        );
        if let Err(e) = self.collab.metrics.create(metrics.clone()).await {
            self.emit_error(&e).await;
        }
        metrics
    }

    async fn persist_message(&mut self, role: MessageRole, content: String, timestamp: DateTime<Utc>) -> Result<(), EngineError> {
        let message = SessionMessage {
            id: MessageId::from(self.collab.ids.new_id(MessageId::PREFIX)),
            session_id: self.session.id.clone(),
            role,
            content,
            timestamp,
            token_count: None,
            message_index: self.next_message_index,
        };
        self.collab.messages.create(message.clone()).await?;
        self.transcript.push(message);
        self.next_message_index += 1;
        Ok(())
    }

    fn conversation_messages(&self) -> Vec<ChatMessage> {
        self.transcript.iter().map(|m| ChatMessage { role: to_llm_role(m.role), content: m.content.clone() }).collect()
    }

    fn conversation_messages_tail(&self, window: usize) -> Vec<ChatMessage> {
        let all = self.conversation_messages();
        let start = all.len().saturating_sub(window);
        all[start..].to_vec()
    }

    fn rabbithole_tail(&self) -> Vec<ChatMessage> {
        let Some(slot) = &self.rabbithole else { return Vec::new() };
        let history = slot.agent.history();
        let start = history.len().saturating_sub(6);
        history[start..]
            .iter()
            .map(|t| ChatMessage { role: to_llm_role(t.role), content: t.content.clone() })
            .collect()
    }

    async fn emit(&self, frame: ServerFrame) {
        if self.outbound.send(frame).await.is_err() {
            warn!(session_id = %self.session.id, "outbound channel closed, client likely disconnected");
        }
    }

    /// `point_recalled`/`all_points_recalled` buffer while a rabbithole is
    /// open instead of emitting immediately (spec §4.5).
    async fn emit_or_buffer(&mut self, frame: ServerFrame) {
        if let Some(slot) = &mut self.rabbithole {
            slot.buffered_ticks.push(frame);
        } else {
            self.emit(frame).await;
        }
    }

    async fn emit_error(&self, err: &EngineError) {
        self.emit(ServerFrame::Error { code: err.code().to_string(), message: err.to_string() }).await;
    }

    async fn emit_llm_error(&self, err: LlmError) {
        let engine_err = EngineError::from(err);
        self.emit_error(&engine_err).await;
    }
}

/// Bounds a rabbithole agent call by `timeout` (spec §6.2
/// `LlmConfig.timeout_seconds`). The agent's own `complete_and_append`
/// makes a single call with no retry, matching the tutor's policy — the
/// rabbithole surfaces real content to the client, not an advisory result.
async fn await_with_timeout<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T, LlmError>>,
) -> Result<T, LlmError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::new(LlmErrorKind::Timeout, format!("request timed out after {}ms", timeout.as_millis()))),
    }
}

fn to_llm_role(role: MessageRole) -> Role {
    match role {
        MessageRole::User => Role::User,
        MessageRole::Assistant => Role::Assistant,
        MessageRole::System => Role::System,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;
    use futures_util::stream;

    use recall_core::testing::{
        InMemoryMessageRepository, InMemoryMetricsRepository, InMemoryOutcomeRepository,
        InMemoryRabbitholeRepository, InMemoryRecallPointRepository, InMemoryRecallSetRepository,
        InMemorySessionRepository,
    };
    use recall_core::{ChatResponse, FixedClock, IdGenerator, RecallConfig, RecallSetStatus, TokenStream, Usage};
    use recall_fsrs::{create_initial_state, FsrsParameters};

    use super::*;

    /// Deterministic ids so assertions can target a known `message_index`/id
    /// shape instead of a random uuid.
    struct SeqIdGenerator(AtomicU64);

    impl SeqIdGenerator {
        fn new() -> Self {
            Self(AtomicU64::new(1))
        }
    }

    impl IdGenerator for SeqIdGenerator {
        fn new_id(&self, prefix: &str) -> String {
            format!("{prefix}_{}", self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    /// Canned responses for every collaborator role, keyed off the system
    /// prompt and (for the detector, which answers two different questions
    /// through the one client) the prompt content of each call.
    #[derive(Clone, Default)]
    struct Scripted {
        tutor: String,
        evaluator_json: String,
        enter_json: String,
        rabbithole_reply: String,
        /// Popped one at a time on each `detect_return` call; the last
        /// value is reused once the queue is drained.
        return_sequence: Arc<Mutex<VecDeque<String>>>,
    }

    struct ScriptedClient {
        system_prompt: String,
        script: Scripted,
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        fn system_prompt(&self) -> &str {
            &self.system_prompt
        }

        async fn complete(&self, messages: &[ChatMessage], _cfg: &ChatConfig) -> Result<ChatResponse, LlmError> {
            let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
            let text = if self.system_prompt.contains("grade whether") {
                self.script.evaluator_json.clone()
            } else if self.system_prompt.contains("detect conversational tangents") {
                if last.contains("Does the user want to return") {
                    let mut queue = self.script.return_sequence.lock().unwrap();
                    queue
                        .pop_front()
                        .unwrap_or_else(|| r#"{"return_to_main":false,"confidence":0.0}"#.to_string())
                } else {
                    self.script.enter_json.clone()
                }
            } else if self.system_prompt.contains("clean up transcribed") {
                if last.contains("List the technical") {
                    r#"{"terms":[]}"#.to_string()
                } else {
                    // Deliberately not JSON: the transcription pipeline
                    // degrades to the raw text unchanged, which is what
                    // these tests want to assert against.
                    "unparsed".to_string()
                }
            } else if self.system_prompt.contains("curious, exploratory guide") {
                self.script.rabbithole_reply.clone()
            } else {
                self.script.tutor.clone()
            };
            Ok(ChatResponse { text, usage: Usage::default(), stop_reason: "end_turn".to_string() })
        }

        async fn stream(&self, _messages: &[ChatMessage], _cfg: &ChatConfig) -> Result<TokenStream, LlmError> {
            let words = vec![
                StreamEvent::TextDelta { text: self.script.tutor.clone() },
                StreamEvent::Done { usage: Usage::default(), stop_reason: "end_turn".to_string() },
            ];
            Ok(Box::pin(stream::iter(words)))
        }
    }

    struct ScriptedFactory(Scripted);

    impl RabbitholeClientFactory for ScriptedFactory {
        fn build(&self, system_prompt: String) -> Box<dyn LlmClient> {
            Box::new(ScriptedClient { system_prompt, script: self.0.clone() })
        }
    }

    fn point(id: &str, set_id: &RecallSetId, content: &str, context: &str) -> recall_core::RecallPoint {
        let fsrs = create_initial_state(Utc::now(), &FsrsParameters::default());
        recall_core::RecallPoint::new(RecallPointId::from(id), set_id.clone(), content.to_string(), context.to_string(), fsrs)
            .unwrap()
    }

    struct Harness {
        sets: Arc<InMemoryRecallSetRepository>,
        points: Arc<InMemoryRecallPointRepository>,
        sessions: Arc<InMemorySessionRepository>,
        messages: Arc<InMemoryMessageRepository>,
        outcomes: Arc<InMemoryOutcomeRepository>,
        rabbitholes: Arc<InMemoryRabbitholeRepository>,
        metrics: Arc<InMemoryMetricsRepository>,
        ids: Arc<SeqIdGenerator>,
        script: Scripted,
        set_id: RecallSetId,
    }

    impl Harness {
        async fn new(script: Scripted) -> Self {
            let set_id = RecallSetId::from("rs_1");
            let sets = Arc::new(InMemoryRecallSetRepository::default());
            sets.create(RecallSet {
                id: set_id.clone(),
                name: "Biochemistry".to_string(),
                description: "Core metabolic pathways".to_string(),
                status: RecallSetStatus::Active,
                discussion_system_prompt: "You are a patient tutor.".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

            let points = Arc::new(InMemoryRecallPointRepository::default());
            points
                .create(point("rp_1", &set_id, "ATP stores energy in phosphoanhydride bonds.", "Cellular energy currency."))
                .await
                .unwrap();

            Self {
                sets,
                points,
                sessions: Arc::new(InMemorySessionRepository::default()),
                messages: Arc::new(InMemoryMessageRepository::default()),
                outcomes: Arc::new(InMemoryOutcomeRepository::default()),
                rabbitholes: Arc::new(InMemoryRabbitholeRepository::default()),
                metrics: Arc::new(InMemoryMetricsRepository::default()),
                ids: Arc::new(SeqIdGenerator::new()),
                script,
                set_id,
            }
        }

        fn collaborators(&self) -> SessionCollaborators {
            SessionCollaborators {
                recall_sets: self.sets.clone(),
                recall_points: self.points.clone(),
                sessions: self.sessions.clone(),
                messages: self.messages.clone(),
                outcomes: self.outcomes.clone(),
                rabbitholes: self.rabbitholes.clone(),
                metrics: self.metrics.clone(),
                clock: Arc::new(FixedClock::new(Utc::now())),
                ids: self.ids.clone(),
                client_factory: Arc::new(ScriptedFactory(self.script.clone())),
                config: RecallConfig::default(),
            }
        }

        async fn start_fresh(&self) -> (SessionHandle, mpsc::Receiver<ServerFrame>) {
            let (tx, rx) = mpsc::channel(64);
            let hello = ClientFrame::Hello { session_id: self.set_id.to_string(), resume_from_index: None };
            let handle = start(hello, self.collaborators(), tx).await.unwrap();
            (handle, rx)
        }

        async fn resume(&self, session_id: &str) -> (SessionHandle, mpsc::Receiver<ServerFrame>) {
            let (tx, rx) = mpsc::channel(64);
            let hello = ClientFrame::Hello { session_id: session_id.to_string(), resume_from_index: None };
            let handle = start(hello, self.collaborators(), tx).await.unwrap();
            (handle, rx)
        }
    }

    fn user_message(text: &str) -> ClientFrame {
        ClientFrame::UserMessage { text: text.to_string(), source_kind: SourceKind::Typed }
    }

    /// Scenario A (spec §8): a main-line turn whose demonstration clears the
    /// last checklist entry drives the session straight to completion.
    #[tokio::test]
    async fn main_line_turn_credits_demonstration_and_completes_session() {
        let harness = Harness::new(Scripted {
            tutor: "Good, let's keep going.".to_string(),
            evaluator_json: r#"{"demonstrated":[{"point_id":"rp_1","confidence":0.9,"reasoning":"matches","message_index_start":1,"message_index_end":1}]}"#.to_string(),
            enter_json: r#"{"enter":false,"confidence":0.0}"#.to_string(),
            ..Scripted::default()
        })
        .await;

        let (handle, mut rx) = harness.start_fresh().await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerFrame::SessionStarted { total_points: 1, recalled_count: 0, opening_message_index: 0 }
        ));

        handle.submit(user_message("ATP stores energy in phosphate bonds"));
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::UserMessageAccepted { .. }));
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::AssistantToken { .. }));
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::AssistantComplete { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerFrame::PointRecalled { recalled_count: 1, total_points: 1, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerFrame::AllPointsRecalled { recalled_count: 1, total_points: 1 }
        ));

        handle.submit(ClientFrame::Complete);
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::SessionCompleted { .. }));
    }

    #[tokio::test]
    async fn complete_before_checklist_is_empty_is_rejected() {
        let harness = Harness::new(Scripted {
            tutor: "Let's keep going.".to_string(),
            evaluator_json: r#"{"demonstrated":[]}"#.to_string(),
            enter_json: r#"{"enter":false,"confidence":0.0}"#.to_string(),
            ..Scripted::default()
        })
        .await;

        let (handle, mut rx) = harness.start_fresh().await;
        rx.recv().await.unwrap();

        handle.submit(ClientFrame::Complete);
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::Error { ref code, .. } if code == "invalid_request"));
    }

    /// Regression test for the session-resume `opening_message_index` bug:
    /// a resuming client must always see `0` (spec §4.5 step 6), no matter
    /// how long the transcript has grown since the tutor's opening message.
    #[tokio::test]
    async fn resume_always_reports_opening_index_zero() {
        let harness = Harness::new(Scripted {
            tutor: "Let's keep going.".to_string(),
            evaluator_json: r#"{"demonstrated":[]}"#.to_string(),
            enter_json: r#"{"enter":false,"confidence":0.0}"#.to_string(),
            ..Scripted::default()
        })
        .await;

        let (handle, mut rx) = harness.start_fresh().await;
        rx.recv().await.unwrap(); // session_started

        handle.submit(user_message("first turn"));
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }
        handle.submit(user_message("second turn"));
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }

        let sessions = harness.sessions.find_by_recall_set_id(&harness.set_id).await.unwrap();
        let session_id = sessions.first().expect("session was created").id.clone();

        let (_resumed_handle, mut resumed_rx) = harness.resume(session_id.as_str()).await;
        match resumed_rx.recv().await.unwrap() {
            ServerFrame::SessionStarted { opening_message_index, .. } => assert_eq!(opening_message_index, 0),
            other => panic!("expected session_started, got {other:?}"),
        }
    }

    /// Regression test for the rabbithole-entry wire-ordering bug (spec §8
    /// property 7): the turn that enters a tangent must end at
    /// `rabbithole_entered`, never followed by `assistant_token`/
    /// `assistant_complete` for the agent's synthetic opening reply.
    /// Also exercises Scenario B: returning from the tangent resumes the
    /// main line.
    #[tokio::test]
    async fn entering_a_rabbithole_matches_wire_ordering_and_return_resumes_main_line() {
        let harness = Harness::new(Scripted {
            tutor: "Welcome back to the checklist.".to_string(),
            evaluator_json: r#"{"demonstrated":[]}"#.to_string(),
            enter_json: r#"{"enter":true,"topic":"ATP synthase","confidence":0.9}"#.to_string(),
            rabbithole_reply: "ATP synthase is a rotary motor enzyme.".to_string(),
            return_sequence: Arc::new(Mutex::new(VecDeque::from([
                r#"{"return_to_main":false,"confidence":0.0}"#.to_string(),
                r#"{"return_to_main":true,"confidence":0.9}"#.to_string(),
            ]))),
        })
        .await;

        let (handle, mut rx) = harness.start_fresh().await;
        rx.recv().await.unwrap(); // session_started

        handle.submit(user_message("wait, what's ATP synthase again?"));
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::UserMessageAccepted { .. }));
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::RabbitholeEntered { .. }));

        handle.submit(user_message("how does the rotation work?"));
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::UserMessageAccepted { .. }));
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::AssistantToken { .. }));
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::AssistantComplete { .. }));

        handle.submit(user_message("ok let's get back to studying"));
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::UserMessageAccepted { .. }));
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::RabbitholeReturned { .. }));
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::AssistantToken { .. }));
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::AssistantComplete { .. }));
    }
}
