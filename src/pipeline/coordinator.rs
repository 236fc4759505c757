//! Pipeline coordinator: executes exactly one turn
//!
//! A turn is an ordered sequence of stage calls — transcribe, generate,
//! synthesize, deliver — with a single cancellation token threaded
//! through all of them. Cancellation is checked at the start of every
//! stage and at every chunk boundary; in-flight downstream calls are
//! not force-aborted, their results are simply discarded.

use crate::assembler::{OutputChunk, StreamAssembler};
use crate::config::ConfabConfig;
use crate::gateway::{with_retry, GatewayError, Gateways, PromptContext};
use crate::history::{FailureCause, HistoryStore, Turn};
use crate::pipeline::splitter::SentenceSplitter;
use crate::pipeline::types::{InputPayload, PipelineRequest, PipelineResult, TurnContext};
use crate::session::{SessionEvent, SessionState};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub struct PipelineCoordinator {
    gateways: Gateways,
    history: Arc<HistoryStore>,
    config: ConfabConfig,
}

impl PipelineCoordinator {
    pub fn new(gateways: Gateways, history: Arc<HistoryStore>, config: ConfabConfig) -> Self {
        Self {
            gateways,
            history,
            config,
        }
    }

    /// Drive one turn to a terminal outcome. Always records the turn in
    /// history (Completed, Interrupted, or Failed) before returning;
    /// restoring the session to its resting state is the manager's job.
    pub async fn run_turn(&self, req: PipelineRequest, ctx: &TurnContext) -> PipelineResult {
        let started_at = Utc::now();
        info!(session_id = %req.session_id, turn_id = %req.turn_id, ordinal = req.ordinal, "turn started");

        // Stage 1: transcription (skipped for text input)
        let transcript = match &req.input {
            InputPayload::Text(text) => text.clone(),
            InputPayload::Audio(bytes) => {
                ctx.transition(SessionState::Transcribing);
                let result = tokio::select! {
                    () = req.cancel.cancelled() => {
                        return self.record_interrupted(&req, String::new(), String::new(), started_at, ctx);
                    }
                    r = with_retry(&self.config.retry, "transcription", || {
                        self.gateways
                            .transcription
                            .transcribe(bytes, req.language_hint.as_deref())
                    }) => r,
                };
                match result {
                    Ok(text) => text,
                    Err(err) => {
                        return self.record_failed(&req, FailureCause::Transcription, err, started_at, ctx);
                    }
                }
            }
        };
        ctx.emit(SessionEvent::Transcript {
            turn_id: req.turn_id,
            text: transcript.clone(),
        });

        if req.cancel.is_cancelled() {
            return self.record_interrupted(&req, transcript, String::new(), started_at, ctx);
        }

        // Stage 2: generation
        ctx.transition(SessionState::Generating);
        let (summary, history) = self.history.context(req.session_id);
        let prompt = PromptContext {
            system_prompt: req.profile.system_prompt.clone(),
            summary,
            history,
            user_text: transcript.clone(),
            temperature: req.profile.temperature,
        };

        let stream = tokio::select! {
            () = req.cancel.cancelled() => {
                return self.record_interrupted(&req, transcript, String::new(), started_at, ctx);
            }
            r = with_retry(&self.config.retry, "generation", || {
                self.gateways.generation.generate(prompt.clone())
            }) => r,
        };
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                return self.record_failed(&req, FailureCause::Generation, err, started_at, ctx);
            }
        };

        // Stages 3 and 4 run pipelined with generation: synthesis is
        // requested per sentence as soon as one is complete, and the
        // assembler re-establishes generation order for delivery.
        let stage_cancel = req.cancel.child_token();
        let (chunk_tx, mut out_rx, assembler_handle) =
            StreamAssembler::spawn(self.config.assembler.clone(), stage_cancel.clone());

        let delivery = {
            let ctx = ctx.clone();
            let turn_id = req.turn_id;
            tokio::spawn(async move {
                let mut delivered: u64 = 0;
                while let Some(chunk) = out_rx.recv().await {
                    if chunk.is_final {
                        break;
                    }
                    if delivered == 0 {
                        ctx.transition(SessionState::Speaking);
                    }
                    ctx.emit(SessionEvent::OutputChunk {
                        turn_id,
                        seq: chunk.seq,
                        text: chunk.text,
                        audio: chunk.audio,
                        reorder_warned: chunk.reorder_warned,
                    });
                    delivered += 1;
                }
                delivered
            })
        };

        let mut splitter = SentenceSplitter::new();
        let mut response = String::new();
        let mut synth_seq: u64 = 0;
        let mut synth_tasks: JoinSet<std::result::Result<(), GatewayError>> = JoinSet::new();
        let mut interrupted = false;
        let mut gen_error: Option<GatewayError> = None;

        'generation: loop {
            tokio::select! {
                () = req.cancel.cancelled() => {
                    interrupted = true;
                    break 'generation;
                }
                item = stream.next() => match item {
                    Some(Ok(chunk)) => {
                        ctx.emit(SessionEvent::ResponseDelta {
                            turn_id: req.turn_id,
                            text: chunk.text.clone(),
                        });
                        response.push_str(&chunk.text);
                        for unit in splitter.feed(&chunk.text) {
                            if synth_seq == 0 {
                                ctx.transition(SessionState::Synthesizing);
                            }
                            self.spawn_synthesis(&mut synth_tasks, unit, synth_seq, &req, &chunk_tx, &stage_cancel);
                            synth_seq += 1;
                        }
                        if chunk.is_final {
                            break 'generation;
                        }
                    }
                    Some(Err(err)) => {
                        gen_error = Some(err);
                        break 'generation;
                    }
                    None => break 'generation,
                }
            }
        }

        if gen_error.is_some() {
            // Abandon already-requested synthesis; results are discarded
            stage_cancel.cancel();
        }

        if !interrupted && gen_error.is_none() {
            if let Some(rest) = splitter.flush() {
                if synth_seq == 0 {
                    ctx.transition(SessionState::Synthesizing);
                }
                self.spawn_synthesis(&mut synth_tasks, rest, synth_seq, &req, &chunk_tx, &stage_cancel);
                synth_seq += 1;
            }
        }

        // Wait for synthesis to wind down; results after cancellation
        // are discarded by the tasks themselves. The delivery task keeps
        // draining the assembler in parallel, so backpressure cannot
        // deadlock this join.
        let mut synth_error: Option<GatewayError> = None;
        while let Some(joined) = synth_tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if synth_error.is_none() {
                        stage_cancel.cancel();
                        synth_error = Some(err);
                    }
                }
                Err(join_err) => {
                    error!("synthesis task panicked: {join_err}");
                    if synth_error.is_none() {
                        stage_cancel.cancel();
                        synth_error = Some(GatewayError::Terminal(join_err.to_string()));
                    }
                }
            }
        }

        // Every synthesis result is already in the assembler, so the
        // marker takes the highest sequence number and cannot jump the
        // queue through a reorder-window flush.
        if !interrupted && gen_error.is_none() && synth_error.is_none() {
            let _ = chunk_tx.send(OutputChunk::final_marker(synth_seq)).await;
        }
        drop(chunk_tx);
        let _ = assembler_handle.await;
        let chunks_delivered = delivery.await.unwrap_or(0);

        if interrupted || req.cancel.is_cancelled() {
            debug!(turn_id = %req.turn_id, "turn cancelled, partial audio discarded");
            return self.record_interrupted(&req, transcript, response, started_at, ctx);
        }
        if let Some(err) = gen_error {
            return self.record_failed(&req, FailureCause::Generation, err, started_at, ctx);
        }
        if let Some(err) = synth_error {
            return self.record_failed(&req, FailureCause::Synthesis, err, started_at, ctx);
        }

        let audio_ref = (chunks_delivered > 0)
            .then(|| format!("turn:{}:{}", req.turn_id, chunks_delivered));
        let turn = Turn::completed(
            req.turn_id,
            req.ordinal,
            transcript,
            response,
            audio_ref,
            started_at,
        );
        self.append(req.session_id, &turn);
        info!(turn_id = %req.turn_id, chunks = chunks_delivered, "turn completed");
        ctx.emit(SessionEvent::TurnCompleted { turn: turn.clone() });

        PipelineResult {
            turn,
            chunks_delivered,
        }
    }

    /// Request synthesis of one text unit concurrently. The result is
    /// tagged with its sequence number; the assembler restores order.
    fn spawn_synthesis(
        &self,
        tasks: &mut JoinSet<std::result::Result<(), GatewayError>>,
        text: String,
        seq: u64,
        req: &PipelineRequest,
        chunk_tx: &tokio::sync::mpsc::Sender<OutputChunk>,
        stage_cancel: &tokio_util::sync::CancellationToken,
    ) {
        let synthesis = Arc::clone(&self.gateways.synthesis);
        let retry = self.config.retry.clone();
        let voice_id = req.profile.voice_id.clone();
        let chunk_tx = chunk_tx.clone();
        let cancel = stage_cancel.clone();

        tasks.spawn(async move {
            let mut stream = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                r = with_retry(&retry, "synthesis", || synthesis.synthesize(&text, &voice_id)) => r?,
            };

            let mut audio = Vec::new();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    item = stream.next() => match item {
                        Some(Ok(chunk)) => {
                            audio.extend_from_slice(&chunk.data);
                            if chunk.is_final {
                                break;
                            }
                        }
                        Some(Err(err)) => return Err(err),
                        None => break,
                    }
                }
            }

            // Backpressure point: a slow consumer suspends us here
            tokio::select! {
                () = cancel.cancelled() => Ok(()),
                _ = chunk_tx.send(OutputChunk::new(seq, text, audio)) => Ok(()),
            }
        });
    }

    fn record_interrupted(
        &self,
        req: &PipelineRequest,
        transcript: String,
        partial_response: String,
        started_at: DateTime<Utc>,
        ctx: &TurnContext,
    ) -> PipelineResult {
        info!(turn_id = %req.turn_id, "turn interrupted");
        let turn = Turn::interrupted(req.turn_id, req.ordinal, transcript, partial_response, started_at);
        self.append(req.session_id, &turn);
        ctx.emit(SessionEvent::TurnInterrupted {
            turn_id: req.turn_id,
        });
        PipelineResult {
            turn,
            chunks_delivered: 0,
        }
    }

    fn record_failed(
        &self,
        req: &PipelineRequest,
        cause: FailureCause,
        err: GatewayError,
        started_at: DateTime<Utc>,
        ctx: &TurnContext,
    ) -> PipelineResult {
        warn!(turn_id = %req.turn_id, %cause, "turn failed: {err}");
        let turn = Turn::failed(req.turn_id, req.ordinal, cause, started_at);
        self.append(req.session_id, &turn);
        ctx.emit(SessionEvent::TurnFailed {
            turn_id: req.turn_id,
            cause,
            detail: err.to_string(),
        });
        PipelineResult {
            turn,
            chunks_delivered: 0,
        }
    }

    fn append(&self, session_id: crate::SessionId, turn: &Turn) {
        if let Err(err) = self.history.append(session_id, turn.clone()) {
            error!(%session_id, "failed to append turn to history: {err}");
        }
    }
}
