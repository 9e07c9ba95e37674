use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::time::sleep_until;

use super::assembler::ToolCallAssembler;
use super::reasoning::ReasoningExtractor;
use super::usage::UsageTracker;
use super::{LineFramer, WireRecord};
use crate::error::Error;
use crate::protocol::anthropic::AnthropicRecordDecoder;
use crate::protocol::event::{StopReason, StreamEvent, TokenUsage};
use crate::protocol::openai::reduce_openai_record;
use crate::protocol::{Dialect, RecordFragments};

/// Ordered, append-only channel the decoder reports canonical events into.
/// There is no back-channel to the decoder.
pub trait EventSink {
    fn emit(&mut self, event: StreamEvent);
}

impl EventSink for Vec<StreamEvent> {
    fn emit(&mut self, event: StreamEvent) {
        self.push(event);
    }
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<StreamEvent> {
    fn emit(&mut self, event: StreamEvent) {
        // A departed receiver is not the decoder's problem; events are
        // append-only and fire-and-forget.
        let _ = self.send(event);
    }
}

/// Cancellation signal polled by the decoder before each chunk read.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// How a decoded stream finished.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed {
        stop_reason: StopReason,
        usage: Option<TokenUsage>,
    },
    /// Cancellation observed: buffered tool calls and reasoning content are
    /// discarded, not flushed. Callers that cancel mean "discard everything".
    Cancelled,
}

enum DialectState {
    OpenAi,
    Anthropic(AnthropicRecordDecoder),
}

/// Incremental decoder for one vendor response stream.
///
/// One instance per in-flight request. The decoder owns all per-stream
/// mutable state (pending tool calls, dedup ledger, reasoning buffer) and is
/// driven as a single cooperatively-suspending task: it suspends only while
/// awaiting the next chunk (or the reasoning flush deadline) and processes
/// every buffered record synchronously before suspending again, so none of
/// its state needs locking.
pub struct StreamDecoder {
    dialect: DialectState,
    framer: LineFramer,
    assembler: ToolCallAssembler,
    reasoning: ReasoningExtractor,
    usage: UsageTracker,
    has_content: bool,
    utf8_remainder: Vec<u8>,
}

impl StreamDecoder {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self::with_reasoning_flush_delay(dialect, super::reasoning::FLUSH_DELAY)
    }

    #[must_use]
    pub fn with_reasoning_flush_delay(dialect: Dialect, flush_delay: Duration) -> Self {
        let dialect = match dialect {
            Dialect::OpenAi => DialectState::OpenAi,
            Dialect::Anthropic => DialectState::Anthropic(AnthropicRecordDecoder::new()),
        };
        Self {
            dialect,
            framer: LineFramer::new(),
            assembler: ToolCallAssembler::new(),
            reasoning: ReasoningExtractor::with_flush_delay(flush_delay),
            usage: UsageTracker::new(),
            has_content: false,
            utf8_remainder: Vec::new(),
        }
    }

    /// Consume the response byte stream and emit canonical events into the
    /// sink as they become available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the byte stream fails,
    /// [`Error::Upstream`] on a mid-stream vendor error record,
    /// [`Error::IncompleteToolCall`] when a tool-calls finish leaves an
    /// unparseable argument buffer, and [`Error::NoContent`] when the fully
    /// consumed stream produced no content at all.
    pub async fn run<S, E, K>(
        mut self,
        mut byte_stream: S,
        sink: &mut K,
        cancel: &CancelFlag,
    ) -> Result<StreamOutcome, Error>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
        K: EventSink,
    {
        let mut events: Vec<StreamEvent> = Vec::with_capacity(8);
        let mut records: Vec<WireRecord> = Vec::with_capacity(8);

        loop {
            if cancel.is_cancelled() {
                tracing::debug!("cancellation observed; discarding buffered stream state");
                self.reasoning.discard();
                return Ok(StreamOutcome::Cancelled);
            }

            // The flush deadline shares the decoder's cooperative timeline:
            // it can only fire between chunk-processing turns.
            let chunk = match self.reasoning.deadline() {
                Some(deadline) => tokio::select! {
                    () = sleep_until(deadline) => {
                        self.reasoning.flush_timer(&mut events);
                        drain(&mut events, sink);
                        continue;
                    }
                    chunk = byte_stream.next() => chunk,
                },
                None => byte_stream.next().await,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    self.feed_bytes(&bytes, &mut records);
                    let ended = self.process_records(&mut records, &mut events, sink)?;
                    if ended {
                        break;
                    }
                }
                Some(Err(err)) => {
                    return Err(Error::Transport(err.to_string()));
                }
                None => {
                    // Natural end-of-input without a sentinel: same flush
                    // path, after releasing any withheld partial line.
                    self.framer.finish_into(&mut records);
                    self.process_records(&mut records, &mut events, sink)?;
                    break;
                }
            }
        }

        self.finalize(sink)
    }

    /// Process framed records, returning `true` once the stream logically
    /// ended (sentinel or dialect-level stop).
    fn process_records<K: EventSink>(
        &mut self,
        records: &mut Vec<WireRecord>,
        events: &mut Vec<StreamEvent>,
        sink: &mut K,
    ) -> Result<bool, Error> {
        let mut ended = false;
        for record in records.drain(..) {
            match record {
                WireRecord::Sentinel => {
                    ended = true;
                    break;
                }
                WireRecord::Data(payload) => {
                    let result = self.process_payload(&payload, events);
                    if result.is_err() {
                        drain(events, sink);
                    }
                    if result? {
                        ended = true;
                        break;
                    }
                }
            }
        }
        drain(events, sink);
        Ok(ended)
    }

    fn process_payload(
        &mut self,
        payload: &str,
        events: &mut Vec<StreamEvent>,
    ) -> Result<bool, Error> {
        let fragments = match &mut self.dialect {
            DialectState::OpenAi => match serde_json::from_str(payload) {
                Ok(chunk) => reduce_openai_record(chunk),
                Err(err) => {
                    tracing::warn!(%err, "skipping malformed stream record");
                    return Ok(false);
                }
            },
            DialectState::Anthropic(decoder) => match serde_json::from_str(payload) {
                Ok(event) => decoder.reduce(event),
                Err(err) => {
                    tracing::warn!(%err, "skipping malformed stream record");
                    return Ok(false);
                }
            },
        };
        self.route_fragments(fragments, events)
    }

    fn route_fragments(
        &mut self,
        fragments: RecordFragments,
        events: &mut Vec<StreamEvent>,
    ) -> Result<bool, Error> {
        if let Some(message) = fragments.error {
            events.push(StreamEvent::StreamEnd {
                reason: StopReason::Error,
            });
            // The wire carried no HTTP status for an in-band error record.
            return Err(Error::Upstream {
                status: None,
                message,
            });
        }

        self.has_content |= fragments.has_content();

        if let Some(text) = fragments.text {
            self.reasoning.scan_text(&text, events);
        }
        for fragment in fragments.tool_calls {
            self.assembler.accumulate(fragment, events);
        }
        self.reasoning.append_fragments(&fragments.reasoning);
        if let Some(usage) = fragments.usage {
            self.usage.record_usage(usage);
        }
        if let Some(finish) = fragments.finish {
            self.usage.record_finish(finish);
        }

        Ok(fragments.end_of_stream)
    }

    fn finalize<K: EventSink>(mut self, sink: &mut K) -> Result<StreamOutcome, Error> {
        let mut events: Vec<StreamEvent> = Vec::new();
        self.reasoning.finish(&mut events);
        let flushed = self.assembler.flush(self.usage.finish(), &mut events);
        drain(&mut events, sink);
        flushed?;

        if !self.has_content {
            return Err(Error::NoContent);
        }

        let usage = self.usage.report();
        if let Some(report) = usage {
            sink.emit(StreamEvent::Usage(report));
        }
        let stop_reason = self.usage.stop_reason();
        sink.emit(StreamEvent::StreamEnd {
            reason: stop_reason,
        });
        Ok(StreamOutcome::Completed { stop_reason, usage })
    }

    /// Decode raw bytes as UTF-8, carrying over codepoints split across
    /// chunk boundaries, and frame the text into records.
    fn feed_bytes(&mut self, bytes: &[u8], records: &mut Vec<WireRecord>) {
        if self.utf8_remainder.is_empty() {
            match std::str::from_utf8(bytes) {
                Ok(text) => self.framer.feed_into(text, records),
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
                    let text = unsafe { std::str::from_utf8_unchecked(&bytes[..valid_up_to]) };
                    self.framer.feed_into(text, records);
                    self.utf8_remainder.extend_from_slice(&bytes[valid_up_to..]);
                }
            }
        } else {
            self.utf8_remainder.extend_from_slice(bytes);
            match std::str::from_utf8(&self.utf8_remainder) {
                Ok(text) => {
                    self.framer.feed_into(text, records);
                    self.utf8_remainder.clear();
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
                    let text =
                        unsafe { std::str::from_utf8_unchecked(&self.utf8_remainder[..valid_up_to]) };
                    self.framer.feed_into(text, records);
                    if valid_up_to > 0 {
                        let remain_len = self.utf8_remainder.len() - valid_up_to;
                        self.utf8_remainder.copy_within(valid_up_to.., 0);
                        self.utf8_remainder.truncate(remain_len);
                    }
                }
            }
        }
    }
}

fn drain<K: EventSink>(events: &mut Vec<StreamEvent>, sink: &mut K) {
    for event in events.drain(..) {
        sink.emit(event);
    }
}
