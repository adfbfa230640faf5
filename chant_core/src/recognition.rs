//! Phrase recognition adapter.
//!
//! Speech-to-text itself is a black box behind the [`SpeechBackend`]
//! trait; this module owns the parts the engine depends on: counting
//! phrase occurrences in finalized transcript segments (interim segments
//! are ignored so revised transcriptions never double-count), swallowing
//! transient no-speech noise, and keeping the session alive across
//! spurious terminations with a single restart attempt per termination.
//!
//! Emitted match counts are translated by the controller into that many
//! sequential increments against the engine - sequential, not batched,
//! because `down` sub-mode stops early at zero and `timer` sub-mode's
//! running gate is evaluated per unit.

use crossbeam_channel::Sender;

/// Errors a speech backend can raise.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// No recognition capability in this environment
    #[error("speech recognition is not supported in this environment")]
    Unsupported,
    /// Transient "nothing spoken" condition; never surfaced
    #[error("no speech detected")]
    NoSpeech,
    /// Recognition failure
    #[error("recognition failed: {0}")]
    Failed(String),
}

impl From<BackendError> for crate::Error {
    fn from(e: BackendError) -> Self {
        crate::Error::Recognition(e.to_string())
    }
}

/// Signals delivered by a speech backend while listening.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendSignal {
    /// A transcript segment; only `is_final` segments are scanned
    Segment { text: String, is_final: bool },
    /// The listening session ended (requested or spurious)
    Ended,
    Error(BackendError),
}

/// The black-box listening capability.
pub trait SpeechBackend {
    fn start(&mut self) -> Result<(), BackendError>;
    fn stop(&mut self);
}

/// Events the recognizer emits to its consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Phrase occurrences found in one finalized segment; always >= 1
    Matches(u64),
    /// Listening has ended and will not self-restart
    Stopped,
    /// Environment-unsupported or recognition failure
    Error(BackendError),
}

/// Stateful adapter between a speech backend and the counting session.
pub struct PhraseRecognizer<B: SpeechBackend> {
    backend: B,
    phrase: String,
    listening: bool,
    events_tx: Sender<RecognitionEvent>,
}

impl<B: SpeechBackend> PhraseRecognizer<B> {
    pub fn new(backend: B, phrase: impl Into<String>, events_tx: Sender<RecognitionEvent>) -> Self {
        Self {
            backend,
            phrase: phrase.into(),
            listening: false,
            events_tx,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Begin listening. Only valid while stopped; calling again while
    /// already listening is ignored.
    pub fn start(&mut self) {
        if self.listening {
            return;
        }
        match self.backend.start() {
            Ok(()) => {
                self.listening = true;
                tracing::info!("Listening for phrase {:?}", self.phrase);
            }
            Err(e) => {
                tracing::warn!("Backend failed to start: {:?}", e);
                self.emit(RecognitionEvent::Error(e));
            }
        }
    }

    /// Stop listening. Idempotent.
    pub fn stop(&mut self) {
        self.listening = false;
        self.backend.stop();
    }

    /// Process one backend signal.
    pub fn handle_signal(&mut self, signal: BackendSignal) {
        match signal {
            BackendSignal::Segment { text, is_final } => {
                if !is_final {
                    return;
                }
                let matches = count_occurrences(&text, &self.phrase);
                if matches > 0 {
                    tracing::debug!("{} match(es) in finalized segment", matches);
                    self.emit(RecognitionEvent::Matches(matches));
                }
            }
            BackendSignal::Ended => {
                if self.listening {
                    // Spurious termination: try one restart, then give up
                    match self.backend.start() {
                        Ok(()) => tracing::debug!("Restarted listening after spurious end"),
                        Err(e) => {
                            tracing::warn!("Restart failed: {:?}; reporting stopped", e);
                            self.listening = false;
                            self.emit(RecognitionEvent::Stopped);
                        }
                    }
                } else {
                    self.emit(RecognitionEvent::Stopped);
                }
            }
            BackendSignal::Error(BackendError::NoSpeech) => {
                // Stay listening; this is noise
            }
            BackendSignal::Error(e) => {
                self.listening = false;
                self.emit(RecognitionEvent::Error(e));
            }
        }
    }

    fn emit(&self, event: RecognitionEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// Non-overlapping occurrences of `phrase` in `text`.
fn count_occurrences(text: &str, phrase: &str) -> u64 {
    if phrase.is_empty() {
        return 0;
    }
    text.matches(phrase).count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};

    /// Backend whose start attempts succeed until a budget runs out.
    struct FakeBackend {
        starts: u32,
        stops: u32,
        starts_allowed: u32,
    }

    impl FakeBackend {
        fn new(starts_allowed: u32) -> Self {
            Self {
                starts: 0,
                stops: 0,
                starts_allowed,
            }
        }
    }

    impl SpeechBackend for FakeBackend {
        fn start(&mut self) -> Result<(), BackendError> {
            if self.starts < self.starts_allowed {
                self.starts += 1;
                Ok(())
            } else {
                Err(BackendError::Failed("session limit".into()))
            }
        }

        fn stop(&mut self) {
            self.stops += 1;
        }
    }

    fn recognizer(
        starts_allowed: u32,
    ) -> (PhraseRecognizer<FakeBackend>, Receiver<RecognitionEvent>) {
        let (tx, rx) = unbounded();
        (
            PhraseRecognizer::new(FakeBackend::new(starts_allowed), "阿弥陀佛", tx),
            rx,
        )
    }

    fn drain(rx: &Receiver<RecognitionEvent>) -> Vec<RecognitionEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[test]
    fn test_counts_matches_in_final_segments_only() {
        let (mut rec, rx) = recognizer(1);
        rec.start();

        rec.handle_signal(BackendSignal::Segment {
            text: "阿弥陀佛阿弥陀佛".into(),
            is_final: false,
        });
        assert!(drain(&rx).is_empty());

        rec.handle_signal(BackendSignal::Segment {
            text: "阿弥陀佛阿弥陀佛阿弥陀佛".into(),
            is_final: true,
        });
        assert_eq!(drain(&rx), vec![RecognitionEvent::Matches(3)]);
    }

    #[test]
    fn test_zero_match_segments_emit_nothing() {
        let (mut rec, rx) = recognizer(1);
        rec.start();

        rec.handle_signal(BackendSignal::Segment {
            text: "今天天气不错".into(),
            is_final: true,
        });
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_no_speech_is_swallowed() {
        let (mut rec, rx) = recognizer(1);
        rec.start();

        rec.handle_signal(BackendSignal::Error(BackendError::NoSpeech));
        assert!(rec.is_listening());
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_spurious_end_restarts_once() {
        let (mut rec, rx) = recognizer(2);
        rec.start();
        assert!(rec.is_listening());

        rec.handle_signal(BackendSignal::Ended);
        // Restart consumed the second allowed start; still listening
        assert!(rec.is_listening());
        assert!(drain(&rx).is_empty());

        // Next spurious end exhausts the budget and reports stopped
        rec.handle_signal(BackendSignal::Ended);
        assert!(!rec.is_listening());
        assert_eq!(drain(&rx), vec![RecognitionEvent::Stopped]);
    }

    #[test]
    fn test_requested_stop_then_end_reports_stopped() {
        let (mut rec, rx) = recognizer(5);
        rec.start();
        rec.stop();
        rec.stop(); // idempotent

        rec.handle_signal(BackendSignal::Ended);
        assert_eq!(drain(&rx), vec![RecognitionEvent::Stopped]);
        assert_eq!(rec.backend.stops, 2);
        // No restart was attempted after the explicit stop
        assert_eq!(rec.backend.starts, 1);
    }

    #[test]
    fn test_unsupported_environment_surfaced_once() {
        let (mut rec, rx) = recognizer(0);
        rec.start();

        assert!(!rec.is_listening());
        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RecognitionEvent::Error(_)));
    }

    #[test]
    fn test_start_while_listening_is_ignored() {
        let (mut rec, _rx) = recognizer(1);
        rec.start();
        rec.start();
        assert_eq!(rec.backend.starts, 1);
    }

    #[test]
    fn test_recognition_error_stops_listening() {
        let (mut rec, rx) = recognizer(1);
        rec.start();

        rec.handle_signal(BackendSignal::Error(BackendError::Failed("audio".into())));
        assert!(!rec.is_listening());
        assert_eq!(
            drain(&rx),
            vec![RecognitionEvent::Error(BackendError::Failed(
                "audio".into()
            ))]
        );
    }

    #[test]
    fn test_backend_error_converts_to_crate_error() {
        let err: crate::Error = BackendError::Failed("audio device".into()).into();
        assert!(matches!(err, crate::Error::Recognition(_)));
        assert_eq!(
            err.to_string(),
            "Recognition error: recognition failed: audio device"
        );
    }

    #[test]
    fn test_occurrence_counting() {
        assert_eq!(count_occurrences("阿弥陀佛", "阿弥陀佛"), 1);
        assert_eq!(count_occurrences("南无阿弥陀佛，阿弥陀佛", "阿弥陀佛"), 2);
        assert_eq!(count_occurrences("", "阿弥陀佛"), 0);
        assert_eq!(count_occurrences("阿弥陀佛", ""), 0);
    }
}
