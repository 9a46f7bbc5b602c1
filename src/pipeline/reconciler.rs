//! Merging overlapping chunk transcripts into one append-only stream.
//!
//! Consecutive chunks share `overlap_duration` of audio, so the start
//! of each transcript usually repeats the end of the previous one.
//! The reconciler keeps a short tail of normalized words already
//! emitted, finds the longest tail suffix equal to a prefix of the
//! new chunk's words, and appends only the remainder. When no overlap
//! is found where one was expected, the full text is appended with a
//! `PossibleDuplication` warning; guessing and dropping words would
//! risk losing real speech.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::defaults;
use crate::error::ReconcileWarning;
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::stats::SessionCounters;
use crate::pipeline::types::{TranscriptAppend, TranscriptResult};

/// Injectable time source so reorder timeouts are testable.
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Lowercases and strips non-alphanumeric characters per word.
///
/// Returns the normalized words plus, for each, the index of the
/// original word it came from. Words that normalize to nothing
/// (pure punctuation) are skipped.
fn normalize_words(words: &[&str]) -> (Vec<String>, Vec<usize>) {
    let mut norms = Vec::with_capacity(words.len());
    let mut origins = Vec::with_capacity(words.len());
    for (index, word) in words.iter().enumerate() {
        let cleaned: String = word
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(|c| c.to_lowercase())
            .collect();
        if !cleaned.is_empty() {
            norms.push(cleaned);
            origins.push(index);
        }
    }
    (norms, origins)
}

/// Orders results by chunk sequence and strips overlap repetition.
pub struct Reconciler {
    overlap_enabled: bool,
    tail_words: usize,
    reorder_timeout: Duration,
    clock: Box<dyn Clock>,
    counters: Arc<SessionCounters>,
    /// Results that arrived ahead of the next expected sequence.
    pending: BTreeMap<u64, TranscriptResult>,
    next_sequence: u64,
    /// Normalized form of the last words emitted.
    tail: Vec<String>,
    /// Normalized words of the previous chunk, for the stuck-decoder
    /// repetition guard.
    last_chunk_words: Option<Vec<String>>,
    held_since: Option<Instant>,
    /// A gap warning waiting to ride along on the next append.
    pending_warning: Option<ReconcileWarning>,
}

impl Reconciler {
    pub fn new(overlap_enabled: bool, counters: Arc<SessionCounters>) -> Self {
        Self {
            overlap_enabled,
            tail_words: defaults::RECONCILE_TAIL_WORDS,
            reorder_timeout: defaults::REORDER_TIMEOUT,
            clock: Box::new(SystemClock),
            counters,
            pending: BTreeMap::new(),
            next_sequence: 0,
            tail: Vec::new(),
            last_chunk_words: None,
            held_since: None,
            pending_warning: None,
        }
    }

    /// How many emitted words are kept for overlap matching.
    pub fn with_tail_words(mut self, tail_words: usize) -> Self {
        self.tail_words = tail_words;
        self
    }

    /// How long an out-of-order result may hold up the stream.
    pub fn with_reorder_timeout(mut self, timeout: Duration) -> Self {
        self.reorder_timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Feeds one result in; returns every append now ready, in
    /// sequence order.
    pub fn accept(&mut self, result: TranscriptResult) -> Vec<TranscriptAppend> {
        let mut appends = Vec::new();

        if result.chunk_sequence < self.next_sequence {
            // Already flushed past this sequence; too late to help.
            eprintln!(
                "Warning: dropping late result for chunk {} (stream is at {})",
                result.chunk_sequence, self.next_sequence
            );
            return appends;
        }

        self.pending.insert(result.chunk_sequence, result);
        self.drain_in_order(&mut appends);

        if self.pending.is_empty() {
            self.held_since = None;
        } else {
            let held = *self.held_since.get_or_insert_with(|| self.clock.now());
            if self.clock.now().duration_since(held) >= self.reorder_timeout {
                self.force_flush(&mut appends);
            }
        }
        appends
    }

    /// Flushes everything still held, recording a gap for each
    /// missing sequence. Called at end of stream.
    pub fn flush(&mut self) -> Vec<TranscriptAppend> {
        let mut appends = Vec::new();
        self.force_flush(&mut appends);
        appends
    }

    fn drain_in_order(&mut self, appends: &mut Vec<TranscriptAppend>) {
        while let Some(result) = self.pending.remove(&self.next_sequence) {
            self.next_sequence += 1;
            if let Some(append) = self.reconcile(result) {
                appends.push(append);
            }
        }
    }

    fn force_flush(&mut self, appends: &mut Vec<TranscriptAppend>) {
        while let Some(&sequence) = self.pending.keys().next() {
            if sequence != self.next_sequence {
                let warning = ReconcileWarning::SequenceGap {
                    expected: self.next_sequence,
                    resumed: sequence,
                };
                self.counters.record_gap_warning();
                self.pending_warning = Some(warning);
                self.next_sequence = sequence;
            }
            self.drain_in_order(appends);
        }
        self.held_since = None;
    }

    fn reconcile(&mut self, result: TranscriptResult) -> Option<TranscriptAppend> {
        let sequence = result.chunk_sequence;
        let words: Vec<&str> = result.text.split_whitespace().collect();
        let (norms, origins) = normalize_words(&words);

        if norms.is_empty() {
            // Nothing usable was said here (silence, a degraded
            // chunk, or filtered noise). The next chunk's overlap
            // region was not emitted, so matching against the old
            // tail would only produce false duplication warnings.
            self.tail.clear();
            self.last_chunk_words = None;
            return None;
        }

        if self.overlap_enabled && self.last_chunk_words.as_deref() == Some(norms.as_slice()) {
            // A decoder stuck on the overlap re-emits the identical
            // word sequence; suppress it rather than stutter.
            self.counters.record_repeated_chunk();
            return None;
        }

        let mut duplication = None;
        let mut matched = 0;
        if self.overlap_enabled && !self.tail.is_empty() {
            let longest = self.tail.len().min(norms.len());
            for m in (1..=longest).rev() {
                if self.tail[self.tail.len() - m..] == norms[..m] {
                    matched = m;
                    break;
                }
            }
            if matched == 0 {
                duplication = Some(ReconcileWarning::PossibleDuplication {
                    chunk_sequence: sequence,
                });
                self.counters.record_duplication_warning();
            }
        }

        self.last_chunk_words = Some(norms.clone());

        // Only the words actually appended extend the emitted tail
        for norm in &norms[matched..] {
            self.tail.push(norm.clone());
        }
        let excess = self.tail.len().saturating_sub(self.tail_words);
        self.tail.drain(..excess);

        let first_kept = if matched == 0 {
            0
        } else {
            origins[matched - 1] + 1
        };
        let kept = &words[first_kept..];
        if kept.is_empty() {
            // The whole chunk was overlap; nothing new to say
            return None;
        }

        let warning = self.pending_warning.take().or(duplication);
        Some(TranscriptAppend {
            chunk_sequence: sequence,
            text: kept.join(" "),
            warning,
        })
    }
}

/// Station wrapper between the engine and the sink.
pub struct ReconcilerStation {
    reconciler: Reconciler,
}

impl ReconcilerStation {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }
}

impl Station for ReconcilerStation {
    type Input = TranscriptResult;
    type Output = TranscriptAppend;

    fn process(&mut self, input: TranscriptResult) -> Result<Vec<TranscriptAppend>, StationError> {
        Ok(self.reconciler.accept(input))
    }

    fn flush(&mut self) -> Result<Vec<TranscriptAppend>, StationError> {
        Ok(self.reconciler.flush())
    }

    fn name(&self) -> &'static str {
        "Reconciler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone)]
    struct MockClock {
        current: Arc<Mutex<Instant>>,
    }

    impl MockClock {
        fn new() -> Self {
            Self {
                current: Arc::new(Mutex::new(Instant::now())),
            }
        }

        fn advance(&self, by: Duration) {
            *self.current.lock().unwrap() += by;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            *self.current.lock().unwrap()
        }
    }

    fn result(sequence: u64, text: &str) -> TranscriptResult {
        TranscriptResult {
            chunk_sequence: sequence,
            text: text.to_string(),
            energy: 0.5,
            is_silence: text.is_empty(),
            degraded: false,
            is_final: false,
        }
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(true, SessionCounters::new())
    }

    fn texts(appends: &[TranscriptAppend]) -> Vec<String> {
        appends.iter().map(|a| a.text.clone()).collect()
    }

    #[test]
    fn test_overlap_words_are_deduplicated() {
        let mut reconciler = reconciler();

        let first = reconciler.accept(result(0, "the quick brown"));
        assert_eq!(texts(&first), vec!["the quick brown"]);

        let second = reconciler.accept(result(1, "brown fox jumps"));
        assert_eq!(texts(&second), vec!["fox jumps"]);
        assert!(second[0].warning.is_none());
    }

    #[test]
    fn test_matching_ignores_case_and_punctuation() {
        let mut reconciler = reconciler();
        reconciler.accept(result(0, "The quick BROWN."));

        let appends = reconciler.accept(result(1, "Brown, fox jumps!"));
        // Matching is normalized but the output keeps the original form
        assert_eq!(texts(&appends), vec!["fox jumps!"]);
    }

    #[test]
    fn test_multi_word_overlap_is_stripped() {
        let mut reconciler = reconciler();
        reconciler.accept(result(0, "we were walking down the road"));

        let appends = reconciler.accept(result(1, "down the road towards town"));
        assert_eq!(texts(&appends), vec!["towards town"]);
    }

    #[test]
    fn test_no_match_appends_everything_with_warning() {
        let counters = SessionCounters::new();
        let mut reconciler = Reconciler::new(true, Arc::clone(&counters));
        reconciler.accept(result(0, "alpha beta gamma"));

        let appends = reconciler.accept(result(1, "delta epsilon zeta"));
        assert_eq!(texts(&appends), vec!["delta epsilon zeta"]);
        assert!(matches!(
            appends[0].warning,
            Some(ReconcileWarning::PossibleDuplication { chunk_sequence: 1 })
        ));
        assert_eq!(counters.duplication_warnings(), 1);
    }

    #[test]
    fn test_first_chunk_never_warns() {
        let mut reconciler = reconciler();
        let appends = reconciler.accept(result(0, "hello out there"));
        assert!(appends[0].warning.is_none());
    }

    #[test]
    fn test_zero_overlap_is_plain_concatenation() {
        let counters = SessionCounters::new();
        let mut reconciler = Reconciler::new(false, Arc::clone(&counters));

        reconciler.accept(result(0, "one two"));
        let appends = reconciler.accept(result(1, "two three"));

        // No matching at all: the repeated word is real speech
        assert_eq!(texts(&appends), vec!["two three"]);
        assert!(appends[0].warning.is_none());
        assert_eq!(counters.duplication_warnings(), 0);
    }

    #[test]
    fn test_empty_results_advance_without_output_or_warning() {
        let mut reconciler = reconciler();
        reconciler.accept(result(0, "before the pause"));

        assert!(reconciler.accept(result(1, "")).is_empty());

        // The silent chunk broke overlap continuity, so a fresh start
        // is appended without a duplication warning.
        let appends = reconciler.accept(result(2, "after the pause"));
        assert_eq!(texts(&appends), vec!["after the pause"]);
        assert!(appends[0].warning.is_none());
    }

    #[test]
    fn test_chunk_that_is_all_overlap_emits_nothing() {
        let mut reconciler = reconciler();
        reconciler.accept(result(0, "say hello world"));

        let appends = reconciler.accept(result(1, "hello world"));
        assert!(appends.is_empty());

        // The stream continues normally afterwards
        let next = reconciler.accept(result(2, "world again friend"));
        assert_eq!(texts(&next), vec!["again friend"]);
    }

    #[test]
    fn test_identical_chunk_is_suppressed() {
        let counters = SessionCounters::new();
        let mut reconciler = Reconciler::new(true, Arc::clone(&counters));

        let first = reconciler.accept(result(0, "hello there friend"));
        assert_eq!(first.len(), 1);

        // A stuck decoder repeats the exact same words
        assert!(reconciler.accept(result(1, "Hello there, friend!")).is_empty());
        assert!(reconciler.accept(result(2, "hello there friend")).is_empty());
        assert_eq!(counters.repeated_chunks(), 2);
        assert_eq!(counters.duplication_warnings(), 0);
    }

    #[test]
    fn test_out_of_order_results_are_reordered() {
        let mut reconciler = reconciler();

        assert!(reconciler.accept(result(1, "brown fox jumps")).is_empty());

        let appends = reconciler.accept(result(0, "the quick brown"));
        assert_eq!(texts(&appends), vec!["the quick brown", "fox jumps"]);
        assert_eq!(appends[0].chunk_sequence, 0);
        assert_eq!(appends[1].chunk_sequence, 1);
    }

    #[test]
    fn test_reorder_timeout_forces_flush_with_gap_warning() {
        let counters = SessionCounters::new();
        let clock = MockClock::new();
        let mut reconciler = Reconciler::new(true, Arc::clone(&counters))
            .with_reorder_timeout(Duration::from_secs(30))
            .with_clock(Box::new(clock.clone()));

        // Sequence 0 and 1 never arrive
        assert!(reconciler.accept(result(2, "stranded words here")).is_empty());

        clock.advance(Duration::from_secs(31));
        let appends = reconciler.accept(result(3, "here and onwards"));

        assert_eq!(texts(&appends), vec!["stranded words here", "and onwards"]);
        assert!(matches!(
            appends[0].warning,
            Some(ReconcileWarning::SequenceGap {
                expected: 0,
                resumed: 2
            })
        ));
        assert_eq!(counters.gap_warnings(), 1);
    }

    #[test]
    fn test_results_older_than_the_watermark_are_dropped() {
        let clock = MockClock::new();
        let mut reconciler = reconciler().with_clock(Box::new(clock.clone()));

        reconciler.accept(result(2, "skipping ahead now"));
        clock.advance(Duration::from_secs(31));
        reconciler.accept(result(3, "now keep going"));

        // Sequence 0 finally shows up, far too late
        assert!(reconciler.accept(result(0, "ancient history")).is_empty());

        let appends = reconciler.accept(result(4, "going along fine"));
        assert_eq!(texts(&appends), vec!["along fine"]);
    }

    #[test]
    fn test_flush_drains_pending_with_gap_warning() {
        let counters = SessionCounters::new();
        let mut reconciler = Reconciler::new(true, Arc::clone(&counters));

        reconciler.accept(result(0, "start of it"));
        assert!(reconciler.accept(result(2, "tail end bits")).is_empty());

        let appends = reconciler.flush();
        assert_eq!(texts(&appends), vec!["tail end bits"]);
        assert!(matches!(
            appends[0].warning,
            Some(ReconcileWarning::SequenceGap {
                expected: 1,
                resumed: 2
            })
        ));
        assert_eq!(counters.gap_warnings(), 1);
    }

    #[test]
    fn test_flush_with_nothing_pending_is_empty() {
        let mut reconciler = reconciler();
        reconciler.accept(result(0, "all in order"));
        assert!(reconciler.flush().is_empty());
    }

    #[test]
    fn test_tail_window_bounds_the_match() {
        let mut reconciler = reconciler().with_tail_words(6);
        reconciler.accept(result(0, "w1 w2 w3 w4 w5 w6 w7 w8 w9 w10"));

        // The last six words are still matchable
        let appends = reconciler.accept(result(1, "w5 w6 w7 w8 w9 w10 fresh words"));
        assert_eq!(texts(&appends), vec!["fresh words"]);
    }

    #[test]
    fn test_overlap_starting_past_the_tail_does_not_match() {
        let counters = SessionCounters::new();
        let mut reconciler =
            Reconciler::new(true, Arc::clone(&counters)).with_tail_words(6);
        reconciler.accept(result(0, "w1 w2 w3 w4 w5 w6 w7 w8 w9 w10"));

        // An overlap reaching back 7 words starts before the kept
        // tail, so no suffix/prefix match exists.
        let appends = reconciler.accept(result(1, "w4 w5 w6 w7 w8 w9 w10 more"));
        assert_eq!(texts(&appends), vec!["w4 w5 w6 w7 w8 w9 w10 more"]);
        assert_eq!(counters.duplication_warnings(), 1);
    }

    #[test]
    fn test_appended_text_keeps_original_form() {
        let mut reconciler = reconciler();
        reconciler.accept(result(0, "I SAID hello"));

        let appends = reconciler.accept(result(1, "hello, World! Again."));
        assert_eq!(texts(&appends), vec!["World! Again."]);
    }

    #[test]
    fn test_station_wraps_accept_and_flush() {
        let counters = SessionCounters::new();
        let mut station = ReconcilerStation::new(Reconciler::new(true, counters));

        let appends = station.process(result(0, "hello out there")).unwrap();
        assert_eq!(appends.len(), 1);

        station.process(result(2, "later words arrive")).unwrap();
        let flushed = station.flush().unwrap();
        assert_eq!(flushed.len(), 1);
        assert!(flushed[0].warning.is_some());
        assert_eq!(station.name(), "Reconciler");
    }
}
