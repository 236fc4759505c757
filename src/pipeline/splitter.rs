//! Streaming sentence splitter for incremental synthesis
//!
//! Generation arrives as small text deltas; synthesis wants whole
//! sentences. The splitter accumulates deltas and emits a unit whenever
//! a sentence terminator is followed by whitespace, so synthesis of the
//! first sentence can start while the rest is still being generated.

/// Accumulates streamed text and yields complete sentences
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a delta, returning any sentences it completed
    pub fn feed(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut sentences = Vec::new();
        loop {
            let mut split_at = None;
            let mut prev_terminator = false;
            for (idx, ch) in self.buffer.char_indices() {
                if prev_terminator && ch.is_whitespace() {
                    split_at = Some(idx);
                    break;
                }
                // "3.14" must not split: the terminator has to be
                // followed by whitespace
                prev_terminator = matches!(ch, '.' | '!' | '?');
            }

            match split_at {
                Some(idx) => {
                    let rest = self.buffer.split_off(idx);
                    let sentence = std::mem::replace(&mut self.buffer, rest);
                    let sentence = sentence.trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence.to_string());
                    }
                    self.buffer = self.buffer.trim_start().to_string();
                }
                None => break,
            }
        }
        sentences
    }

    /// Emit whatever remains after the stream ends
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentence_emitted_at_boundary() {
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.feed("Hello").is_empty());
        assert!(splitter.feed(" there.").is_empty());
        let sentences = splitter.feed(" How");
        assert_eq!(sentences, vec!["Hello there.".to_string()]);
        assert_eq!(splitter.flush(), Some("How".to_string()));
    }

    #[test]
    fn test_multiple_sentences_in_one_delta() {
        let mut splitter = SentenceSplitter::new();
        let sentences = splitter.feed("One. Two! Three? Four");
        assert_eq!(sentences, vec!["One.", "Two!", "Three?"]);
        assert_eq!(splitter.flush(), Some("Four".to_string()));
    }

    #[test]
    fn test_decimal_numbers_not_split() {
        let mut splitter = SentenceSplitter::new();
        let sentences = splitter.feed("Pi is 3.14159 roughly. Yes");
        assert_eq!(sentences, vec!["Pi is 3.14159 roughly."]);
    }

    #[test]
    fn test_flush_on_empty_buffer() {
        let mut splitter = SentenceSplitter::new();
        assert_eq!(splitter.flush(), None);
        splitter.feed("   ");
        assert_eq!(splitter.flush(), None);
    }

    #[test]
    fn test_terminator_split_across_deltas() {
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.feed("Done").is_empty());
        assert!(splitter.feed(".").is_empty());
        let sentences = splitter.feed(" Next");
        assert_eq!(sentences, vec!["Done.".to_string()]);
    }
}
