//! Voice-activity buffering for incoming audio.
//!
//! Accumulates 16-bit little-endian PCM chunks while the user is speaking
//! and emits one utterance when speech falls back to silence. Pure
//! in-memory bookkeeping; speech-recognition itself happens elsewhere.

/// Result of feeding one audio chunk.
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    /// The chunk's peak amplitude crossed the speech threshold.
    pub is_speaking: bool,
    /// The previous chunk was speech.
    pub was_speaking: bool,
    /// Peak absolute amplitude observed in this chunk.
    pub peak: i16,
    /// A completed utterance (raw PCM bytes), emitted on the
    /// speech-to-silence transition.
    pub utterance: Option<Vec<u8>>,
}

/// Per-stream voice-activity buffer.
#[derive(Debug)]
pub struct VoiceActivityBuffer {
    id: String,
    threshold: i16,
    buffer: Vec<i16>,
    was_speaking: bool,
    utterances: usize,
}

impl VoiceActivityBuffer {
    pub fn new(id: impl Into<String>, threshold: i16) -> Self {
        Self {
            id: id.into(),
            threshold,
            buffer: Vec::new(),
            was_speaking: false,
            utterances: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of utterances emitted so far.
    pub fn utterances(&self) -> usize {
        self.utterances
    }

    /// Feed one chunk of 16-bit little-endian PCM data.
    pub fn handle_chunk(&mut self, data: &[u8]) -> ChunkOutcome {
        let samples = to_samples(data);
        let peak = samples
            .iter()
            .map(|s| s.saturating_abs())
            .max()
            .unwrap_or(0);

        let is_speaking = peak > self.threshold;
        let was_speaking = self.was_speaking;
        self.was_speaking = is_speaking;

        if is_speaking {
            self.buffer.extend_from_slice(&samples);
        }

        let utterance = if !is_speaking && was_speaking {
            self.drain_utterance()
        } else {
            None
        };

        ChunkOutcome {
            is_speaking,
            was_speaking,
            peak,
            utterance,
        }
    }

    fn drain_utterance(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            tracing::debug!(id = %self.id, "utterance ended with an empty buffer");
            return None;
        }

        let bytes = self
            .buffer
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect::<Vec<u8>>();
        self.buffer.clear();
        self.utterances += 1;
        Some(bytes)
    }
}

/// Interpret raw bytes as 16-bit little-endian samples. A trailing odd byte
/// is ignored.
fn to_samples(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_silence_emits_nothing() {
        let mut buffer = VoiceActivityBuffer::new("s1", 500);

        let outcome = buffer.handle_chunk(&pcm(&[10, -20, 30]));
        assert!(!outcome.is_speaking);
        assert!(outcome.utterance.is_none());
        assert_eq!(buffer.utterances(), 0);
    }

    #[test]
    fn test_utterance_emitted_on_speech_to_silence() {
        let mut buffer = VoiceActivityBuffer::new("s1", 500);

        let outcome = buffer.handle_chunk(&pcm(&[1000, -1200]));
        assert!(outcome.is_speaking);
        assert!(outcome.utterance.is_none());

        let outcome = buffer.handle_chunk(&pcm(&[2000, 900]));
        assert!(outcome.is_speaking);

        let outcome = buffer.handle_chunk(&pcm(&[10, 20]));
        assert!(!outcome.is_speaking);
        assert!(outcome.was_speaking);

        let utterance = outcome.utterance.unwrap();
        assert_eq!(utterance, pcm(&[1000, -1200, 2000, 900]));
        assert_eq!(buffer.utterances(), 1);
    }

    #[test]
    fn test_buffer_cleared_between_utterances() {
        let mut buffer = VoiceActivityBuffer::new("s1", 500);

        buffer.handle_chunk(&pcm(&[1000]));
        let first = buffer.handle_chunk(&pcm(&[0])).utterance.unwrap();
        assert_eq!(first, pcm(&[1000]));

        buffer.handle_chunk(&pcm(&[800]));
        let second = buffer.handle_chunk(&pcm(&[0])).utterance.unwrap();
        assert_eq!(second, pcm(&[800]));
        assert_eq!(buffer.utterances(), 2);
    }

    #[test]
    fn test_peak_uses_absolute_amplitude() {
        let mut buffer = VoiceActivityBuffer::new("s1", 500);
        let outcome = buffer.handle_chunk(&pcm(&[-900, 100]));
        assert_eq!(outcome.peak, 900);
        assert!(outcome.is_speaking);
    }

    #[test]
    fn test_min_sample_does_not_overflow() {
        let mut buffer = VoiceActivityBuffer::new("s1", 500);
        let outcome = buffer.handle_chunk(&pcm(&[i16::MIN]));
        assert_eq!(outcome.peak, i16::MAX);
    }

    #[test]
    fn test_odd_trailing_byte_ignored() {
        let mut buffer = VoiceActivityBuffer::new("s1", 500);
        let mut data = pcm(&[100, 200]);
        data.push(0xFF);
        let outcome = buffer.handle_chunk(&data);
        assert_eq!(outcome.peak, 200);
    }

    #[test]
    fn test_empty_chunk_is_silence() {
        let mut buffer = VoiceActivityBuffer::new("s1", 500);
        let outcome = buffer.handle_chunk(&[]);
        assert!(!outcome.is_speaking);
        assert_eq!(outcome.peak, 0);
    }
}
