//! Local recognition pipeline: chroma extraction + template matching per window.

use std::sync::Arc;
use std::time::Instant;

use crate::models::analysis::{self, AnalysisResult, ResultOrigin, TimedChord};
use crate::models::audio::{AudioSegment, ChromaEnergy};
use crate::models::job::TimeSpan;
use crate::services::chroma::{ChromaError, ChromaExtractor};
use crate::services::decoder;
use crate::services::matcher::{MatchError, StrategyRegistry};

/// Runs the local pipeline. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LocalRecognizer {
    extractor: ChromaExtractor,
    registry: Arc<StrategyRegistry>,
}

impl LocalRecognizer {
    pub fn new(extractor: ChromaExtractor, registry: Arc<StrategyRegistry>) -> Self {
        Self {
            extractor,
            registry,
        }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Analyze a decoded segment. Times in the result are absolute: the segment
    /// is assumed to start at `span.start_time` in the source.
    pub fn analyze(
        &self,
        segment: &AudioSegment,
        span: &TimeSpan,
        strategy: &str,
        window_seconds: Option<f64>,
    ) -> Result<AnalysisResult, RecognitionError> {
        let pcm = decoder::read_pcm(segment.location()).map_err(ChromaError::from)?;
        self.analyze_samples(&pcm.samples, pcm.sample_rate, span.start_time, strategy, window_seconds)
    }

    pub fn analyze_samples(
        &self,
        samples: &[f32],
        sample_rate: u32,
        offset_seconds: f64,
        strategy: &str,
        window_seconds: Option<f64>,
    ) -> Result<AnalysisResult, RecognitionError> {
        let started = Instant::now();
        if samples.is_empty() || sample_rate == 0 {
            return Err(RecognitionError::EmptySegment);
        }
        let strategy_impl = self
            .registry
            .get(strategy)
            .ok_or_else(|| MatchError::UnknownStrategy(strategy.to_string()))?;

        let duration = samples.len() as f64 / sample_rate as f64;
        let boundaries = window_boundaries(duration, window_seconds);

        let mut progression = Vec::with_capacity(boundaries.len().saturating_sub(1));
        let mut total = ChromaEnergy::default();

        for pair in boundaries.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            let from = ((start * sample_rate as f64) as usize).min(samples.len());
            let to = ((end * sample_rate as f64) as usize).min(samples.len());
            let energy = self.extractor.accumulate(&samples[from..to], sample_rate);
            total.merge(&energy);

            let chord = strategy_impl.match_chroma(&energy.to_chroma())?;
            progression.push(TimedChord {
                chord,
                start_time: offset_seconds + start,
                end_time: offset_seconds + end,
            });
        }

        let result = AnalysisResult {
            average_confidence: analysis::average_confidence(&progression),
            key_estimate: analysis::estimate_key(&progression),
            tempo_estimate: None,
            chroma_vector: Some(total.to_chroma()),
            strategy: strategy_impl.name().to_string(),
            origin: ResultOrigin::Local,
            analysis_seconds: started.elapsed().as_secs_f64(),
            chord_progression: progression,
        };

        tracing::debug!(
            strategy = %result.strategy,
            windows = result.chord_progression.len(),
            average_confidence = result.average_confidence,
            "Local recognition complete"
        );

        Ok(result)
    }
}

/// Window edges in seconds relative to the segment start: `[0, w, 2w, ..., duration]`.
///
/// Consecutive windows share an edge, so there are no gaps or overlaps. Without a
/// width the whole segment is one window.
pub fn window_boundaries(duration: f64, window_seconds: Option<f64>) -> Vec<f64> {
    let width = match window_seconds {
        Some(w) if w.is_finite() && w > 0.0 && w < duration => w,
        _ => return vec![0.0, duration],
    };

    // Tolerance keeps float error from producing a sliver window at the end.
    let count = ((duration / width) - 1e-9).ceil().max(1.0) as usize;
    let mut edges: Vec<f64> = (0..count).map(|k| k as f64 * width).collect();
    edges.push(duration);
    edges
}

#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error(transparent)]
    Chroma(#[from] ChromaError),

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error("Segment contains no audio")]
    EmptySegment,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio::ChromaVector;
    use std::f32::consts::PI;

    const SR: u32 = 22_050;

    fn chord_tone(freqs: &[f32], seconds: f32) -> Vec<f32> {
        let n = (seconds * SR as f32) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / SR as f32;
                freqs.iter().map(|f| (2.0 * PI * f * t).sin()).sum::<f32>() / freqs.len() as f32
            })
            .collect()
    }

    fn recognizer() -> LocalRecognizer {
        LocalRecognizer::new(ChromaExtractor::default(), Arc::new(StrategyRegistry::with_defaults()))
    }

    #[test]
    fn test_boundaries_single_window() {
        assert_eq!(window_boundaries(3.0, None), vec![0.0, 3.0]);
        assert_eq!(window_boundaries(3.0, Some(5.0)), vec![0.0, 3.0]);
        assert_eq!(window_boundaries(3.0, Some(-1.0)), vec![0.0, 3.0]);
    }

    #[test]
    fn test_boundaries_tile_without_gaps() {
        let edges = window_boundaries(5.0, Some(2.0));
        assert_eq!(edges, vec![0.0, 2.0, 4.0, 5.0]);

        let edges = window_boundaries(6.0, Some(2.0));
        assert_eq!(edges, vec![0.0, 2.0, 4.0, 6.0]);

        // 0.3 does not divide evenly in binary floating point.
        let edges = window_boundaries(0.9, Some(0.3));
        assert_eq!(edges.len(), 4);
        assert_eq!(*edges.last().unwrap(), 0.9);
    }

    #[test]
    fn test_c_major_triad_is_recognized() {
        let samples = chord_tone(&[261.63, 329.63, 392.00], 1.0);
        let result = recognizer()
            .analyze_samples(&samples, SR, 0.0, "template_correlation", None)
            .unwrap();
        assert_eq!(result.chord_progression.len(), 1);
        assert_eq!(result.primary_chord().unwrap().symbol, "C");
        assert!(result.average_confidence > 0.8);
        assert_eq!(result.origin, ResultOrigin::Local);
    }

    #[test]
    fn test_progression_windows_align_with_offset() {
        let mut samples = chord_tone(&[261.63, 329.63, 392.00], 1.0);
        samples.extend(chord_tone(&[220.00, 261.63, 329.63], 1.0));
        let result = recognizer()
            .analyze_samples(&samples, SR, 10.0, "template_correlation", Some(1.0))
            .unwrap();

        let symbols: Vec<&str> = result
            .chord_progression
            .iter()
            .map(|c| c.chord.symbol.as_str())
            .collect();
        assert_eq!(symbols, vec!["C", "Am"]);

        let first = &result.chord_progression[0];
        let second = &result.chord_progression[1];
        assert_eq!(first.start_time, 10.0);
        assert_eq!(first.end_time, second.start_time);
        assert!((second.end_time - 12.0).abs() < 1e-9);

        let mean = (first.chord.confidence + second.chord.confidence) / 2.0;
        assert!((result.average_confidence - mean).abs() < 1e-12);
    }

    #[test]
    fn test_silence_still_produces_a_match() {
        let result = recognizer()
            .analyze_samples(&vec![0.0; SR as usize], SR, 0.0, "template_correlation", None)
            .unwrap();
        assert!(result.chroma_vector.unwrap().is_uniform(1e-9));
        assert!((0.0..=1.0).contains(&result.average_confidence));
    }

    #[test]
    fn test_dithered_silence_is_treated_as_silence() {
        // Alternating one-LSB values, as left behind by 16-bit dithering.
        let samples: Vec<f32> = (0..SR as usize)
            .map(|i| if i % 3 == 0 { 1.0 / 32768.0 } else { -1.0 / 32768.0 })
            .collect();
        let result = recognizer()
            .analyze_samples(&samples, SR, 0.0, "template_correlation", Some(0.5))
            .unwrap();
        assert!(result.chroma_vector.unwrap().is_uniform(1e-12));

        let uniform_match = StrategyRegistry::with_defaults()
            .match_chroma(&ChromaVector::uniform(), "template_correlation")
            .unwrap();
        for timed in &result.chord_progression {
            assert_eq!(timed.chord.symbol, uniform_match.symbol);
        }
    }

    #[test]
    fn test_placeholder_strategy_fails() {
        let err = recognizer()
            .analyze_samples(&chord_tone(&[440.0], 0.5), SR, 0.0, "learned_model", None)
            .unwrap_err();
        assert!(matches!(err, RecognitionError::Match(MatchError::ModelUnavailable(_))));
    }

    #[test]
    fn test_empty_samples() {
        let err = recognizer()
            .analyze_samples(&[], SR, 0.0, "template_correlation", None)
            .unwrap_err();
        assert!(matches!(err, RecognitionError::EmptySegment));
    }
}
