//! Chord matching strategies.
//!
//! A strategy turns a chroma vector into a [`ChordMatch`]. The registry maps
//! strategy names to implementations, so new strategies plug in with
//! [`StrategyRegistry::register`] and leave existing ones untouched.

use std::path::PathBuf;
use std::sync::Arc;

use crate::models::analysis::ChordMatch;
use crate::models::audio::ChromaVector;
use crate::models::chord::ChordTemplate;
use crate::services::templates::{self, TemplateLibrary};

pub const TEMPLATE_CORRELATION: &str = "template_correlation";
pub const LEARNED_MODEL: &str = "learned_model";

/// Similarities closer than this count as a tie.
const TIE_TOLERANCE: f64 = 1e-9;

pub trait ChordStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn match_chroma(&self, chroma: &ChromaVector) -> Result<ChordMatch, MatchError>;
}

/// Reference strategy: cosine similarity against every template presence pattern.
#[derive(Debug, Clone, Copy)]
pub struct TemplateCorrelation {
    library: &'static TemplateLibrary,
}

impl Default for TemplateCorrelation {
    fn default() -> Self {
        Self::new(templates::library())
    }
}

impl TemplateCorrelation {
    pub fn new(library: &'static TemplateLibrary) -> Self {
        Self { library }
    }

    /// Cosine similarity in [0, 1]; both vectors are non-negative.
    pub fn similarity(chroma: &ChromaVector, template: &ChordTemplate) -> f64 {
        let pattern = template.pattern_vector();
        let dot: f64 = chroma
            .values()
            .iter()
            .zip(pattern.iter())
            .map(|(c, p)| c * p)
            .sum();
        let denom = chroma.norm() * (template.note_count() as f64).sqrt();
        if denom <= 0.0 {
            return 0.0;
        }
        (dot / denom).clamp(0.0, 1.0)
    }
}

impl ChordStrategy for TemplateCorrelation {
    fn name(&self) -> &str {
        TEMPLATE_CORRELATION
    }

    fn description(&self) -> &str {
        "Cosine similarity between the chroma vector and chord template patterns"
    }

    fn match_chroma(&self, chroma: &ChromaVector) -> Result<ChordMatch, MatchError> {
        let mut best: Option<(&ChordTemplate, f64)> = None;
        for template in self.library.templates() {
            let score = Self::similarity(chroma, template);
            match best {
                Some((_, best_score)) if score <= best_score + TIE_TOLERANCE => {}
                _ => best = Some((template, score)),
            }
        }

        let (template, score) = best.ok_or(MatchError::EmptyLibrary)?;
        Ok(ChordMatch::from_template(template, score))
    }
}

/// Stand-in for a trained model. Reports itself unavailable until one is wired in.
#[derive(Debug, Clone, Default)]
pub struct LearnedModel {
    model_path: Option<PathBuf>,
}

impl LearnedModel {
    pub fn new(model_path: Option<PathBuf>) -> Self {
        Self { model_path }
    }
}

impl ChordStrategy for LearnedModel {
    fn name(&self) -> &str {
        LEARNED_MODEL
    }

    fn description(&self) -> &str {
        "Learned chord model (placeholder, no model loaded)"
    }

    fn match_chroma(&self, _chroma: &ChromaVector) -> Result<ChordMatch, MatchError> {
        Err(MatchError::ModelUnavailable(
            self.model_path
                .as_ref()
                .map(|p| format!("no inference backend for {}", p.display()))
                .unwrap_or_else(|| "model not loaded".to_string()),
        ))
    }
}

/// Name-to-strategy lookup, in registration order.
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn ChordStrategy>>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Template correlation plus the learned-model placeholder.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(TemplateCorrelation::default()));
        registry.register(Arc::new(LearnedModel::default()));
        registry
    }

    /// Adds a strategy, replacing any existing one with the same name.
    pub fn register(&mut self, strategy: Arc<dyn ChordStrategy>) {
        match self.strategies.iter_mut().find(|s| s.name() == strategy.name()) {
            Some(slot) => *slot = strategy,
            None => self.strategies.push(strategy),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChordStrategy>> {
        self.strategies.iter().find(|s| s.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.iter().any(|s| s.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ChordStrategy>> {
        self.strategies.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name().to_string()).collect()
    }

    /// Match with the named strategy.
    pub fn match_chroma(&self, chroma: &ChromaVector, strategy: &str) -> Result<ChordMatch, MatchError> {
        self.get(strategy)
            .ok_or_else(|| MatchError::UnknownStrategy(strategy.to_string()))?
            .match_chroma(chroma)
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("Unknown matching strategy: {0}")]
    UnknownStrategy(String),

    #[error("Chord model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Template library is empty")]
    EmptyLibrary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chord::{ChordQuality, PitchClass};

    fn chroma_of(template: &ChordTemplate) -> ChromaVector {
        ChromaVector::from_energies(template.pattern_vector())
    }

    #[test]
    fn test_exact_template_matches_with_full_confidence() {
        let strategy = TemplateCorrelation::default();
        for symbol in ["G7", "Cmaj7", "F#m", "Dm7", "A#7#11", "E9", "Bdim"] {
            let template = templates::library().find(symbol).unwrap();
            let m = strategy.match_chroma(&chroma_of(template)).unwrap();
            assert_eq!(m.symbol, symbol);
            assert!((m.confidence - 1.0).abs() < 1e-9, "{symbol}: {}", m.confidence);
        }
    }

    #[test]
    fn test_identical_pitch_sets_resolve_to_canonical_order() {
        let strategy = TemplateCorrelation::default();
        // Eaug and G#aug share Caug's notes; C6 shares Am7's.
        let eaug = templates::library().find("Eaug").unwrap();
        assert_eq!(strategy.match_chroma(&chroma_of(eaug)).unwrap().symbol, "Caug");
        let c6 = templates::library().find("C6").unwrap();
        assert_eq!(strategy.match_chroma(&chroma_of(c6)).unwrap().symbol, "Am7");
    }

    #[test]
    fn test_uniform_chroma_picks_first_densest_template() {
        let m = TemplateCorrelation::default()
            .match_chroma(&ChromaVector::uniform())
            .unwrap();
        // Every template scores sqrt(n/12); five-note chords win, C9 comes first.
        assert_eq!(m.symbol, "C9");
        assert!((m.confidence - (5.0f64 / 12.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_match_is_deterministic_and_bounded() {
        let strategy = TemplateCorrelation::default();
        let mut e = [0.0; 12];
        for (i, v) in e.iter_mut().enumerate() {
            *v = ((i * 7919) % 13) as f64 + 0.5;
        }
        let chroma = ChromaVector::from_energies(e);
        let a = strategy.match_chroma(&chroma).unwrap();
        let b = strategy.match_chroma(&chroma).unwrap();
        assert_eq!(a, b);
        assert!((0.0..=1.0).contains(&a.confidence));
    }

    #[test]
    fn test_match_reports_template_fields() {
        let template = ChordTemplate::new(PitchClass::wrapping(2), ChordQuality::Dominant9);
        let m = TemplateCorrelation::default()
            .match_chroma(&chroma_of(&template))
            .unwrap();
        assert_eq!(m.symbol, "D9");
        assert_eq!(m.root.name(), "D");
        assert_eq!(m.quality, ChordQuality::Dominant9);
        assert!(m.extensions.contains("9"));
    }

    #[test]
    fn test_empty_library() {
        let empty: &'static TemplateLibrary = Box::leak(Box::new(TemplateLibrary::from_templates(vec![])));
        let err = TemplateCorrelation::new(empty)
            .match_chroma(&ChromaVector::uniform())
            .unwrap_err();
        assert!(matches!(err, MatchError::EmptyLibrary));
    }

    #[test]
    fn test_learned_model_placeholder_is_unavailable() {
        let err = LearnedModel::default()
            .match_chroma(&ChromaVector::uniform())
            .unwrap_err();
        assert!(matches!(err, MatchError::ModelUnavailable(_)));
    }

    struct AlwaysC;

    impl ChordStrategy for AlwaysC {
        fn name(&self) -> &str {
            "always_c"
        }

        fn description(&self) -> &str {
            "test strategy"
        }

        fn match_chroma(&self, _chroma: &ChromaVector) -> Result<ChordMatch, MatchError> {
            let template = templates::library().find("C").ok_or(MatchError::EmptyLibrary)?;
            Ok(ChordMatch::from_template(template, 0.42))
        }
    }

    #[test]
    fn test_registry_accepts_new_strategies() {
        let mut registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.names(), vec![TEMPLATE_CORRELATION, LEARNED_MODEL]);

        registry.register(Arc::new(AlwaysC));
        let m = registry.match_chroma(&ChromaVector::uniform(), "always_c").unwrap();
        assert_eq!(m.symbol, "C");
        assert_eq!(m.confidence, 0.42);

        assert!(matches!(
            registry.match_chroma(&ChromaVector::uniform(), "nope"),
            Err(MatchError::UnknownStrategy(_))
        ));
    }
}
