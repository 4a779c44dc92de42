//! Process-wide chord template library.

use once_cell::sync::Lazy;
use strum::IntoEnumIterator;

use crate::models::chord::{ChordQuality, ChordTemplate, PitchClass};

static STANDARD: Lazy<TemplateLibrary> = Lazy::new(TemplateLibrary::standard);

/// The standard library, built once on first use.
pub fn library() -> &'static TemplateLibrary {
    &STANDARD
}

/// Ordered, read-only set of chord templates.
///
/// Order is canonical: matchers break ties in favour of the earlier template.
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    templates: Vec<ChordTemplate>,
}

impl TemplateLibrary {
    /// Every quality over every root, grouped by quality (all majors, then all minors, ...).
    pub fn standard() -> Self {
        let templates = ChordQuality::iter()
            .flat_map(|quality| PitchClass::all().map(move |root| ChordTemplate::new(root, quality)))
            .collect();
        Self { templates }
    }

    pub fn from_templates(templates: Vec<ChordTemplate>) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &[ChordTemplate] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn find(&self, symbol: &str) -> Option<&ChordTemplate> {
        self.templates.iter().find(|t| t.symbol() == symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.templates.iter().map(ChordTemplate::symbol).collect()
    }
}
