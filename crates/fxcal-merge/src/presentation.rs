use fxcal_core::Fixture;

pub const DEFAULT_LABEL_PREFIX: &str = "⚽ ";

/// Prefixes summaries with a fixed marker, never twice.
#[derive(Debug, Clone)]
pub struct Presentation {
    prefix: String,
}

impl Default for Presentation {
    fn default() -> Self {
        Self::new(DEFAULT_LABEL_PREFIX)
    }
}

impl Presentation {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn label_summary(&self, summary: &str) -> String {
        if summary.starts_with(&self.prefix) {
            summary.to_string()
        } else {
            format!("{}{}", self.prefix, summary)
        }
    }

    pub fn label(&self, fixture: &Fixture) -> Fixture {
        fixture.with_summary(self.label_summary(&fixture.summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxcal_core::FeedRole;

    #[test]
    fn labelling_is_idempotent() {
        let presentation = Presentation::default();
        let fixture = Fixture::new(FeedRole::Primary, "Napoli - Inter", None);
        let once = presentation.label(&fixture);
        let twice = presentation.label(&once);
        assert_eq!(once.summary, "⚽ Napoli - Inter");
        assert_eq!(twice, once);
        assert_eq!(fixture.summary, "Napoli - Inter");
    }

    #[test]
    fn empty_prefix_leaves_summary_untouched() {
        let presentation = Presentation::new("");
        assert_eq!(presentation.label_summary("Napoli - Inter"), "Napoli - Inter");
    }
}
