//! The feed registry file: where the two feeds live and how to merge them.

use std::path::Path;

use anyhow::{Context, Result};
use fxcal_merge::{
    FilterOptions, MatchPolicyConfig, MergeOptions, SignatureOptions, YearBound,
    DEFAULT_LABEL_PREFIX,
};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Accepts both the YAML registry and the bare `{"primary": .., "secondary": ..}` JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRegistry {
    pub primary: String,
    pub secondary: String,
    #[serde(default)]
    pub calendar_name: Option<String>,
    #[serde(default = "default_secondary_cup_only")]
    pub secondary_cup_only: bool,
    #[serde(default)]
    pub label_prefix: Option<String>,
    #[serde(default)]
    pub exact_time_precheck: bool,
    #[serde(default)]
    pub filter: FilterSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSection {
    #[serde(default)]
    pub subject_team_keyword: Option<String>,
    #[serde(default)]
    pub minimum_year: Option<i32>,
    #[serde(default)]
    pub excluded_year: Option<i32>,
    /// Turns the year restriction off entirely.
    #[serde(default)]
    pub any_year: bool,
    #[serde(default)]
    pub cup_markers: Option<Vec<String>>,
    #[serde(default)]
    pub ignored_tokens: Option<Vec<String>>,
}

fn default_secondary_cup_only() -> bool {
    true
}

impl FeedRegistry {
    pub fn parse_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing feed registry")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn merge_options(&self) -> Result<MergeOptions> {
        let defaults = FilterOptions::default();
        let section = &self.filter;

        let year_bound = if section.any_year {
            if section.minimum_year.is_some() || section.excluded_year.is_some() {
                anyhow::bail!("filter.any_year cannot be combined with minimum_year/excluded_year");
            }
            None
        } else {
            match YearBound::from_options(section.minimum_year, section.excluded_year)
                .context("invalid year filter")?
            {
                Some(bound) => Some(bound),
                None => defaults.year_bound,
            }
        };

        let signature = match &section.ignored_tokens {
            Some(tokens) => SignatureOptions {
                ignored_tokens: tokens.clone(),
            },
            None => SignatureOptions::default(),
        };

        Ok(MergeOptions {
            filter: FilterOptions {
                subject_team_keyword: section
                    .subject_team_keyword
                    .clone()
                    .unwrap_or(defaults.subject_team_keyword),
                year_bound,
                cup_markers: section.cup_markers.clone().unwrap_or(defaults.cup_markers),
            },
            signature,
            policy: MatchPolicyConfig {
                exact_time_precheck: self.exact_time_precheck,
                ..MatchPolicyConfig::default()
            },
            secondary_cup_only: self.secondary_cup_only,
            label_prefix: self
                .label_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_LABEL_PREFIX.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxcal_merge::YearMode;

    #[test]
    fn legacy_json_shape_gets_original_defaults() {
        let registry = FeedRegistry::parse_str(
            r#"{"primary": "https://www.footballwebpages.co.uk/napoli.ics", "secondary": "webcal://fixtur.es/napoli.ics"}"#,
        )
        .unwrap();
        assert!(registry.secondary_cup_only);

        let options = registry.merge_options().unwrap();
        assert_eq!(options, MergeOptions::default());
        assert_eq!(
            options.filter.year_bound,
            Some(YearBound {
                year: 2025,
                mode: YearMode::AtLeast
            })
        );
    }

    #[test]
    fn yaml_filter_block_overrides_defaults() {
        let registry = FeedRegistry::parse_str(
            r#"
primary: feeds/a.ics
secondary: feeds/b.ics
secondary_cup_only: false
label_prefix: "[N] "
exact_time_precheck: true
filter:
  subject_team_keyword: Juventus
  excluded_year: 2024
  cup_markers: ["coppa"]
"#,
        )
        .unwrap();
        let options = registry.merge_options().unwrap();
        assert_eq!(options.filter.subject_team_keyword, "Juventus");
        assert_eq!(options.filter.year_bound, Some(YearBound::excluding(2024)));
        assert_eq!(options.filter.cup_markers, vec!["coppa".to_string()]);
        assert!(!options.secondary_cup_only);
        assert!(options.policy.exact_time_precheck);
        assert_eq!(options.label_prefix, "[N] ");
    }

    #[test]
    fn both_year_keys_is_a_configuration_error() {
        let registry = FeedRegistry::parse_str(
            "primary: a.ics\nsecondary: b.ics\nfilter:\n  minimum_year: 2025\n  excluded_year: 2024\n",
        )
        .unwrap();
        let err = registry.merge_options().unwrap_err();
        assert!(format!("{err:#}").contains("cannot both be set"));
    }

    #[test]
    fn any_year_disables_the_bound() {
        let registry =
            FeedRegistry::parse_str("primary: a.ics\nsecondary: b.ics\nfilter:\n  any_year: true\n")
                .unwrap();
        assert_eq!(registry.merge_options().unwrap().filter.year_bound, None);
    }

    #[test]
    fn missing_secondary_is_rejected() {
        assert!(FeedRegistry::parse_str("primary: a.ics\n").is_err());
    }
}
