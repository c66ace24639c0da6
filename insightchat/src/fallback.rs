//! Canned answers used when the assistant backend is unavailable.
//!
//! The table is plain data: an ordered list of keyword sets with an answer
//! each. The built-in table can be replaced per deployment by a TOML file:
//!
//! ```toml
//! default_response = "I can help with sales, inventory and F&I questions."
//!
//! [[entries]]
//! keywords = ["f&i", "midwest"]
//! response = "Midwest F&I penetration is ..."
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChatError, Result};

/// One row of the fallback table. Every keyword must appear in the question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub keywords: Vec<String>,
    pub response: String,
}

impl FallbackEntry {
    pub fn new(keywords: &[&str], response: &str) -> Self {
        Self {
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            response: response.to_string(),
        }
    }

    fn matches(&self, lowered: &str) -> bool {
        !self.keywords.is_empty()
            && self
                .keywords
                .iter()
                .all(|k| lowered.contains(&k.to_lowercase()))
    }
}

/// Ordered keyword table; the first matching entry wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackTable {
    pub entries: Vec<FallbackEntry>,
    pub default_response: String,
}

impl Default for FallbackTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FallbackTable {
    /// The demo table shipped with the client.
    pub fn builtin() -> Self {
        Self {
            entries: vec![
                FallbackEntry::new(
                    &["f&i", "midwest"],
                    "Midwest F&I performance: the region averages $1,842 F&I gross per retail unit, \
                     about 6% below the national group average. Service-contract penetration is the \
                     main gap (38% vs. 45% nationally), while GAP penetration is on par. The two \
                     Chicago-area stores lead the region; the Des Moines store trails by $410 per unit.",
                ),
                FallbackEntry::new(
                    &["f&i"],
                    "F&I overview: group-wide F&I gross is $1,960 per retail unit this quarter, up 3% \
                     year over year. Service contracts and GAP account for 71% of F&I revenue.",
                ),
                FallbackEntry::new(
                    &["top", "dealer"],
                    "Top dealerships by total gross this quarter: 1) Lakeside Motors, 2) Northgate \
                     Auto Group, 3) Prairie Ford. Lakeside leads on both new-vehicle volume and \
                     service absorption.",
                ),
                FallbackEntry::new(
                    &["inventory"],
                    "Inventory snapshot: 64 days' supply on new vehicles and 41 days on used. Trucks \
                     and midsize SUVs are the tightest segments; sedans are aging past 90 days at \
                     three stores.",
                ),
                FallbackEntry::new(
                    &["service"],
                    "Service department: customer-pay repair orders are up 5% month over month, with \
                     an average RO of $412. Technician efficiency sits at 112% group-wide.",
                ),
                FallbackEntry::new(
                    &["sales"],
                    "Sales trend: retail units are up 2.4% year to date, driven by used-vehicle \
                     volume. New-vehicle front-end gross is compressing by roughly $150 per unit \
                     per quarter.",
                ),
            ],
            default_response: "The analytics assistant is offline right now, so this is a limited \
                 demo answer. Once it is back I can answer questions about sales trends, dealership \
                 rankings, inventory, service performance and F&I metrics, and generate the SQL and \
                 charts behind them."
                .to_string(),
        }
    }

    /// Load a table from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("{}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| ChatError::Config(e.to_string()))
    }

    /// Answer for `text`: the first entry whose keywords all occur
    /// (case-insensitively), else the default capability description.
    pub fn respond(&self, text: &str) -> &str {
        let lowered = text.to_lowercase();
        match self.entries.iter().position(|e| e.matches(&lowered)) {
            Some(idx) => {
                debug!("Fallback entry {idx} matched");
                &self.entries[idx].response
            }
            None => &self.default_response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn midwest_fi_question_gets_midwest_answer() {
        let table = FallbackTable::builtin();
        let answer = table.respond("How is F&I doing in the Midwest region?");
        assert!(answer.starts_with("Midwest F&I performance"));
    }

    #[test]
    fn first_match_wins() {
        let table = FallbackTable::builtin();
        assert!(table.respond("show me f&i numbers").starts_with("F&I overview"));
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let table = FallbackTable::builtin();
        assert!(table.respond("INVENTORY levels?").starts_with("Inventory snapshot"));
    }

    #[test]
    fn unmatched_text_gets_default() {
        let table = FallbackTable::builtin();
        assert_eq!(table.respond("what's the weather"), table.default_response);
    }

    #[test]
    fn empty_keyword_set_never_matches() {
        let table = FallbackTable {
            entries: vec![FallbackEntry::new(&[], "never")],
            default_response: "default".into(),
        };
        assert_eq!(table.respond("anything"), "default");
    }

    #[test]
    fn custom_table_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"
default_response = "offline"

[[entries]]
keywords = ["Parts", "margin"]
response = "Parts margin is 38%."
"#,
        )
        .unwrap();

        let table = FallbackTable::load(file.path()).unwrap();
        assert_eq!(table.respond("parts MARGIN please"), "Parts margin is 38%.");
        assert_eq!(table.respond("parts only"), "offline");
    }

    #[test]
    fn missing_table_file_is_config_error() {
        let err = FallbackTable::load(Path::new("/nonexistent/table.toml")).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }
}
