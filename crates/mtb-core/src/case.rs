//! Case descriptors and the case sheet handed over by the case loader.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::channel::{Channel, ChannelRegistry};
use crate::error::{CampaignError, CampaignResult};

/// One test scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDescriptor {
    /// Execution and display order; unique within a sheet
    pub rank: u32,
    pub name: String,
    /// RMS (dynamic) study case
    #[serde(default, alias = "RMS")]
    pub rms: bool,
    /// EMT study case
    #[serde(default, alias = "EMT")]
    pub emt: bool,
    /// Case-specific fields kept for the record
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CaseDescriptor {
    pub fn new(rank: u32, name: impl Into<String>, rms: bool) -> Self {
        Self {
            rank,
            name: name.into(),
            rms,
            emt: false,
            extra: serde_json::Map::new(),
        }
    }

    /// Whether the case is provisioned by an RMS campaign.
    pub fn is_dynamic(&self) -> bool {
        self.rms
    }

    /// Context name: zero-padded rank, underscore, sanitized case name.
    pub fn context_name(&self, width: usize) -> String {
        context_name(self.rank, &self.name, width)
    }
}

/// Number of digits of the largest rank.
pub fn rank_width(max_rank: u32) -> usize {
    max_rank.to_string().len()
}

/// Build a context name like `03_Fault ride through`.
///
/// Characters other than ASCII alphanumerics, `_`, `-` and spaces are removed.
pub fn context_name(rank: u32, name: &str, width: usize) -> String {
    let clean: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' '))
        .collect();
    format!("{:0width$}_{}", rank, clean, width = width)
}

#[derive(Deserialize)]
struct RawSheet {
    project: String,
    #[serde(default)]
    channels: Vec<Channel>,
    cases: Vec<CaseDescriptor>,
    #[serde(default)]
    bindings: Vec<String>,
}

/// Output of the case loader: project name, ordered cases, channels and the
/// default subscription entries that wire the reference blocks.
#[derive(Debug, Clone)]
pub struct CaseSheet {
    pub project: String,
    cases: Vec<CaseDescriptor>,
    pub channels: ChannelRegistry,
    pub bindings: Vec<String>,
}

impl CaseSheet {
    /// Build a sheet; cases are ordered by rank and ranks must be unique.
    pub fn new(
        project: impl Into<String>,
        mut cases: Vec<CaseDescriptor>,
        channels: Vec<Channel>,
        bindings: Vec<String>,
    ) -> CampaignResult<Self> {
        let mut seen = HashSet::with_capacity(cases.len());
        for case in &cases {
            if !seen.insert(case.rank) {
                return Err(CampaignError::DuplicateRank(case.rank));
            }
        }
        cases.sort_by_key(|c| c.rank);

        Ok(Self {
            project: project.into(),
            cases,
            channels: ChannelRegistry::new(channels)?,
            bindings,
        })
    }

    /// Read a JSON case sheet.
    pub fn load(path: impl AsRef<Path>) -> CampaignResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> CampaignResult<Self> {
        let raw: RawSheet = serde_json::from_str(json)?;
        Self::new(raw.project, raw.cases, raw.channels, raw.bindings)
    }

    /// All cases in ascending rank order.
    pub fn cases(&self) -> &[CaseDescriptor] {
        &self.cases
    }

    /// Cases provisioned by the campaign, in ascending rank order.
    pub fn dynamic_cases(&self) -> impl Iterator<Item = &CaseDescriptor> {
        self.cases.iter().filter(|c| c.is_dynamic())
    }

    /// Largest rank over all cases, dynamic or not.
    pub fn max_rank(&self) -> u32 {
        self.cases.last().map(|c| c.rank).unwrap_or(0)
    }

    pub fn rank_width(&self) -> usize {
        rank_width(self.max_rank())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_name_padding() {
        assert_eq!(context_name(1, "x", rank_width(10)), "01_x");
        assert_eq!(context_name(10, "y", rank_width(10)), "10_y");
        assert_eq!(context_name(7, "a", rank_width(7)), "7_a");
        assert_eq!(context_name(3, "b", rank_width(250)), "003_b");
    }

    #[test]
    fn test_context_name_strips_unsafe_characters() {
        assert_eq!(context_name(2, "FRT 0.5 pu", 1), "2_FRT 05 pu");
        assert_eq!(context_name(2, "a/b\\c:d*e?", 1), "2_abcde");
        assert_eq!(context_name(2, "step_up-1", 1), "2_step_up-1");
    }

    #[test]
    fn test_sheet_orders_cases_by_rank() {
        let sheet = CaseSheet::new(
            "plant",
            vec![
                CaseDescriptor::new(10, "y", true),
                CaseDescriptor::new(1, "x", true),
                CaseDescriptor::new(5, "emt only", false),
            ],
            Vec::new(),
            Vec::new(),
        )
        .unwrap();

        let ranks: Vec<_> = sheet.cases().iter().map(|c| c.rank).collect();
        assert_eq!(ranks, vec![1, 5, 10]);
        let dynamic: Vec<_> = sheet.dynamic_cases().map(|c| c.rank).collect();
        assert_eq!(dynamic, vec![1, 10]);
        assert_eq!(sheet.max_rank(), 10);
        assert_eq!(sheet.rank_width(), 2);
    }

    #[test]
    fn test_sheet_rejects_duplicate_ranks() {
        let result = CaseSheet::new(
            "plant",
            vec![CaseDescriptor::new(1, "a", true), CaseDescriptor::new(1, "b", true)],
            Vec::new(),
            Vec::new(),
        );
        assert!(matches!(result, Err(CampaignError::DuplicateRank(1))));
    }

    #[test]
    fn test_sheet_from_json_keeps_extra_fields() {
        let json = r#"{
            "project": "plant",
            "cases": [
                {"rank": 2, "name": "FRT", "RMS": true, "EMT": true, "Ucl": 0.2},
                {"rank": 1, "name": "SCR", "rms": false}
            ],
            "channels": [{"kind": "constant", "name": "mtb_c_scr", "default": 3.0}],
            "bindings": ["scr.ElmDsl:e:scr=mtb_c_scr:C~x"]
        }"#;
        let sheet = CaseSheet::from_json(json).unwrap();
        assert_eq!(sheet.project, "plant");
        assert_eq!(sheet.cases()[1].rank, 2);
        assert!(sheet.cases()[1].rms);
        assert!(sheet.cases()[1].emt);
        assert_eq!(sheet.cases()[1].extra["Ucl"], serde_json::json!(0.2));
        assert_eq!(sheet.channels.len(), 1);
        assert_eq!(sheet.bindings.len(), 1);
    }

    #[test]
    fn test_empty_sheet_max_rank() {
        let sheet = CaseSheet::new("p", Vec::new(), Vec::new(), Vec::new()).unwrap();
        assert_eq!(sheet.max_rank(), 0);
        assert_eq!(sheet.rank_width(), 1);
    }
}
