//! Process-level campaign configuration.
//!
//! Read once at startup from a YAML file and immutable for the lifetime of the
//! campaign. Relative paths are resolved against the file's directory.
//!
//! ```yaml
//! case_sheet: cases.json
//! export_dir: export
//! parallel: true
//! copy_grid: Plant
//! subscriptions: "Bus1:u0=mtb_s_1:S~2.0 * x;Ctrl.ElmDsl:Kp=mtb_c_kp:C~x"
//! slots:
//!   pref: { object: "user\\Plant.IntPrj\\...\\ctrl.ElmDsl", attribute: "e:Pref", scale: 1.0 }
//! bridge:
//!   program: mtb-bridge
//!   args: ["--port", "auto"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CampaignError, CampaignResult};

/// Environment variable overriding the JSONL log directory.
pub const LOGS_DIR_ENV: &str = "MTB_LOGS_DIR";

/// Default per-task timeout in seconds.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 3600;

/// Default path of the test-bench root below the network-data folder.
pub const DEFAULT_MODEL_ROOT: &str = r"MTB\MTB";

fn default_timeout() -> u64 {
    DEFAULT_TASK_TIMEOUT_SECS
}

fn default_model_root() -> String {
    DEFAULT_MODEL_ROOT.to_string()
}

fn default_scale() -> f64 {
    1.0
}

/// Redirect of one well-known reference signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Full name of the destination object
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub attribute: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

/// The seven well-known per-reference-signal entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Slots {
    pub pref: Option<SlotConfig>,
    pub qref_q: Option<SlotConfig>,
    pub qref_qu: Option<SlotConfig>,
    pub qref_pf: Option<SlotConfig>,
    pub custom1: Option<SlotConfig>,
    pub custom2: Option<SlotConfig>,
    pub custom3: Option<SlotConfig>,
}

impl Slots {
    /// Slots paired with the signal channel each one reads, in fixed order.
    pub fn signals(&self) -> [(&'static str, Option<&SlotConfig>); 7] {
        [
            ("mtb_s_pref_pu", self.pref.as_ref()),
            ("mtb_s_qref_q_pu", self.qref_q.as_ref()),
            ("mtb_s_qref_qu_pu", self.qref_qu.as_ref()),
            ("mtb_s_qref_pf_pu", self.qref_pf.as_ref()),
            ("mtb_s_1", self.custom1.as_ref()),
            ("mtb_s_2", self.custom2.as_ref()),
            ("mtb_s_3", self.custom3.as_ref()),
        ]
    }
}

/// Command line of the platform bridge process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Campaign configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Case sheet produced by the case loader
    pub case_sheet: PathBuf,
    /// Base directory of the CSV exports; created if missing
    pub export_dir: PathBuf,
    /// Platform-level parallel task execution
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_timeout")]
    pub task_timeout_secs: u64,
    /// Grid name suffix for the initializer copy workaround
    #[serde(default)]
    pub copy_grid: Option<String>,
    #[serde(default = "default_model_root")]
    pub model_root: String,
    /// Semicolon-delimited batch of subscription entries
    #[serde(default)]
    pub subscriptions: String,
    #[serde(default)]
    pub slots: Slots,
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,
    #[serde(default)]
    pub bridge: Option<BridgeConfig>,
}

impl CampaignConfig {
    /// Minimal configuration with defaults for everything optional.
    pub fn new(case_sheet: impl Into<PathBuf>, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            case_sheet: case_sheet.into(),
            export_dir: export_dir.into(),
            parallel: false,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            copy_grid: None,
            model_root: default_model_root(),
            subscriptions: String::new(),
            slots: Slots::default(),
            logs_dir: None,
            bridge: None,
        }
    }

    /// Load a configuration file and resolve its relative paths.
    pub fn load_from(path: &Path) -> CampaignResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CampaignError::Config(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::parse(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parse a YAML document; paths are left as written.
    pub fn parse(yaml: &str) -> CampaignResult<Self> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        if config.copy_grid.as_deref().is_some_and(|g| g.trim().is_empty()) {
            config.copy_grid = None;
        }
        if config.task_timeout_secs == 0 {
            return Err(CampaignError::Config(
                "task_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.case_sheet);
        resolve(&mut self.export_dir);
        if let Some(logs) = self.logs_dir.as_mut() {
            resolve(logs);
        }
        if let Some(bridge) = self.bridge.as_mut() {
            // Bare program names are looked up on PATH
            if bridge.program.components().count() > 1 {
                resolve(&mut bridge.program);
            }
        }
    }

    /// JSONL log directory; the environment wins over the file.
    pub fn effective_logs_dir(&self) -> Option<PathBuf> {
        std::env::var_os(LOGS_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| self.logs_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_defaults() {
        let config = CampaignConfig::parse("case_sheet: cases.json\nexport_dir: out\n").unwrap();
        assert_eq!(config.case_sheet, PathBuf::from("cases.json"));
        assert!(!config.parallel);
        assert_eq!(config.task_timeout_secs, 3600);
        assert_eq!(config.model_root, r"MTB\MTB");
        assert!(config.copy_grid.is_none());
        assert!(config.subscriptions.is_empty());
        assert_eq!(config.slots, Slots::default());
    }

    #[test]
    fn test_parse_slots_and_bridge() {
        let yaml = r#"
case_sheet: cases.json
export_dir: out
parallel: true
copy_grid: ""
slots:
  pref:
    object: 'user\Plant.IntPrj\ctrl.ElmDsl'
    attribute: "e:Pref"
  custom2:
    object: Ctrl
    attribute: Kp
    scale: 0.5
bridge:
  program: mtb-bridge
"#;
        let config = CampaignConfig::parse(yaml).unwrap();
        assert!(config.parallel);
        assert!(config.copy_grid.is_none());

        let pref = config.slots.pref.as_ref().unwrap();
        assert_eq!(pref.attribute, "e:Pref");
        assert_eq!(pref.scale, 1.0);
        assert_eq!(config.slots.custom2.as_ref().unwrap().scale, 0.5);

        let signals = config.slots.signals();
        assert_eq!(signals[0].0, "mtb_s_pref_pu");
        assert!(signals[0].1.is_some());
        assert_eq!(signals[5].0, "mtb_s_2");
        assert!(signals[6].1.is_none());

        let bridge = config.bridge.unwrap();
        assert_eq!(bridge.program, PathBuf::from("mtb-bridge"));
        assert!(bridge.args.is_empty());
    }

    #[test]
    fn test_unknown_slot_is_rejected() {
        let yaml = "case_sheet: a\nexport_dir: b\nslots:\n  qref: {object: x, attribute: y}\n";
        assert!(CampaignConfig::parse(yaml).is_err());
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let yaml = "case_sheet: a\nexport_dir: b\ntask_timeout_secs: 0\n";
        assert!(matches!(
            CampaignConfig::parse(yaml),
            Err(CampaignError::Config(_))
        ));
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mtb.yaml");
        std::fs::write(
            &path,
            "case_sheet: sheets/cases.json\nexport_dir: /abs/out\nlogs_dir: logs\nbridge:\n  program: tools/bridge\n",
        )
        .unwrap();

        let config = CampaignConfig::load_from(&path).unwrap();
        assert_eq!(config.case_sheet, dir.path().join("sheets/cases.json"));
        assert_eq!(config.export_dir, PathBuf::from("/abs/out"));
        assert_eq!(config.logs_dir, Some(dir.path().join("logs")));
        assert_eq!(config.bridge.unwrap().program, dir.path().join("tools/bridge"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = CampaignConfig::load_from(Path::new("/nonexistent/mtb.yaml"));
        assert!(matches!(result, Err(CampaignError::Config(_))));
    }
}
