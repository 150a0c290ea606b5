//! Subscription entry grammar.
//!
//! A subscription entry redirects a channel to an attribute of any object in
//! the simulated model:
//!
//! ```text
//! <path>:<attribute>=<channel>:<kind>~<expression>
//! \user\Project.IntPrj\Network Model\Grid.ElmNet\Bus1.ElmTerm:e:u0=mtb_s_1:S~2.0 * x
//! ```
//!
//! Entries that do not follow the grammar are not errors; they are treated as
//! unrelated free text and produce no binding.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Separator of the batch subscription string.
pub const BATCH_SEPARATOR: char = ';';

const GRAMMAR: &str =
    r#"^([^:*?=",~|\n\r]+):((?:\w:)?\w+(?::\d+)?)=(\w+):(S0|s0|S|s|R|r|T|t|C|c)~(.*)$"#;

fn grammar() -> &'static Regex {
    static COMPILED: OnceLock<Regex> = OnceLock::new();
    COMPILED.get_or_init(|| Regex::new(GRAMMAR).expect("binding grammar is a valid regex"))
}

/// How a channel value reaches its destination attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    /// Continuous set: initial value plus a parameter event per change (`S`)
    Set,
    /// One-shot initial value only (`S0`)
    SetInitial,
    /// Ramped parameter events between consecutive points (`R`)
    Ramp,
    /// Parameter events on value changes only, no initial value (`T`)
    Trigger,
    /// Fixed constant (`C`); on a signal channel it behaves like `Set`
    Constant,
}

impl BindingKind {
    /// Parse the kind code, case-insensitively.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "s" => Some(Self::Set),
            "s0" => Some(Self::SetInitial),
            "r" => Some(Self::Ramp),
            "t" => Some(Self::Trigger),
            "c" => Some(Self::Constant),
            _ => None,
        }
    }

    /// Canonical code as written in entries.
    pub fn code(self) -> &'static str {
        match self {
            Self::Set => "S",
            Self::SetInitial => "S0",
            Self::Ramp => "R",
            Self::Trigger => "T",
            Self::Constant => "C",
        }
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One parsed subscription entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    /// Path of the destination object in the model tree
    pub object_path: String,
    /// Destination attribute, e.g. `e:u0` or `params:2`
    pub attribute: String,
    /// Name of the source channel
    pub channel: String,
    pub kind: BindingKind,
    /// Unparsed transform over the implicit input `x`
    pub expression: String,
}

impl Binding {
    /// Parse one entry; `None` when the text does not follow the grammar.
    ///
    /// Surrounding whitespace is ignored so multi-line batches stay readable.
    pub fn parse(entry: &str) -> Option<Self> {
        let caps = grammar().captures(entry.trim())?;
        let kind = BindingKind::from_code(&caps[4])?;
        Some(Self {
            object_path: caps[1].to_string(),
            attribute: caps[2].to_string(),
            channel: caps[3].to_string(),
            kind,
            expression: caps[5].to_string(),
        })
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}={}:{}~{}",
            self.object_path, self.attribute, self.channel, self.kind, self.expression
        )
    }
}

/// Split a batch string into its entries.
pub fn split_batch(batch: &str) -> impl Iterator<Item = &str> {
    batch.split(BATCH_SEPARATOR)
}
