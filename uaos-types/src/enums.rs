//! Status and discriminator enums shared across UAOS components.
//!
//! Every enum gets `as_db_str`/`from_db_str` for stable persistence
//! round-tripping plus `Display`/`FromStr` built on top, with parsing
//! tolerant of case/whitespace/underscore variation via [`normalize_token`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalizes a token for case/whitespace/underscore-insensitive matching in
/// `FromStr` impls: lowercase, trim, collapse `-`/` ` runs to `_`.
pub fn normalize_token(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_sep = false;
    for c in s.trim().chars() {
        if c == '-' || c == ' ' || c == '_' {
            if !last_was_sep && !out.is_empty() {
                out.push('_');
            }
            last_was_sep = true;
        } else {
            out.push(c.to_ascii_lowercase());
            last_was_sep = false;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

macro_rules! parse_error {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "invalid {}: '{}'", stringify!($name), self.0)
            }
        }

        impl std::error::Error for $name {}
    };
}

// ============================================================================
// AgentTaskStatus — C5 state machine
// ============================================================================

parse_error!(AgentTaskStatusParseError);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTaskStatus {
    Pending,
    Planning,
    Executing,
    AwaitingInput,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl AgentTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::AwaitingInput => "awaiting_input",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, AgentTaskStatusParseError> {
        Ok(match normalize_token(s).as_str() {
            "pending" => Self::Pending,
            "planning" => Self::Planning,
            "executing" => Self::Executing,
            "awaiting_input" => Self::AwaitingInput,
            "paused" => Self::Paused,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            other => return Err(AgentTaskStatusParseError(other.to_string())),
        })
    }
}

impl fmt::Display for AgentTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for AgentTaskStatus {
    type Err = AgentTaskStatusParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// AgentStepType — C5 step kinds
// ============================================================================

parse_error!(AgentStepTypeParseError);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStepType {
    Reason,
    Act,
    Observe,
    Adjust,
    Complete,
    Error,
}

impl AgentStepType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Reason => "reason",
            Self::Act => "act",
            Self::Observe => "observe",
            Self::Adjust => "adjust",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, AgentStepTypeParseError> {
        Ok(match normalize_token(s).as_str() {
            "reason" => Self::Reason,
            "act" => Self::Act,
            "observe" => Self::Observe,
            "adjust" => Self::Adjust,
            "complete" => Self::Complete,
            "error" => Self::Error,
            other => return Err(AgentStepTypeParseError(other.to_string())),
        })
    }
}

impl fmt::Display for AgentStepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for AgentStepType {
    type Err = AgentStepTypeParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// The agent's next-action decision as returned by the LLM adapter's
/// reasoning call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Tool,
    AskUser,
    AdjustPlan,
    Complete,
}

// ============================================================================
// Route — C6 intent detection
// ============================================================================

parse_error!(RouteParseError);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Pipeline,
    Search,
    Agent,
}

impl Route {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::Search => "search",
            Self::Agent => "agent",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, RouteParseError> {
        Ok(match normalize_token(s).as_str() {
            "pipeline" => Self::Pipeline,
            "search" => Self::Search,
            "agent" => Self::Agent,
            other => return Err(RouteParseError(other.to_string())),
        })
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for Route {
    type Err = RouteParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// MergeStrategy — C2 merge
// ============================================================================

parse_error!(MergeStrategyParseError);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Auto,
    Ours,
    Theirs,
    Union,
}

impl MergeStrategy {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Ours => "ours",
            Self::Theirs => "theirs",
            Self::Union => "union",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, MergeStrategyParseError> {
        Ok(match normalize_token(s).as_str() {
            "auto" => Self::Auto,
            "ours" => Self::Ours,
            "theirs" => Self::Theirs,
            "union" => Self::Union,
            other => return Err(MergeStrategyParseError(other.to_string())),
        })
    }
}

impl Default for MergeStrategy {
    fn default() -> Self {
        Self::Auto
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = MergeStrategyParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// ArcType — C12 book assembler narrative arc
// ============================================================================

parse_error!(ArcTypeParseError);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArcType {
    Chronological,
    Thematic,
    Dramatic,
    Exploratory,
}

impl ArcType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Chronological => "chronological",
            Self::Thematic => "thematic",
            Self::Dramatic => "dramatic",
            Self::Exploratory => "exploratory",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, ArcTypeParseError> {
        Ok(match normalize_token(s).as_str() {
            "chronological" => Self::Chronological,
            "thematic" => Self::Thematic,
            "dramatic" => Self::Dramatic,
            "exploratory" => Self::Exploratory,
            other => return Err(ArcTypeParseError(other.to_string())),
        })
    }
}

impl Default for ArcType {
    fn default() -> Self {
        Self::Chronological
    }
}

impl fmt::Display for ArcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ArcType {
    type Err = ArcTypeParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// HarvestPhase — C11 persona harvest FSM
// ============================================================================

parse_error!(HarvestPhaseParseError);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestPhase {
    Collecting,
    Analyzing,
    Finalizing,
    Complete,
}

impl HarvestPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Analyzing => "analyzing",
            Self::Finalizing => "finalizing",
            Self::Complete => "complete",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, HarvestPhaseParseError> {
        Ok(match normalize_token(s).as_str() {
            "collecting" => Self::Collecting,
            "analyzing" => Self::Analyzing,
            "finalizing" => Self::Finalizing,
            "complete" => Self::Complete,
            other => return Err(HarvestPhaseParseError(other.to_string())),
        })
    }
}

impl fmt::Display for HarvestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for HarvestPhase {
    type Err = HarvestPhaseParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// Period / GroupBy — C7 admin reports
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    Day,
    Month,
}

impl PeriodKind {
    /// Format a timestamp as a period key: `YYYY-MM-DD` for day, `YYYY-MM` for month.
    pub fn key(&self, ts: crate::identity::Timestamp) -> String {
        match self {
            Self::Day => ts.format("%Y-%m-%d").to_string(),
            Self::Month => ts.format("%Y-%m").to_string(),
        }
    }
}

parse_error!(GroupByParseError);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Day,
    Week,
    Month,
    User,
    Tier,
    Model,
    Operation,
}

impl GroupBy {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::User => "user",
            Self::Tier => "tier",
            Self::Model => "model",
            Self::Operation => "operation",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, GroupByParseError> {
        Ok(match normalize_token(s).as_str() {
            "day" => Self::Day,
            "week" => Self::Week,
            "month" => Self::Month,
            "user" => Self::User,
            "tier" => Self::Tier,
            "model" => Self::Model,
            "operation" => Self::Operation,
            other => return Err(GroupByParseError(other.to_string())),
        })
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for GroupBy {
    type Err = GroupByParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// ExportFormat — C12 artifact export
// ============================================================================

parse_error!(ExportFormatParseError);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Markdown,
    Html,
    Json,
}

impl ExportFormat {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Json => "json",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, ExportFormatParseError> {
        Ok(match normalize_token(s).as_str() {
            "markdown" | "md" => Self::Markdown,
            "html" => Self::Html,
            "json" => Self::Json,
            other => return Err(ExportFormatParseError(other.to_string())),
        })
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportFormatParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}
