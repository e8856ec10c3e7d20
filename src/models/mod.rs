// Data models for the research orchestrator

pub mod activity;
pub mod state_machine;

pub use activity::{Activity, ActivityAction, ActivityCategory, RecentActivity};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Research
// ============================================================================

/// Lifecycle status of a Research
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ResearchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchStatus::Pending => "pending",
            ResearchStatus::InProgress => "in_progress",
            ResearchStatus::Completed => "completed",
            ResearchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResearchStatus::Completed | ResearchStatus::Failed)
    }
}

impl std::fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResearchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ResearchStatus::Pending),
            "in_progress" => Ok(ResearchStatus::InProgress),
            "completed" => Ok(ResearchStatus::Completed),
            "failed" => Ok(ResearchStatus::Failed),
            _ => Err(format!(
                "Invalid research status: '{}'. Expected 'pending', 'in_progress', 'completed', or 'failed'",
                s
            )),
        }
    }
}

/// One end-to-end research task bound to exactly one output directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Research {
    pub id: String,
    pub topic: String,
    pub status: ResearchStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub project_dir: String,
    /// Number of worker spawns so far, resumes included
    pub total_agents: u32,
}

// ============================================================================
// Agent
// ============================================================================

/// Status of one worker run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Failed)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AgentStatus::Pending),
            "running" => Ok(AgentStatus::Running),
            "completed" => Ok(AgentStatus::Completed),
            "failed" => Ok(AgentStatus::Failed),
            _ => Err(format!(
                "Invalid agent status: '{}'. Expected 'pending', 'running', 'completed', or 'failed'",
                s
            )),
        }
    }
}

/// One spawn of the external worker for a Research
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub research_id: String,
    pub name: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ============================================================================
// Worker parameters
// ============================================================================

/// How thorough the worker should be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDepth {
    Quick,
    Standard,
    Deep,
    Unlimited,
}

impl ResearchDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchDepth::Quick => "quick",
            ResearchDepth::Standard => "standard",
            ResearchDepth::Deep => "deep",
            ResearchDepth::Unlimited => "unlimited",
        }
    }
}

impl Default for ResearchDepth {
    fn default() -> Self {
        ResearchDepth::Standard
    }
}

impl std::fmt::Display for ResearchDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResearchDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quick" => Ok(ResearchDepth::Quick),
            "standard" => Ok(ResearchDepth::Standard),
            "deep" => Ok(ResearchDepth::Deep),
            "unlimited" => Ok(ResearchDepth::Unlimited),
            _ => Err(format!(
                "Invalid research depth: '{}'. Expected 'quick', 'standard', 'deep', or 'unlimited'",
                s
            )),
        }
    }
}

/// Writing style of the generated report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStyle {
    Comprehensive,
    Comparing,
    Practical,
}

impl ResearchStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchStyle::Comprehensive => "comprehensive",
            ResearchStyle::Comparing => "comparing",
            ResearchStyle::Practical => "practical",
        }
    }
}

impl Default for ResearchStyle {
    fn default() -> Self {
        ResearchStyle::Comprehensive
    }
}

impl std::fmt::Display for ResearchStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResearchStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "comprehensive" => Ok(ResearchStyle::Comprehensive),
            "comparing" => Ok(ResearchStyle::Comparing),
            "practical" => Ok(ResearchStyle::Practical),
            _ => Err(format!(
                "Invalid research style: '{}'. Expected 'comprehensive', 'comparing', or 'practical'",
                s
            )),
        }
    }
}
