use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique execution (run record) identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow definitions ────────────────────────────────────────

/// A named, owned graph of agents. Loaded, never mutated, by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// One configured LLM-capability invocation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub workflow_id: String,
    pub name: String,
    #[serde(default)]
    pub role: String,
    pub model: String,
    #[serde(default)]
    pub instructions: String,
    /// Capability (tool) ids made available to this agent.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Optional JSON shape the agent's output should follow.
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
}

/// A directed edge. `from_agent_id = None` marks the entry edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub from_agent_id: Option<String>,
    pub to_agent_id: String,
}

impl Connection {
    pub fn entry(id: impl Into<String>, workflow_id: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            from_agent_id: None,
            to_agent_id: to.into(),
        }
    }

    pub fn link(
        id: impl Into<String>,
        workflow_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            from_agent_id: Some(from.into()),
            to_agent_id: to.into(),
        }
    }

    pub fn is_entry(&self) -> bool {
        self.from_agent_id.is_none()
    }
}

/// Immutable snapshot of a workflow and its graph, in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub workflow: Workflow,
    pub agents: Vec<Agent>,
    pub connections: Vec<Connection>,
}

/// The opaque record handed to the external agent capability.
#[derive(Debug, Clone, Serialize)]
pub struct AgentInvocation {
    pub workflow_id: String,
    pub agent: Agent,
    pub input: String,
}

// ── Executions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One concrete run of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: String,
    pub owner_id: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub input: String,
    pub error_message: Option<String>,
}

impl Execution {
    pub fn new(
        workflow_id: impl Into<String>,
        owner_id: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id: workflow_id.into(),
            owner_id: owner_id.into(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            input: input.into(),
            error_message: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, result: impl Into<String>) {
        self.status = ExecutionStatus::Completed;
        self.result = Some(result.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
    }
}

/// Lifecycle events of a single run, in strict node order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    NodeActive { node_id: String, agent_name: String },
    NodeComplete { node_id: String, output: String },
    WorkflowComplete { final_output: String },
    Error { content: String },
}

impl RunEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NodeActive { .. } => "node_active",
            Self::NodeComplete { .. } => "node_complete",
            Self::WorkflowComplete { .. } => "workflow_complete",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::WorkflowComplete { .. } | Self::Error { .. })
    }
}

// ── Jobs ────────────────────────────────────────────────────────

/// Timing rule of a job, as registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schedule_type", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Five fields: minute hour day-of-month month day-of-week.
    Cron { expression: String },
    Interval {
        #[serde(default)]
        hours: u32,
        #[serde(default)]
        minutes: u32,
        #[serde(default)]
        seconds: u32,
    },
}

impl ScheduleSpec {
    pub fn schedule_type(&self) -> &'static str {
        match self {
            Self::Cron { .. } => "cron",
            Self::Interval { .. } => "interval",
        }
    }

    /// Human description: the cron expression, or e.g. `1h 30m`.
    pub fn describe(&self) -> String {
        match self {
            Self::Cron { expression } => expression.clone(),
            Self::Interval {
                hours,
                minutes,
                seconds,
            } => {
                let mut parts = Vec::new();
                if *hours > 0 {
                    parts.push(format!("{}h", hours));
                }
                if *minutes > 0 {
                    parts.push(format!("{}m", minutes));
                }
                if *seconds > 0 {
                    parts.push(format!("{}s", seconds));
                }
                if parts.is_empty() {
                    "unknown".to_string()
                } else {
                    parts.join(" ")
                }
            }
        }
    }
}

/// A recurring schedule binding a workflow + input to a trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub workflow_id: String,
    pub owner_id: String,
    pub input: String,
    pub schedule: ScheduleSpec,
    /// Always `None` while paused.
    pub next_fire_time: Option<DateTime<Utc>>,
    pub paused: bool,
}

/// Scheduler lifecycle notices, published on the event bus.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Registered { job_id: String },
    Fired { job_id: String, manual: bool },
    Finished { job_id: String, succeeded: bool },
    Skipped { job_id: String, reason: String },
    Paused { job_id: String },
    Resumed { job_id: String },
    Deleted { job_id: String },
}
