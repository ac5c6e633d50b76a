use serde::{Deserialize, Serialize};

/// The five broad node categories. Scheduling treats `control` nodes
/// specially; everything else goes through the connector invoker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
  Trigger,
  Action,
  Tool,
  Control,
  Output,
}

impl NodeCategory {
  pub fn as_str(&self) -> &'static str {
    match self {
      NodeCategory::Trigger => "trigger",
      NodeCategory::Action => "action",
      NodeCategory::Tool => "tool",
      NodeCategory::Control => "control",
      NodeCategory::Output => "output",
    }
  }
}

impl std::fmt::Display for NodeCategory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The fixed node type vocabulary. Each type belongs to exactly one
/// category; `NodeDef` validation rejects mismatched declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
  TriggerManual,
  TriggerEmail,
  TriggerChat,
  TriggerServicenow,
  TriggerSchedule,
  TriggerWebhook,
  OracleQuery,
  UnixCommand,
  LlmAnalysis,
  McpServer,
  ToolHttp,
  ToolTransform,
  ToolScript,
  ToolValidator,
  Condition,
  Parallel,
  OutputEmail,
  OutputChat,
  OutputServicenow,
  OutputSms,
  OutputAlert,
  OutputReport,
  OutputPrint,
  OutputArchive,
}

impl NodeKind {
  /// The category this type belongs to.
  pub fn category(&self) -> NodeCategory {
    use NodeKind::*;
    match self {
      TriggerManual | TriggerEmail | TriggerChat | TriggerServicenow | TriggerSchedule
      | TriggerWebhook => NodeCategory::Trigger,
      OracleQuery | UnixCommand | LlmAnalysis => NodeCategory::Action,
      McpServer | ToolHttp | ToolTransform | ToolScript | ToolValidator => NodeCategory::Tool,
      Condition | Parallel => NodeCategory::Control,
      OutputEmail | OutputChat | OutputServicenow | OutputSms | OutputAlert | OutputReport
      | OutputPrint | OutputArchive => NodeCategory::Output,
    }
  }

  pub fn as_str(&self) -> &'static str {
    use NodeKind::*;
    match self {
      TriggerManual => "trigger_manual",
      TriggerEmail => "trigger_email",
      TriggerChat => "trigger_chat",
      TriggerServicenow => "trigger_servicenow",
      TriggerSchedule => "trigger_schedule",
      TriggerWebhook => "trigger_webhook",
      OracleQuery => "oracle_query",
      UnixCommand => "unix_command",
      LlmAnalysis => "llm_analysis",
      McpServer => "mcp_server",
      ToolHttp => "tool_http",
      ToolTransform => "tool_transform",
      ToolScript => "tool_script",
      ToolValidator => "tool_validator",
      Condition => "condition",
      Parallel => "parallel",
      OutputEmail => "output_email",
      OutputChat => "output_chat",
      OutputServicenow => "output_servicenow",
      OutputSms => "output_sms",
      OutputAlert => "output_alert",
      OutputReport => "output_report",
      OutputPrint => "output_print",
      OutputArchive => "output_archive",
    }
  }
}

impl std::fmt::Display for NodeKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
  Constant,
  Linear,
  Exponential,
}
