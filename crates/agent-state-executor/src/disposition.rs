//! Disposition handling for interrupted tool invocations.

use std::str::FromStr;

use agent_state_core::{InterruptDirective, ResumeCommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Human decision on a gated tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Let the tool call run as requested.
    Accept,
    /// Let the tool call run with edited arguments.
    Edit,
    /// Answer in place of the tool.
    Respond,
    /// Deny the tool call.
    Reject,
}

/// Disposition error.
#[derive(Debug, Error)]
pub enum DispositionError {
    #[error("Unsupported response type: {0}")]
    Unsupported(String),
    #[error("Response type '{0}' requires args")]
    MissingArgs(&'static str),
}

impl FromStr for Disposition {
    type Err = DispositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(Self::Accept),
            "edit" => Ok(Self::Edit),
            "respond" | "response" => Ok(Self::Respond),
            "reject" => Ok(Self::Reject),
            other => Err(DispositionError::Unsupported(other.to_string())),
        }
    }
}

/// Translate a directive into the command handed to the execution context.
///
/// # Errors
/// Returns error for unknown response types, or when `edit`/`respond`
/// arrive without arguments.
pub fn resume_command(directive: &InterruptDirective) -> Result<ResumeCommand, DispositionError> {
    let args = directive.args.as_ref().filter(|a| !a.is_null());
    match directive.response_type.parse::<Disposition>()? {
        Disposition::Accept => Ok(ResumeCommand::Accept),
        Disposition::Reject => Ok(ResumeCommand::Reject),
        Disposition::Edit => args
            .cloned()
            .map(|args| ResumeCommand::Edit { args })
            .ok_or(DispositionError::MissingArgs("edit")),
        Disposition::Respond => args
            .map(|args| ResumeCommand::Respond {
                text: respond_text(args),
            })
            .ok_or(DispositionError::MissingArgs("respond")),
    }
}

fn respond_text(args: &Value) -> String {
    match args {
        Value::String(text) => text.clone(),
        Value::Object(map) => map
            .get("response")
            .or_else(|| map.get("text"))
            .and_then(Value::as_str)
            .map_or_else(|| args.to_string(), str::to_owned),
        other => other.to_string(),
    }
}
