//! The agent session loop ([`session`]) and sub-agent orchestration ([`subagent`]).

pub mod error;
pub mod session;
pub mod subagent;

pub use error::AgentError;
pub use session::{AgentSession, SessionConfig, SessionState};
pub use subagent::{SubAgentHandle, SubAgentManager};
