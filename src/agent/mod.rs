//! Agent module - autonomous repository investigation.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Send the goal, a framing instruction and the tool declarations
//! 2. Execute every function call the model requests
//! 3. Feed the results back on the next turn through the continuation handle
//! 4. Stop on a plain-text answer, a failed model call, or the iteration budget

mod agent_loop;
mod prompt;

pub use agent_loop::{Agent, AgentRun, AgentStatus, ToolCallRecord};
pub use prompt::build_system_prompt;
