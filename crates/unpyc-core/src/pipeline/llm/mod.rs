//! LLM-assisted recovery through coding-agent CLIs.

pub mod agent;
pub mod extract;
pub mod prompts;
pub mod recovery;

pub use agent::{agents_available, find_coding_agent, AgentKind};
pub use recovery::{recover, recover_document, ItemState, RecoveryReport};
