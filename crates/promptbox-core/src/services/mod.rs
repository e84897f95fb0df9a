//! Services shared by every promptbox client

mod prompts;
mod store;

pub use prompts::PromptService;
pub use store::{FailureSummary, LocalStore, MutationReceipt};
