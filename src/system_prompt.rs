//! System prompt construction
//!
//! The prompt carries today's date so the model can judge when a question
//! needs fresh information, and lists the tools it may call.

use crate::llm::ToolDefinition;
use chrono::NaiveDate;
use std::fmt::Write;

/// Base system prompt establishing the assistant's role
const BASE_PROMPT: &str = r"You are a helpful, friendly chat assistant.

Be concise in your responses. Answer directly from your own knowledge when you can. When a question concerns current events, news, prices, schedules, or anything that may have changed recently, search the web first and base your answer on what you found, mentioning the sources you used.";

/// Build the system prompt for a conversation turn
pub fn build_system_prompt(today: NaiveDate, tools: &[ToolDefinition]) -> String {
    let mut prompt = String::from(BASE_PROMPT);

    let _ = write!(prompt, "\n\nToday's date is {}.", today.format("%A, %B %-d, %Y"));

    if !tools.is_empty() {
        prompt.push_str("\n\nAvailable tools:\n");
        for tool in tools {
            let summary = tool.description.lines().next().unwrap_or_default();
            let _ = writeln!(prompt, "- {}: {summary}", tool.name);
        }
    }

    prompt
}
