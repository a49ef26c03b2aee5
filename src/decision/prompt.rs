//! Prompt assembly (§4.7 addition), grounded on the collaborator's
//! `ChatMessage`/`stream_complete` request shape.

use chrono::{FixedOffset, Utc};
use serde::Serialize;

use crate::config::{LlmConfig, PromptsConfig};
use crate::types::{Message, Mode, Role};

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

const TOOL_CATALOG: &str = r#"
Tools available to you, invoked as [tool_name(key=value, ...)] inline in your reply:
- set_mode(mode): switch the active task context.
- end_call(reason): end the call immediately.
- registrar_lead(name, phone): record a caller's contact details.
- process_appointment_request(date, time): search for an appointment slot.
- create_calendar_event(date, time, name): book an appointment.
- edit_calendar_event(event_id, date, time): reschedule an existing appointment.
- delete_calendar_event(event_id): cancel an existing appointment.
- search_calendar_event_by_phone(phone): look up an existing appointment by phone number.
"#;

fn mode_hint(mode: Mode) -> Option<&'static str> {
    match mode {
        Mode::None => None,
        Mode::CaptureLead => Some("The caller is currently being guided through leaving contact details."),
        Mode::CreateAppt => Some("The caller is currently scheduling a new appointment."),
        Mode::EditAppt => Some("The caller is currently editing an existing appointment."),
        Mode::DeleteAppt => Some("The caller is currently cancelling an appointment."),
    }
}

/// Assemble the full message list for one LLM turn: system prompt + tool
/// catalog + current date/mode + as much history as fits within
/// `max_prompt_chars`, trimmed from the oldest entries first.
/// America/Cancun does not observe DST, so a fixed UTC-5 offset is exact
/// year-round rather than an approximation.
fn cancun_offset() -> FixedOffset {
    FixedOffset::west_opt(5 * 3600).expect("UTC-5 is a valid fixed offset")
}

pub fn build_messages(prompts: &PromptsConfig, llm: &LlmConfig, mode: Mode, history: &[Message]) -> Vec<ChatMessage> {
    let now = Utc::now().with_timezone(&cancun_offset());
    let mut system_content = format!(
        "{}\n\nCurrent date/time: {}.\n{}",
        prompts.system_prompt,
        now.format("%A %Y-%m-%d %H:%M"),
        TOOL_CATALOG,
    );
    if let Some(hint) = mode_hint(mode) {
        system_content.push('\n');
        system_content.push_str(hint);
    }

    let mut messages = vec![ChatMessage { role: "system", content: system_content }];
    let budget = llm.max_prompt_chars;
    let mut used: usize = messages[0].content.len();

    let mut included = Vec::new();
    for message in history.iter().rev() {
        let cost = message.content.len();
        if used + cost > budget && !included.is_empty() {
            break;
        }
        used += cost;
        included.push(message);
    }
    included.reverse();

    for message in included {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "user",
        };
        let content = match message.role {
            Role::Tool => format!("[tool result for {}]: {}", message.tool_name.as_deref().unwrap_or("?"), message.content),
            _ => message.content.clone(),
        };
        messages.push(ChatMessage { role, content });
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_includes_tool_catalog_and_date() {
        let messages = build_messages(&PromptsConfig::default(), &LlmConfig::default(), Mode::None, &[]);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("end_call"));
    }

    #[test]
    fn current_time_is_rendered_in_cancun_offset() {
        let expected = Utc::now().with_timezone(&cancun_offset()).format("%Y-%m-%d %H").to_string();
        let messages = build_messages(&PromptsConfig::default(), &LlmConfig::default(), Mode::None, &[]);
        assert!(messages[0].content.contains(&expected));
    }

    #[test]
    fn mode_hint_is_appended_when_mode_is_active() {
        let messages = build_messages(&PromptsConfig::default(), &LlmConfig::default(), Mode::CreateAppt, &[]);
        assert!(messages[0].content.contains("scheduling a new appointment"));
    }

    #[test]
    fn history_is_trimmed_from_the_oldest_entries_first() {
        let mut llm = LlmConfig::default();
        llm.max_prompt_chars = 80;
        let history = vec![
            Message::user("a".repeat(50)),
            Message::assistant("b".repeat(50)),
            Message::user("c".repeat(10)),
        ];
        let messages = build_messages(&PromptsConfig::default(), &llm, Mode::None, &history);
        let joined: String = messages.iter().map(|m| m.content.clone()).collect();
        assert!(joined.contains(&"c".repeat(10)));
        assert!(!joined.contains(&"a".repeat(50)));
    }

    #[test]
    fn tool_message_is_rendered_with_tool_name_prefix() {
        let history = vec![Message::tool("end_call", r#"{"status":"ok"}"#)];
        let messages = build_messages(&PromptsConfig::default(), &LlmConfig::default(), Mode::None, &history);
        assert!(messages.last().unwrap().content.contains("tool result for end_call"));
    }
}
