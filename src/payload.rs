//! Outbound payload construction.

use crate::config::ProviderConfig;
use crate::models::{ChatMessage, ExplainRequest, ProviderPayload};

/// Substitute `{page_number}` and `{text}` into the prompt template.
///
/// `{text}` is substituted last so placeholders inside user text stay literal.
pub fn render_prompt(template: &str, request: &ExplainRequest) -> String {
    let with_page = template.replace("{page_number}", &request.page_number.to_string());
    match with_page.split_once("{text}") {
        Some((head, tail)) => {
            let mut out = String::with_capacity(head.len() + request.text.len() + tail.len());
            out.push_str(head);
            out.push_str(&request.text);
            out.push_str(&tail.replace("{text}", ""));
            out
        }
        None => with_page,
    }
}

pub fn build_payload(request: &ExplainRequest, provider: &ProviderConfig) -> ProviderPayload {
    ProviderPayload {
        model: provider.model.clone(),
        messages: vec![ChatMessage::user(render_prompt(
            &provider.prompt_template,
            request,
        ))],
        temperature: provider.temperature,
        max_tokens: provider.max_tokens,
    }
}
