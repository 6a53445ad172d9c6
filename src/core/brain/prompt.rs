use chrono::{DateTime, SecondsFormat, Utc};

use super::context::ContextSection;
use crate::core::agent::{Agent, SLEEP_DIRECTIVE};
use crate::core::tools::ToolDescriptor;
use crate::core::tools::builtin::sleep_descriptor;

/// Build the cycle prompt. Pure: identical inputs give an identical prompt.
///
/// `tools` should be exactly the descriptors the agent is entitled to; the
/// sleep directive is appended when missing since every agent may sleep.
pub fn build_prompt(
    agent: &Agent,
    context: &[ContextSection],
    now: DateTime<Utc>,
    tools: &[ToolDescriptor],
) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "You are {}, an autonomous agent acting on a fixed schedule.\n\
         Each time you wake you may take at most ONE action by calling one of your tools.\n\n",
        agent.name
    ));

    prompt.push_str("--- PERSONALITY ---\n");
    prompt.push_str(agent.personality.trim());
    prompt.push_str("\n--- END PERSONALITY ---\n\n");

    prompt.push_str(&format!(
        "CURRENT TIME: {}\n\n",
        now.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));

    if !context.is_empty() {
        prompt.push_str("--- CONTEXT ---\n");
        for section in context {
            prompt.push_str(&format!("## {}\n{}\n\n", section.title, section.body.trim_end()));
        }
        prompt.push_str("--- END CONTEXT ---\n\n");
    }

    prompt.push_str("--- AVAILABLE TOOLS ---\n");
    for tool in tools {
        push_tool(&mut prompt, tool);
    }
    if !tools.iter().any(|t| t.name == SLEEP_DIRECTIVE) {
        push_tool(&mut prompt, &sleep_descriptor());
    }
    prompt.push_str("--- END OF TOOLS ---\n\n");

    prompt.push_str(
        "RESPONSE FORMAT:\n\
         Reply with exactly these three lines and nothing else:\n\
         ACTION: <tool name>\n\
         PARAMETERS: <JSON object with the tool's parameters>\n\
         REASON: <one or two sentences explaining why>\n\
         Only use tools listed in AVAILABLE TOOLS. PARAMETERS must be valid JSON \
         (double-quoted keys and strings). If nothing is worth doing, call ",
    );
    prompt.push_str(SLEEP_DIRECTIVE);
    prompt.push_str(".\n");

    prompt
}

fn push_tool(prompt: &mut String, tool: &ToolDescriptor) {
    prompt.push_str(&format!("### [{}] - {}\n", tool.name, tool.description));
    if tool.parameters.is_empty() {
        prompt.push_str("Parameters: none\n");
    } else {
        prompt.push_str("Parameters:\n");
        for param in &tool.parameters {
            let marker = if param.required { "required" } else { "optional" };
            prompt.push_str(&format!(
                "- {} ({}): {}\n",
                param.name, marker, param.description
            ));
        }
    }
    prompt.push_str(&format!(
        "Example:\nACTION: {}\nPARAMETERS: {}\n\n",
        tool.name, tool.example
    ));
}
