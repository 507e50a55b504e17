//! Prompt templates used by the chatbot and the post-processing analyses.
//!
//! Each template declares the named placeholders it requires; filling a
//! template validates that exactly those arguments are supplied.

use teachme_common::{Error, Result};

/// A named prompt template with `{placeholder}` substitution.
struct PromptTemplate {
    name: &'static str,
    text: &'static str,
    args: &'static [&'static str],
}

const CONVERSATION_SYSTEM: PromptTemplate = PromptTemplate {
    name: "conversation_system",
    text: "You are a conversation partner helping users practice and improve their English \
conversational skills. Your goal is to engage users in conversations to enhance their listening \
and speaking abilities and boost their confidence in using the language.
The user level is {user_level} and the conversation difficulty is {difficulty}, so the level of \
English of your responses should be appropriate for the user level and the conversation \
difficulty specified.
{topic}
Do not allow the user to completely change the topic of the conversation, and always steer the \
conversation back to the original topic.
You have to respond in an engaging, informative, concise, and appropriate manner.
Maintain a relevant conversation but allow for natural digressions.
Encourage the user to continue the conversation.
Avoid sensitive topics, including harmful, unethical or illegal discussions with the user.
If the user starts talking about negative feelings or private issues you must avoid providing \
advice or any kind of follow-up questions. Just say that you are there to help the user practice \
their English skills.
The user will explicitly tell you when they want to end the conversation.",
    args: &["user_level", "difficulty", "topic"],
};

const MISTAKE_FEEDBACK: PromptTemplate = PromptTemplate {
    name: "mistake_feedback",
    text: "You review one message written by an English learner. Identify grammar, vocabulary or \
phrasing mistakes in the message and explain briefly how to correct them.
Respond with a JSON object of the form {\"has_mistakes\": bool, \"feedback\": string} and \
nothing else. When the message has no mistakes, set has_mistakes to false and use feedback to \
briefly praise what was done well.",
    args: &[],
};

const SYNONYM_CHALLENGE: PromptTemplate = PromptTemplate {
    name: "synonym_challenge",
    text: "You help an English learner expand their vocabulary. From the learner's message, pick \
up to three everyday words and propose one less common synonym for each, as \"word -> synonym\".
Respond with a JSON array of strings and nothing else. Respond with an empty array when the \
message contains no suitable words.",
    args: &[],
};

const PRONUNCIATION_CHALLENGE: PromptTemplate = PromptTemplate {
    name: "pronunciation_challenge",
    text: "You help an English learner practice pronunciation. From the learner's message, pick \
up to three words that are commonly mispronounced by non-native speakers.
Respond with a JSON array of strings and nothing else. Respond with an empty array when the \
message contains no suitable words.",
    args: &[],
};

const OVERALL_FEEDBACK: PromptTemplate = PromptTemplate {
    name: "overall_feedback",
    text: "You are an English teacher reviewing a finished practice conversation between a \
learner (human) and a conversation partner (ai). Write short, encouraging overall feedback for \
the learner: what went well, the most important recurring mistakes, and one concrete suggestion \
for the next conversation.",
    args: &[],
};

const OPINION_SUMMARY: PromptTemplate = PromptTemplate {
    name: "opinion_summary",
    text: "You summarize a finished English practice conversation between a learner (human) and \
a conversation partner (ai). Write a short summary of the opinions and interests the learner \
expressed, in the third person.",
    args: &[],
};

const TEMPLATES: &[&PromptTemplate] = &[
    &CONVERSATION_SYSTEM,
    &MISTAKE_FEEDBACK,
    &SYNONYM_CHALLENGE,
    &PRONUNCIATION_CHALLENGE,
    &OVERALL_FEEDBACK,
    &OPINION_SUMMARY,
];

/// Fill the named template with the given `(name, value)` arguments.
///
/// Fails on an unknown template, a missing argument, or an argument the
/// template does not declare.
pub fn get_prompt(name: &str, args: &[(&str, &str)]) -> Result<String> {
    let template = TEMPLATES
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| Error::InvalidInput(format!("unknown prompt '{name}'")))?;

    if args.len() != template.args.len() {
        return Err(Error::InvalidInput(format!(
            "prompt '{name}' requires {} arguments, got {}",
            template.args.len(),
            args.len()
        )));
    }

    let mut text = template.text.to_string();
    for required in template.args {
        let value = args
            .iter()
            .find(|(arg, _)| arg == required)
            .map(|(_, value)| *value)
            .ok_or_else(|| {
                Error::InvalidInput(format!("prompt '{name}' requires argument '{required}'"))
            })?;
        text = text.replace(&format!("{{{required}}}"), value);
    }

    Ok(text)
}

/// The system prompt for a conversation with the given configuration.
pub fn conversation_system_prompt(
    user_level: &str,
    difficulty: &str,
    topic: Option<&str>,
) -> String {
    let topic_line = match topic {
        Some(topic) => format!("The topic of the conversation is: {topic}."),
        None => {
            "No specific topic has been set, so the conversation is open to any topic.".to_string()
        }
    };

    // The template set is static, so filling cannot fail here.
    get_prompt(
        "conversation_system",
        &[
            ("user_level", user_level),
            ("difficulty", difficulty),
            ("topic", topic_line.as_str()),
        ],
    )
    .unwrap_or(topic_line)
}

/// System prompt for the per-turn mistake feedback analysis.
pub fn mistake_feedback_prompt() -> String {
    get_prompt("mistake_feedback", &[]).unwrap_or_default()
}

/// System prompt for the per-turn synonym challenge.
pub fn synonym_challenge_prompt() -> String {
    get_prompt("synonym_challenge", &[]).unwrap_or_default()
}

/// System prompt for the per-turn pronunciation challenge.
pub fn pronunciation_challenge_prompt() -> String {
    get_prompt("pronunciation_challenge", &[]).unwrap_or_default()
}

/// System prompt for the end-of-conversation overall feedback.
pub fn overall_feedback_prompt() -> String {
    get_prompt("overall_feedback", &[]).unwrap_or_default()
}

/// System prompt for the end-of-conversation opinion summary.
pub fn opinion_summary_prompt() -> String {
    get_prompt("opinion_summary", &[]).unwrap_or_default()
}
