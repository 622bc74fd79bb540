use crate::{
    completion::{ChatMessage, Completion, CompletionError, CompletionRequest, CompletionSettings},
    types::{BodyMetrics, format_ratio},
};

pub const SYSTEM_PROMPT: &str = "You are a helpful nutritionist AI.";
pub const EMPTY_PLAN: &str = "No diet plan returned";

/// Nutritionist prompt for one captured snapshot.
pub fn build_diet_prompt(metrics: &BodyMetrics) -> String {
    let px = |value: Option<u32>| value.map_or_else(|| "n/a".to_string(), |v| format!("{v}px"));

    format!(
        "You are a nutritionist AI. Create a personalized weight-loss diet plan for a person with the following body metrics:\n\
         - Shoulders: {}\n\
         - Chest: {}\n\
         - Waist: {}\n\
         - Hips: {}\n\
         - Waist/Shoulder Ratio: {}\n\
         - Hip/Waist Ratio: {}\n\
         \n\
         Provide a full-day diet plan (breakfast, lunch, dinner, snacks) with estimated calories.\n\
         Make it concise, practical, and healthy.\n",
        px(metrics.shoulders),
        px(metrics.chest),
        px(metrics.waist),
        px(metrics.hips),
        format_ratio(metrics.waist_to_shoulder_ratio),
        format_ratio(metrics.hip_to_waist_ratio),
    )
}

pub fn diet_request(settings: &CompletionSettings, metrics: &BodyMetrics) -> CompletionRequest {
    CompletionRequest {
        model: settings.model.clone(),
        messages: vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(build_diet_prompt(metrics)),
        ],
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
    }
}

/// Single attempt. An empty reply becomes [`EMPTY_PLAN`].
pub fn generate_diet_plan<C: Completion + ?Sized>(
    client: &C,
    settings: &CompletionSettings,
    metrics: &BodyMetrics,
) -> Result<String, CompletionError> {
    log::info!("requesting diet plan for {}", metrics.summary_text());
    let text = client.complete(&diet_request(settings, metrics))?;
    if text.trim().is_empty() {
        return Ok(EMPTY_PLAN.to_string());
    }
    log::info!("diet plan received: {}...", preview(&text));
    Ok(text)
}

pub(crate) fn preview(text: &str) -> String {
    text.chars().take(100).collect()
}
