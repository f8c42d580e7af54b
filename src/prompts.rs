//! Instruction sent with every text region.
//!
//! Kept here so the wording can be changed (and inspected by tests) without
//! touching the extraction or retry logic. Callers can override it via
//! [`crate::config::PipelineConfig::system_prompt`].

/// Marker the generator emits for a region with no readable text.
pub const BLANK_MARKER: &str = "<!-- blank -->";

/// Default instruction for transcribing one cropped text region.
pub const DEFAULT_REGION_PROMPT: &str = r#"You are transcribing a cropped region of a scanned document page.

Rules:
1. Extract ALL text in the image as Markdown, in natural reading order.
2. Keep the original language. Do not translate.
3. Use Markdown structure only where the image shows it: headings, lists, tables (GFM pipe format), emphasis.
4. If the region contains no readable text, output exactly <!-- blank -->
5. Output ONLY the Markdown. No code fences, no commentary, no explanations."#;

/// The instruction to use for `config_override`, falling back to the default.
pub fn region_prompt(config_override: Option<&str>) -> &str {
    config_override.unwrap_or(DEFAULT_REGION_PROMPT)
}

/// True when a generator response carries no content worth keeping.
pub fn is_blank(response: &str) -> bool {
    let trimmed = response.trim();
    trimmed.is_empty() || trimmed == BLANK_MARKER
}
