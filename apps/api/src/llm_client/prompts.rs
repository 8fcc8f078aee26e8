// Shared prompt fragments.
// Each component that needs LLM calls defines its own prompts.rs alongside it;
// this file only holds the cross-cutting pieces.

/// System prompt that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Instruction that keeps answers inside the supplied context.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Use only facts stated in the provided text. \
    Do NOT infer, interpolate, or invent details. \
    If the text does not support a value, leave it empty.";
