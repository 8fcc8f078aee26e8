// All LLM prompt constants for the Extraction module.
// Reuses cross-cutting fragments from llm_client::prompts.

/// System prompt for resume extraction.
pub const EXTRACTION_SYSTEM: &str =
    "You are an expert resume parser. \
    Extract structured information from resume text exactly as written. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Extraction prompt template. Replace `{grounding}` and `{resume_text}` before sending.
pub const EXTRACTION_PROMPT_TEMPLATE: &str = r#"Extract the resume below into a single JSON object.

Return a JSON object with this EXACT schema (no extra fields):
{
  "contact": {
    "name": "Jane Doe",
    "email": "jane@example.com",
    "phone": "+1 555-123-4567",
    "address": "Berlin, Germany"
  },
  "education": [
    {
      "institution": "University of Toronto",
      "degree": "B.Sc.",
      "field": "Computer Science",
      "graduationDate": "2016",
      "gpa": "3.8"
    }
  ],
  "experience": [
    {
      "company": "Acme Corp",
      "title": "Senior Engineer",
      "startDate": "Jan 2020",
      "endDate": null,
      "description": "Led migration of billing services to Kubernetes."
    }
  ],
  "skills": ["Rust", "Python"],
  "projects": [
    {
      "name": "Resume Parser",
      "description": "Offline resume extraction service.",
      "technologies": ["Rust", "PostgreSQL"]
    }
  ],
  "certifications": ["AWS Certified Solutions Architect"]
}

Rules:
- "contact.name" is REQUIRED. Use the candidate's full name as written.
- Use null for optional values that are absent: address, field, graduationDate, gpa, endDate.
- Use null for "endDate" when the role is current.
- Use [] for empty lists. Never invent entries to fill a list.
- "skills" and "certifications" are flat lists of strings.
- Keep dates as written in the resume.

{grounding}

RESUME TEXT:
{resume_text}"#;

/// Sent after a reply that could not be parsed. Replace `{error}` and `{resume_text}`.
pub const CORRECTIVE_PROMPT_TEMPLATE: &str = r#"Your previous output was not valid JSON ({error}).

Re-emit the extraction as ONE JSON object following the schema you were given:
top-level keys "contact", "education", "experience", "skills", "projects", "certifications".
Start your reply with { and end it with }. No prose, no code fences.

RESUME TEXT:
{resume_text}"#;
