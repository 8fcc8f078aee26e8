// All LLM prompt constants for the RAG module.
// Reuses cross-cutting fragments from llm_client::prompts.

/// Fixed reply for questions the retrieved context cannot answer.
pub const INSUFFICIENT_CONTEXT: &str =
    "The document does not contain enough information to answer this question.";

/// System prompt for grounded question answering.
pub const RAG_SYSTEM: &str =
    "You are a careful assistant answering questions about a single resume. \
    You only know what the numbered context blocks say. \
    Answer in at most three sentences and cite the blocks you used like [1].";

/// Q&A prompt template. Replace `{grounding}`, `{insufficient}`, `{context}` and `{question}`.
pub const RAG_PROMPT_TEMPLATE: &str = r#"Answer the question using ONLY the context blocks below.

{grounding}
If the context does not contain the answer, reply exactly:
"{insufficient}"

CONTEXT:
{context}

QUESTION: {question}

ANSWER:"#;

/// One numbered context block. Replace `{n}`, `{pages}` and `{text}`.
pub const CONTEXT_BLOCK_TEMPLATE: &str = "[{n}] (pages {pages})\n{text}";
