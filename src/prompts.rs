//! Judge prompt construction.
//!
//! Three prompt shapes, one per parser ladder step: the full critic rubric,
//! a short rubric used after a truncated reply, and a bare JSON request used
//! when no structured block could be found. Style notes never reach the
//! judge; only ids and texts are rendered.

use uuid::Uuid;

use crate::gateway::Message;
use crate::tournament::types::Candidate;

// =============================================================================
// Scoring criteria
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct Criterion {
    pub name: &'static str,
    pub json_field: &'static str,
    pub short_name: &'static str,
    pub description: &'static str,
}

pub const CRITERIA: [Criterion; 5] = [
    Criterion {
        name: "Clarity & readability",
        json_field: "clarity",
        short_name: "Clarity",
        description: "How readable and well-structured is the prose?",
    },
    Criterion {
        name: "Tone & atmosphere",
        json_field: "tone",
        short_name: "Tone",
        description: "How effectively does it create atmosphere and mood?",
    },
    Criterion {
        name: "Fidelity to original plot points",
        json_field: "plot_fidelity",
        short_name: "Plot Fidelity",
        description: "How accurately does it preserve original story elements?",
    },
    Criterion {
        name: "Fidelity to original intended tone",
        json_field: "tone_fidelity",
        short_name: "Tone Fidelity",
        description: "How well does it match the original's intended emotional impact?",
    },
    Criterion {
        name: "Overall literary quality",
        json_field: "overall",
        short_name: "Overall",
        description: "Holistic assessment of literary merit and effectiveness",
    },
];

// =============================================================================
// Rendered prompt
// =============================================================================

/// Which ladder step a prompt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptShape {
    FullRubric,
    ShortRubric,
    StructuredOnly,
}

impl PromptShape {
    pub fn slug(&self) -> &'static str {
        match self {
            PromptShape::FullRubric => "full_rubric",
            PromptShape::ShortRubric => "short_rubric",
            PromptShape::StructuredOnly => "structured_only",
        }
    }
}

/// Where a judge call sits within a tournament run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSlot {
    pub run_id: Option<Uuid>,
    pub chapter_id: Option<String>,
    /// Sampling slot, e.g. `screening/2`. Two calls with identical prompt
    /// text in different slots are independent samples.
    pub sample: String,
}

/// A prompt ready for the judge oracle.
#[derive(Debug, Clone)]
pub struct JudgePrompt {
    pub shape: PromptShape,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub json_mode: bool,
    pub slot: CallSlot,
}

impl JudgePrompt {
    pub fn with_slot(mut self, slot: CallSlot) -> Self {
        self.slot = slot;
        self
    }

    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }

    /// Prompt size in characters, used for budgeting output tokens.
    pub fn len_chars(&self) -> usize {
        self.system.len() + self.user.len()
    }
}

/// Inputs shared by all three prompt shapes.
#[derive(Debug, Clone, Copy)]
pub struct RankingContext<'a> {
    pub chapter_id: &'a str,
    pub source_text: Option<&'a str>,
    pub candidates: &'a [Candidate],
}

// =============================================================================
// Templates
// =============================================================================

const CRITIC_SYSTEM: &str = "You are a simulation of two literary critics (Critic A and Critic B) discussing prose drafts.

Critic A focuses on technical writing quality, clarity, and structure.
Critic B focuses on creative elements, atmosphere, and storytelling.

Format your response as a conversation, with each critic first evaluating each draft individually.
Then have a brief discussion comparing the merits of each draft.

End your response with a JSON block containing your consensus rankings.";

const SHORT_SYSTEM: &str = "You are a literary critic. Provide rankings with brief analysis.";

const STRUCTURED_SYSTEM: &str =
    "You are a JSON generator. Output only valid JSON with no other text.";

/// `<<<DRAFT_x>>>` sections separated by blank lines, in the given order.
pub fn render_drafts(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .map(|c| format!("<<<{}>>>\nText:\n{}\n<<<END>>>", c.id, c.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn score_fields_example() -> String {
    CRITERIA
        .iter()
        .map(|c| format!("\"{}\": [score]", c.json_field))
        .collect::<Vec<_>>()
        .join(", ")
}

fn ranking_rubric(n: usize) -> String {
    let criteria_list = CRITERIA
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {} (score 1-10)", i + 1, c.name))
        .collect::<Vec<_>>()
        .join("\n");
    let criteria_notes = CRITERIA
        .iter()
        .map(|c| format!("- **{}**: {}", c.short_name, c.description))
        .collect::<Vec<_>>()
        .join("\n");
    let fields = score_fields_example();
    let rows = (1..=n.min(3))
        .map(|r| {
            format!(
                "    {{\"rank\": {r}, \"id\": \"DRAFT_[persona name]\", \"persona\": \"[persona name]\", {fields}}}"
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        "As literary critics, provide an *objective evaluation* of the following prose drafts.

For each draft, provide:
{criteria_list}

Each critic should evaluate each draft first. Then, have a brief discussion about the drafts.
Finally, reach a consensus on the rankings.

**CRITICAL INSTRUCTIONS FOR RANKINGS:**
- Higher scores (closer to 10) = Better performance = Lower rank number (rank 1 is best)
- Your rankings MUST be consistent with your scores
- Rank every draft exactly once; sort the table by rank

**CRITICAL**: Your response must end with structured data in the following JSON format:

```json
{{
  \"table\": [
{rows}
  ],
  \"analysis\": \"Detailed explanation of why the top draft performs best across all criteria...\",
  \"feedback\": {{
    \"DRAFT_[persona name]\": \"Constructive feedback for how this draft could be improved...\"
  }}
}}
```

Use the full 1-10 scale. Scores should reflect genuine differences across the five criteria:
{criteria_notes}

IMPORTANT:
1. The `id` field should be \"DRAFT_[persona name]\"
2. The `persona` field should be just the persona name without \"DRAFT_\" prefix
3. Double-check that your rank order matches your scores before submitting the JSON!"
    )
}

/// Full critic rubric: per-criterion scoring, discussion, then a fenced
/// JSON block. Includes the source text when one is supplied.
pub fn full_rubric(ctx: &RankingContext<'_>, temperature: f32) -> JudgePrompt {
    let n = ctx.candidates.len();
    let source_block = match ctx.source_text.map(str::trim).filter(|s| !s.is_empty()) {
        Some(src) => format!(
            "\nThe original chapter text is provided for judging faithfulness.\n\nRAW SOURCE:\n{src}"
        ),
        None => String::new(),
    };

    let user = format!(
        "Compare {n} anonymous prose drafts of chapter {chapter}.{source_block}

{rubric}

Below are the drafts, separated by markers:

{drafts}",
        chapter = ctx.chapter_id,
        rubric = ranking_rubric(n),
        drafts = render_drafts(ctx.candidates),
    );

    JudgePrompt {
        shape: PromptShape::FullRubric,
        system: CRITIC_SYSTEM.to_string(),
        user,
        temperature,
        json_mode: false,
        slot: CallSlot::default(),
    }
}

/// Terse "rank these, output the table" prompt. Drops the source text and
/// the discussion format so the reply fits the same output budget.
pub fn short_rubric(ctx: &RankingContext<'_>, temperature: f32) -> JudgePrompt {
    let fields = CRITERIA
        .iter()
        .map(|c| c.json_field)
        .collect::<Vec<_>>()
        .join(", ");
    let user = format!(
        "Rank these {n} prose drafts from best (rank 1) to worst:

{drafts}

Rate each draft 1-10 on: {fields}.

End with JSON:
```json
{{\"table\": [{{\"rank\": 1, \"id\": \"DRAFT_name\", \"clarity\": 9, \"tone\": 8, \"plot_fidelity\": 9, \"tone_fidelity\": 8, \"overall\": 9}}], \"analysis\": \"Brief winner analysis\", \"feedback\": {{\"DRAFT_name\": \"Brief feedback\"}}}}
```",
        n = ctx.candidates.len(),
        drafts = render_drafts(ctx.candidates),
    );

    JudgePrompt {
        shape: PromptShape::ShortRubric,
        system: SHORT_SYSTEM.to_string(),
        user,
        temperature,
        json_mode: false,
        slot: CallSlot::default(),
    }
}

/// Bare JSON request. Always temperature 0 with provider JSON mode on.
pub fn structured_only(ctx: &RankingContext<'_>) -> JudgePrompt {
    let user = format!(
        "Based on these drafts, output ONLY valid JSON with this exact structure:

{drafts}

JSON format (copy exactly, replace values):
{{
  \"table\": [
    {{\"rank\": 1, \"id\": \"DRAFT_[persona_name]\", \"clarity\": [1-10], \"tone\": [1-10], \"plot_fidelity\": [1-10], \"tone_fidelity\": [1-10], \"overall\": [1-10]}},
    {{\"rank\": 2, \"id\": \"DRAFT_[persona_name]\", \"clarity\": [1-10], \"tone\": [1-10], \"plot_fidelity\": [1-10], \"tone_fidelity\": [1-10], \"overall\": [1-10]}}
  ],
  \"analysis\": \"[Brief analysis of why top draft wins]\",
  \"feedback\": {{
    \"DRAFT_[persona_name]\": \"[Brief feedback for non-winners]\"
  }}
}}

Output ONLY the JSON object.",
        drafts = render_drafts(ctx.candidates),
    );

    JudgePrompt {
        shape: PromptShape::StructuredOnly,
        system: STRUCTURED_SYSTEM.to_string(),
        user,
        temperature: 0.0,
        json_mode: true,
        slot: CallSlot::default(),
    }
}
