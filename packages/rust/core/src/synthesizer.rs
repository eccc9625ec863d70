//! Script synthesis: aggregated context + variant → script text.

use std::sync::Arc;
use std::time::Duration;

use notecast_providers::{Generation, TextGenerator};
use notecast_shared::{GenerationKind, NotecastError, Result, Variant};
use tracing::{info, instrument};

/// What the script should sound like, per variant.
fn variant_instruction(variant: Variant) -> &'static str {
    match variant {
        Variant::DeepDive => {
            "Create an engaging 10-15 minute two-host podcast script exploring this topic in depth. \
             The hosts should have a natural conversation, with one explaining concepts and the \
             other asking clarifying questions."
        }
        Variant::Brief => "Create a concise 2-3 minute single-speaker summary of the key points.",
        Variant::Critique => {
            "Create a 5-10 minute two-host analytical discussion examining strengths and \
             weaknesses of the ideas presented."
        }
        Variant::Debate => {
            "Create an 8-15 minute two-host debate script with opposing viewpoints on the topics \
             discussed."
        }
        Variant::Documentary => {
            "Create a documentary-style video script with narration and scene descriptions. \
             Include visual cues for cinematic shots."
        }
        Variant::Explainer => {
            "Create an educational explainer video script. Include on-screen text suggestions \
             and visual aids."
        }
        Variant::Presentation => {
            "Create a business presentation video script with clear sections and bullet points \
             for slides."
        }
    }
}

/// How the script must be laid out so the renderer can use it.
fn format_rules(variant: Variant) -> String {
    match variant.kind() {
        GenerationKind::Audio => "Format the script with clear speaker labels (Host 1:, Host 2:, \
             or Speaker:) for each line of dialogue.\n\
             Make it natural, engaging, and educational."
            .to_string(),
        GenerationKind::Video => {
            let (min, max) = variant.duration_range();
            format!(
                "Format the script with:\n\
                 - [SCENE X: Description] for scene markers\n\
                 - [VISUAL: Description] for visual suggestions\n\
                 - [TEXT ON SCREEN: Content] for text overlays\n\
                 - Clear narration text\n\n\
                 Make it engaging and suitable for a {min}-{max} second video."
            )
        }
    }
}

/// Build the synthesis prompt. Custom instructions, when present, lead as a directive line.
pub fn build_prompt(context: &str, variant: Variant, custom_instructions: Option<&str>) -> String {
    let mut prompt = String::new();
    if let Some(extra) = custom_instructions.map(str::trim).filter(|s| !s.is_empty()) {
        prompt.push_str("Additional instructions: ");
        prompt.push_str(extra);
        prompt.push_str("\n\n");
    }

    let subject = match variant.kind() {
        GenerationKind::Audio => "Content to discuss",
        GenerationKind::Video => "Content to cover",
    };

    prompt.push_str(variant_instruction(variant));
    prompt.push_str(&format!("\n\n{subject}:\n{context}\n\n"));
    prompt.push_str(&format_rules(variant));
    prompt
}

/// A synthesized script plus the generation that produced it.
#[derive(Debug, Clone)]
pub struct Script {
    pub text: String,
    pub generation: Generation,
}

/// Calls the text-generation capability with a bounded timeout.
pub struct ScriptSynthesizer {
    generator: Arc<dyn TextGenerator>,
    model: String,
    timeout: Duration,
}

impl ScriptSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            generator,
            model: model.into(),
            timeout,
        }
    }

    /// Produce a script. Every failure is a [`NotecastError::SynthesisFailed`].
    #[instrument(skip_all, fields(variant = %variant, model = %self.model))]
    pub async fn synthesize(
        &self,
        context: &str,
        variant: Variant,
        custom_instructions: Option<&str>,
    ) -> Result<Script> {
        let prompt = build_prompt(context, variant, custom_instructions);

        let generation =
            match tokio::time::timeout(self.timeout, self.generator.generate(&prompt, &self.model))
                .await
            {
                Ok(Ok(generation)) => generation,
                Ok(Err(e)) => return Err(NotecastError::SynthesisFailed(e.to_string())),
                Err(_) => {
                    return Err(NotecastError::SynthesisFailed(format!(
                        "timed out after {}s",
                        self.timeout.as_secs()
                    )));
                }
            };

        let text = generation.text.trim().to_string();
        if text.is_empty() {
            return Err(NotecastError::SynthesisFailed(
                "model returned an empty script".into(),
            ));
        }

        info!(
            chars = text.chars().count(),
            input_tokens = generation.input_tokens,
            output_tokens = generation.output_tokens,
            "script synthesized"
        );
        Ok(Script { text, generation })
    }
}
