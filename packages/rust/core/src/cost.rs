//! Cost accounting for executed stages, plus the pre-flight estimate.

use notecast_shared::{GenerationKind, PricingConfig, Variant};

/// Average characters per spoken word, used to size narration.
const CHARS_PER_WORD: f64 = 5.0;

/// Speaking rate assumed by the pre-flight estimate.
const ESTIMATE_WORDS_PER_MINUTE: f64 = 150.0;

/// Flat script-synthesis allowance added to audio estimates.
const ESTIMATE_SCRIPT_COST_USD: f64 = 0.10;

/// Round to micro-dollars so sums stay stable when stored and re-read.
fn round_usd(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Prices each stage the pipeline actually runs.
#[derive(Debug, Clone)]
pub struct CostModel {
    pricing: PricingConfig,
}

impl CostModel {
    pub fn new(pricing: PricingConfig) -> Self {
        Self { pricing }
    }

    /// Token cost of one text generation. Unknown models use the fallback model's price.
    pub fn text_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let price = self
            .pricing
            .models
            .get(model)
            .or_else(|| self.pricing.models.get(&self.pricing.fallback_model));
        let Some(price) = price else {
            return 0.0;
        };
        round_usd(
            input_tokens as f64 / 1_000_000.0 * price.input_per_million
                + output_tokens as f64 / 1_000_000.0 * price.output_per_million,
        )
    }

    /// Cost of rendering: narration is priced per input character, video per second.
    pub fn render_cost(&self, kind: GenerationKind, input_chars: usize, duration_secs: u32) -> f64 {
        round_usd(match kind {
            GenerationKind::Audio => input_chars as f64 * self.pricing.narration_usd_per_char,
            GenerationKind::Video => f64::from(duration_secs) * self.pricing.video_usd_per_second,
        })
    }

    /// Storage cost of publishing `bytes`.
    pub fn publish_cost(&self, bytes: usize) -> f64 {
        round_usd(bytes as f64 / (1024.0 * 1024.0) * self.pricing.publish_usd_per_mb)
    }

    /// Add a stage cost to a running total.
    pub fn accumulate(total: f64, stage: f64) -> f64 {
        round_usd(total + stage.max(0.0))
    }
}

/// Expected duration and cost of a generation, before running it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreflightEstimate {
    pub kind: GenerationKind,
    pub variant: Variant,
    pub duration_seconds: u32,
    pub cost_usd: f64,
}

/// Estimate duration (the variant's target) and cost for a prospective job.
pub fn preflight_estimate(variant: Variant, pricing: &PricingConfig) -> PreflightEstimate {
    let duration_seconds = variant.target_duration_secs();
    let kind = variant.kind();
    let cost_usd = match kind {
        GenerationKind::Audio => {
            let chars =
                f64::from(duration_seconds) / 60.0 * ESTIMATE_WORDS_PER_MINUTE * CHARS_PER_WORD;
            chars * pricing.narration_usd_per_char + ESTIMATE_SCRIPT_COST_USD
        }
        GenerationKind::Video => f64::from(duration_seconds) * pricing.video_usd_per_second,
    };

    PreflightEstimate {
        kind,
        variant,
        duration_seconds,
        cost_usd: round_usd(cost_usd),
    }
}
