//! Generation inputs and their admission-time validation.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use super::errors::ValidationError;

pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TOP_P: f32 = 0.9;

/// Sampling parameters handed to the backend unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
        }
    }
}

impl GenerationParams {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }
}

/// Bounds enforced before a task is admitted.
///
/// The sampling ranges are fixed by the backend contract; `max_tokens` and
/// the prompt length are deployment choices.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamLimits {
    pub max_tokens: RangeInclusive<u32>,
    pub max_prompt_chars: usize,
}

impl Default for ParamLimits {
    fn default() -> Self {
        Self {
            max_tokens: 50..=2000,
            max_prompt_chars: 10_000,
        }
    }
}

impl ParamLimits {
    /// Check a prompt and its parameters. Pure: no side effects either way.
    pub fn validate(&self, prompt: &str, params: &GenerationParams) -> Result<(), ValidationError> {
        if prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }

        let chars = prompt.chars().count();
        if chars > self.max_prompt_chars {
            return Err(ValidationError::PromptTooLong {
                chars,
                max: self.max_prompt_chars,
            });
        }

        if !self.max_tokens.contains(&params.max_tokens) {
            return Err(ValidationError::MaxTokensOutOfRange {
                value: params.max_tokens,
                min: *self.max_tokens.start(),
                max: *self.max_tokens.end(),
            });
        }

        // NaN fails `contains`, so it is rejected here as well.
        if !(0.0..=2.0).contains(&params.temperature) {
            return Err(ValidationError::TemperatureOutOfRange(params.temperature));
        }

        if !(0.0..=1.0).contains(&params.top_p) {
            return Err(ValidationError::TopPOutOfRange(params.top_p));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_admissible() {
        let limits = ParamLimits::default();
        assert!(limits.validate("hello", &GenerationParams::default()).is_ok());
    }

    #[rstest]
    #[case::empty("")]
    #[case::whitespace("   \n\t")]
    fn empty_prompt_is_rejected(#[case] prompt: &str) {
        let err = ParamLimits::default()
            .validate(prompt, &GenerationParams::default())
            .unwrap_err();
        assert_eq!(err, ValidationError::EmptyPrompt);
    }

    #[test]
    fn long_prompt_is_rejected() {
        let limits = ParamLimits {
            max_prompt_chars: 4,
            ..ParamLimits::default()
        };
        let err = limits
            .validate("hello", &GenerationParams::default())
            .unwrap_err();
        assert_eq!(err, ValidationError::PromptTooLong { chars: 5, max: 4 });
    }

    #[rstest]
    #[case::below(49)]
    #[case::above(2001)]
    #[case::zero(0)]
    fn max_tokens_out_of_range(#[case] max_tokens: u32) {
        let params = GenerationParams::default().with_max_tokens(max_tokens);
        let err = ParamLimits::default().validate("p", &params).unwrap_err();
        assert!(matches!(err, ValidationError::MaxTokensOutOfRange { value, .. } if value == max_tokens));
    }

    #[rstest]
    #[case::lower_edge(50)]
    #[case::upper_edge(2000)]
    fn max_tokens_edges_are_inclusive(#[case] max_tokens: u32) {
        let params = GenerationParams::default().with_max_tokens(max_tokens);
        assert!(ParamLimits::default().validate("p", &params).is_ok());
    }

    #[rstest]
    #[case::negative(-0.1)]
    #[case::too_hot(2.01)]
    #[case::nan(f32::NAN)]
    fn temperature_out_of_range(#[case] temperature: f32) {
        let params = GenerationParams::default().with_temperature(temperature);
        let err = ParamLimits::default().validate("p", &params).unwrap_err();
        assert!(matches!(err, ValidationError::TemperatureOutOfRange(_)));
    }

    #[rstest]
    #[case::negative(-0.5)]
    #[case::above_one(1.5)]
    fn top_p_out_of_range(#[case] top_p: f32) {
        let params = GenerationParams::default().with_top_p(top_p);
        let err = ParamLimits::default().validate("p", &params).unwrap_err();
        assert!(matches!(err, ValidationError::TopPOutOfRange(_)));
    }
}
