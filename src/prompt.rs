//! Prompt construction for menu translation.
//!
//! One instruction body is shared by every backend; [`ModelProfile`] only
//! decides how it is framed into turns and which generation parameters go
//! with it.

use serde::Serialize;

use crate::error::AppError;

const SYSTEM_ROLE: &str =
    "You are a helpful assistant that specializes in translating restaurant menus from English to Chinese.";

const SCHEMA_EXAMPLE: &str = r#"{
  "items": [
    {
      "name": "cleaned up dish name",
      "nameZh": "中文菜名",
      "price": "$XX.XX",
      "descriptionEn": "Brief description of the dish",
      "descriptionZh": "菜品描述（包含主要食材和烹饪方法）"
    }
  ]
}"#;

/// Prompt framing and parameter set for a family of hosted models.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ModelProfile {
    /// Mistral instruct format: `<s>[INST] ... [/INST]`.
    Mixtral,
    /// ChatML turns: `<|im_start|>role ... <|im_end|>`.
    Yi,
    /// Zephyr turns: `<|system|>`, `<|user|>`, `<|assistant|>`.
    Zephyr,
}

impl ModelProfile {
    /// Parses the `MODEL_PROFILE` configuration value.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mixtral" => Ok(Self::Mixtral),
            "yi" => Ok(Self::Yi),
            "zephyr" => Ok(Self::Zephyr),
            other => Err(AppError::configuration(format!(
                "invalid MODEL_PROFILE={other:?}; expected one of mixtral,yi,zephyr"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mixtral => "mixtral",
            Self::Yi => "yi",
            Self::Zephyr => "zephyr",
        }
    }

    /// Default hosted model id for this profile.
    pub fn model_id(self) -> &'static str {
        match self {
            Self::Mixtral => "mistralai/Mixtral-8x7B-Instruct-v0.1",
            Self::Yi => "01-ai/Yi-1.5-34B-Chat",
            Self::Zephyr => "HuggingFaceH4/zephyr-7b-beta",
        }
    }

    /// Generation parameters tuned for structured output on this backend.
    pub fn parameters(self) -> GenerationParams {
        let temperature = match self {
            Self::Mixtral => 0.2,
            Self::Yi => 0.1,
            Self::Zephyr => 0.05,
        };
        GenerationParams {
            max_new_tokens: 1024,
            temperature,
            top_p: 0.95,
            return_full_text: false,
        }
    }

    fn frame(self, body: &str) -> String {
        match self {
            Self::Mixtral => format!("<s>[INST] {SYSTEM_ROLE}\n{body} [/INST]"),
            Self::Yi => format!(
                "<|im_start|>system\n{SYSTEM_ROLE}<|im_end|>\n<|im_start|>user\n{body}<|im_end|>\n<|im_start|>assistant\n"
            ),
            Self::Zephyr => {
                format!("<|system|>\n{SYSTEM_ROLE}</s>\n<|user|>\n{body}</s>\n<|assistant|>\n")
            }
        }
    }
}

/// Sampling parameters sent alongside the prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    /// Return only the newly generated text, not the echoed prompt.
    pub return_full_text: bool,
}

/// Complete request for one inference call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptPayload {
    /// Model id; part of the URL rather than the body.
    #[serde(skip)]
    pub model: String,
    pub inputs: String,
    pub parameters: GenerationParams,
}

/// Builds the full instruction payload for `source_text`.
///
/// `model` is the profile's default id unless `HF_MODEL` overrides it.
pub fn build(source_text: &str, profile: ModelProfile, model: &str) -> PromptPayload {
    PromptPayload {
        model: model.to_string(),
        inputs: profile.frame(&instruction_body(source_text)),
        parameters: profile.parameters(),
    }
}

/// Builds a plain English-to-Chinese translation request.
pub fn build_translation(text: &str, profile: ModelProfile, model: &str) -> PromptPayload {
    let body = format!(
        "Translate the following text from English to Chinese.
Return only the Chinese translation, no commentary, quotes or notes.

Text:
{text}"
    );
    PromptPayload {
        model: model.to_string(),
        inputs: profile.frame(&body),
        parameters: profile.parameters(),
    }
}

/// Minimal request used to check that the backend answers at all.
pub fn build_liveness(profile: ModelProfile, model: &str) -> PromptPayload {
    PromptPayload {
        model: model.to_string(),
        inputs: profile.frame("Hello, are you working?"),
        parameters: GenerationParams {
            max_new_tokens: 8,
            ..profile.parameters()
        },
    }
}

fn instruction_body(source_text: &str) -> String {
    format!(
        "The following text was extracted from a menu image using OCR, so there might be some recognition errors.
Please:
1. Identify individual menu items
2. Translate each item and its description to Chinese
3. Clean up any OCR errors
4. Return a JSON object whose \"items\" array holds one object per menu item

Text from menu:
{source}

Requirements:
- Only include real food or beverage items
- Separate multiple items into different objects
- Skip fragments that are too garbled to read
- \"nameZh\" and \"descriptionZh\" must use Chinese characters only
- Format prices with a currency symbol, for example \"$12.99\"
- Keep descriptions short; for Chinese descriptions focus on ingredients and cooking method

Return format:
{SCHEMA_EXAMPLE}

Return only valid JSON, no commentary or other text.",
        source = source_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_embeds_source_text_and_schema() {
        let payload = build("Kung Pao Chicken $12.99", ModelProfile::Mixtral, "m");
        assert!(payload.inputs.contains("Kung Pao Chicken $12.99"));
        assert!(payload.inputs.contains("\"nameZh\": \"中文菜名\""));
        assert!(payload.inputs.contains("\"descriptionZh\""));
        assert!(payload.inputs.starts_with("<s>[INST] "));
        assert!(payload.inputs.ends_with("[/INST]"));
        assert_eq!(payload.model, "m");
    }

    #[test]
    fn source_text_is_embedded_verbatim() {
        let source = "  BURGER   $9\n\tfries extra  \n";
        let payload = build(source, ModelProfile::Zephyr, "m");
        assert!(payload.inputs.contains(&format!("Text from menu:\n{source}\n")));
    }

    #[test]
    fn translation_and_liveness_payloads_use_profile_framing() {
        let translation = build_translation("Spicy tofu", ModelProfile::Mixtral, "m");
        assert!(translation.inputs.starts_with("<s>[INST] "));
        assert!(translation.inputs.contains("Spicy tofu"));
        assert!(!translation.inputs.contains("nameZh"));

        let liveness = build_liveness(ModelProfile::Yi, "m");
        assert!(liveness.inputs.contains("Hello, are you working?"));
        assert_eq!(liveness.parameters.max_new_tokens, 8);
        assert!(!liveness.parameters.return_full_text);
    }

    #[test]
    fn build_is_deterministic() {
        let a = build("Dumplings $6", ModelProfile::Yi, "m");
        let b = build("Dumplings $6", ModelProfile::Yi, "m");
        assert_eq!(a, b);
    }

    #[test]
    fn profiles_use_their_own_turn_delimiters() {
        let yi = build("Tea", ModelProfile::Yi, "m").inputs;
        assert!(yi.starts_with("<|im_start|>system\n"));
        assert!(yi.ends_with("<|im_start|>assistant\n"));

        let zephyr = build("Tea", ModelProfile::Zephyr, "m").inputs;
        assert!(zephyr.starts_with("<|system|>\n"));
        assert!(zephyr.ends_with("<|assistant|>\n"));
    }

    #[test]
    fn parameters_stay_low_temperature_and_new_text_only() {
        for profile in [ModelProfile::Mixtral, ModelProfile::Yi, ModelProfile::Zephyr] {
            let params = profile.parameters();
            assert!((0.05..=0.2).contains(&params.temperature));
            assert!(!params.return_full_text);
            assert_eq!(params.max_new_tokens, 1024);
        }
    }

    #[test]
    fn payload_serializes_without_model() {
        let payload = build("Tea", ModelProfile::Mixtral, "m");
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("model").is_none());
        assert_eq!(value["parameters"]["return_full_text"], false);
        let top_p = value["parameters"]["top_p"].as_f64().unwrap();
        assert!((top_p - 0.95).abs() < 1e-6);
    }

    #[test]
    fn parse_rejects_unknown_profile() {
        assert_eq!(ModelProfile::parse("Yi").unwrap(), ModelProfile::Yi);
        assert!(ModelProfile::parse("gpt").is_err());
    }
}
