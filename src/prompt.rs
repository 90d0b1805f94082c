use crate::config::{ControlSettings, CustomPromptSelect};
use crate::types::GenerationMode;

const METADATA_PROMPT: &str = "I will give you images. You have to:
1. Write detailed prompt for each images (populate the 'description' field).
2. Write title for each images as per instructions and guide.
3. Write keywords for each images as per instructions and guide.
4. Select a relevant Category.

Instructions: Analyze this image and generate content based on the following exact and strict requirements. Please give keywords separated by comma also give single word keyword and prefer singular keyword. please give single word keyword and give at maximum 30 keywords also give a title and title character will be around 75 -130 character, also give title in sentence case means only first letter will be in capital.

Provide JSON object with 'title', 'description', 'keywords', and 'category'.";

/// Build the instruction text sent alongside each image.
///
/// Custom instructions win when they are enabled and non-empty; otherwise
/// the built-in prompt for `mode` is used.
pub fn create_prompt(controls: &ControlSettings, mode: GenerationMode) -> String {
    match mode {
        GenerationMode::Prompt => {
            let custom = controls.custom_prompt_entry_prompt.trim();
            if controls.prompt_switches.custom_prompt && !custom.is_empty() {
                return custom_instructions(custom, "Provide JSON object with only 'description'.");
            }
            description_prompt(controls)
        }
        GenerationMode::Metadata => {
            let custom = controls.custom_prompt_entry.trim();
            if controls.custom_prompt_select == CustomPromptSelect::SetCustom && !custom.is_empty()
            {
                return custom_instructions(
                    custom,
                    "Provide JSON object with 'title', 'description', 'keywords', and a relevant 'category'.",
                );
            }
            METADATA_PROMPT.to_string()
        }
    }
}

fn custom_instructions(instructions: &str, output_shape: &str) -> String {
    format!(
        "Analyze this image based on the following instructions:\n{}\n\n{}",
        instructions, output_shape
    )
}

fn description_prompt(controls: &ControlSettings) -> String {
    let switches = &controls.prompt_switches;
    let mut prompt = String::from(
        "Act as an expert metadata generator specializing in stock media requirements.\n\
         Analyze this image.\n\
         IMPORTANT: If the subject is isolated, assume it's on a white or transparent background. \
         Do NOT mention \"black background\", \"dark background\", or similar phrases.\n",
    );
    prompt.push_str(&format!(
        "Generate only a compelling description.\nTarget Description Length: MUST BE EXACTLY {} words. \
         Provide the exact word count requested.\n",
        controls.desc_words
    ));
    if switches.silhouette {
        prompt.push_str("Style: Silhouette. Emphasize this.\n");
    }
    if switches.white_bg {
        prompt.push_str("Background: Plain white. Mention 'white background', 'isolated'.\n");
    }
    if switches.transparent_bg {
        prompt.push_str(
            "Background: Transparent. Mention 'transparent background', 'isolated'.\n",
        );
    }
    prompt.push_str(
        "Focus on facts and concepts, avoiding subjective words (e.g., beautiful, amazing).\n\n\
         Provide JSON object with only 'description'.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_metadata_prompt() {
        let prompt = create_prompt(&ControlSettings::default(), GenerationMode::Metadata);
        assert!(prompt.starts_with("I will give you images."));
        assert!(prompt.ends_with("'keywords', and 'category'."));
    }

    #[test]
    fn test_custom_metadata_prompt() {
        let controls = ControlSettings {
            custom_prompt_select: CustomPromptSelect::SetCustom,
            custom_prompt_entry: "  Focus on food.  ".to_string(),
            ..Default::default()
        };
        let prompt = create_prompt(&controls, GenerationMode::Metadata);
        assert_eq!(
            prompt,
            "Analyze this image based on the following instructions:\nFocus on food.\n\n\
             Provide JSON object with 'title', 'description', 'keywords', and a relevant 'category'."
        );
    }

    #[test]
    fn test_blank_custom_prompt_falls_back() {
        let controls = ControlSettings {
            custom_prompt_select: CustomPromptSelect::SetCustom,
            custom_prompt_entry: "   ".to_string(),
            ..Default::default()
        };
        let prompt = create_prompt(&controls, GenerationMode::Metadata);
        assert!(prompt.starts_with("I will give you images."));
    }

    #[test]
    fn test_description_prompt_switches() {
        let mut controls = ControlSettings {
            desc_words: 25,
            ..Default::default()
        };
        controls.prompt_switches.silhouette = true;
        controls.prompt_switches.white_bg = true;
        let prompt = create_prompt(&controls, GenerationMode::Prompt);
        assert!(prompt.contains("MUST BE EXACTLY 25 words"));
        assert!(prompt.contains("Style: Silhouette."));
        assert!(prompt.contains("Background: Plain white."));
        assert!(!prompt.contains("Background: Transparent."));
        assert!(prompt.ends_with("Provide JSON object with only 'description'."));
    }

    #[test]
    fn test_custom_prompt_mode_requires_switch() {
        let mut controls = ControlSettings {
            custom_prompt_entry_prompt: "Describe lighting.".to_string(),
            ..Default::default()
        };
        let prompt = create_prompt(&controls, GenerationMode::Prompt);
        assert!(prompt.starts_with("Act as an expert"));

        controls.prompt_switches.custom_prompt = true;
        let prompt = create_prompt(&controls, GenerationMode::Prompt);
        assert!(prompt.contains("Describe lighting."));
        assert!(prompt.ends_with("only 'description'."));
    }
}
