//! Prompt templates for every generation step.
//!
//! All builders are pure: the same inputs always produce the same prompt.
//! Inputs are embedded verbatim; the model is trusted to cope with odd text.

use crate::model::{Character, StoryNode};
use std::fmt;
use std::str::FromStr;

/// Output language used when none is configured.
pub const DEFAULT_LANGUAGE: &str = "Simplified Chinese";

/// Illustration style presets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ImageStyle {
    #[default]
    Cinematic,
    Anime,
    Watercolor,
    Cyberpunk,
    ChineseInk,
    OilPainting,
    PixelArt,
    Realistic,
}

impl ImageStyle {
    pub const ALL: [ImageStyle; 8] = [
        ImageStyle::Cinematic,
        ImageStyle::Anime,
        ImageStyle::Watercolor,
        ImageStyle::Cyberpunk,
        ImageStyle::ChineseInk,
        ImageStyle::OilPainting,
        ImageStyle::PixelArt,
        ImageStyle::Realistic,
    ];

    /// The style name as it appears in image prompts.
    pub fn name(&self) -> &'static str {
        match self {
            ImageStyle::Cinematic => "Cinematic",
            ImageStyle::Anime => "Anime",
            ImageStyle::Watercolor => "Watercolor",
            ImageStyle::Cyberpunk => "Cyberpunk",
            ImageStyle::ChineseInk => "Chinese Ink",
            ImageStyle::OilPainting => "Oil Painting",
            ImageStyle::PixelArt => "Pixel Art",
            ImageStyle::Realistic => "Realistic",
        }
    }
}

impl fmt::Display for ImageStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ImageStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();

        ImageStyle::ALL
            .into_iter()
            .find(|style| {
                style
                    .name()
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
                    .to_lowercase()
                    == wanted
            })
            .ok_or_else(|| {
                let known: Vec<_> = ImageStyle::ALL.iter().map(|s| s.name()).collect();
                format!("unknown image style '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

/// System instruction sent with every completion.
pub fn system_prompt(language: &str) -> String {
    format!(
        r#"You are an advanced interactive story engine.
Rules:
1. Output strictly valid JSON. Do not wrap it in markdown (such as ```json).
2. Language: write all story text in {language}. Image prompts stay in English.
3. Perspective: always the current character's first person ("I"). Never an omniscient narrator.
4. Style: immersive and novelistic, focused on sensory detail and inner monologue."#
    )
}

/// Ask for exactly `count` main characters.
pub fn extract_characters(source_text: &str, count: usize) -> String {
    format!(
        r#"Analyze the following text and extract exactly {count} main characters.
If the text is short or abstract, creatively invent {count} distinct characters that fit its themes.
Return JSON:
{{
  "characters": [
    {{ "id": "char_1", "name": "Name", "bio": "Short biography", "traits": ["trait 1", "trait 2"] }},
    ...
  ]
}}

Text: "{source_text}""#
    )
}

/// Opening scene told by the first character, covering only the start of the source.
pub fn story_start(characters: &[Character], source_text: &str, style: ImageStyle) -> String {
    let narrator = characters.first().map(|c| c.name.as_str()).unwrap_or("the protagonist");

    format!(
        r#"Begin the story from the perspective of the first character: {narrator}.

**Core instructions**:
1. **Faithful opening**: the beginning must match the **opening passage** of the original text almost exactly. Adapt the original opening directly into {narrator}'s first person ("I"), keeping its descriptions, dialogue and atmosphere.
2. **Opening only**: **never** reveal or include anything that happens later in the original text. Produce only the starting point, like the first chapter or first scene of a novel.
3. **Option logic**: options must follow **directly** from where the opening text ends. They are small actions or inner decisions available right now, **not** long-range plot plans.
4. **Immersion**: establish the setting and the current scene, then wait for the reader's choice.

Original text:
"{source_text}"

Return JSON:
{{
  "summary": "Short, objective summary of the situation",
  "content": "Story text in {narrator}'s first person, closely following the original opening...",
  "options": [
    {{ "id": "opt_1", "label": "Action 1", "next_action_hint": "A direct reaction to the situation (consistent with the original)" }},
    {{ "id": "opt_2", "label": "Action 2", "next_action_hint": "A different possibility (an exploratory branch)" }}
  ],
  {image}
  {education}
}}

Character background:
{cast}"#,
        image = image_prompt_field(style),
        education = EDUCATION_FIELD,
        cast = cast_json(characters),
    )
}

/// Next scene after the reader picked an option.
pub fn continuation(
    history_summary: &str,
    last_content: &str,
    character: &Character,
    action_hint: &str,
    is_ending: bool,
    style: ImageStyle,
) -> String {
    let name = &character.name;
    let direction = if is_ending {
        "This is the ending of the story. Based on the earlier choices and developments, bring the story to a close. Do not offer any further options."
    } else {
        "Write the next scene. React to the action."
    };
    let options = if is_ending {
        String::new()
    } else {
        r#"{ "id": "opt_1", "label": "Option 1", "next_action_hint": "..." },
    { "id": "opt_2", "label": "Option 2", "next_action_hint": "..." }"#
            .to_string()
    };

    format!(
        r#"Continue the story from {name}'s perspective.
Story so far: {history_summary}
Previous scene: {last_content}
Action taken: {action_hint}

{direction}

Return JSON:
{{
  "summary": "Updated summary including this event",
  "content": "Story text in the first person...",
  "options": [
    {options}
  ],
  {image}
  {education}
}}"#,
        image = image_prompt_field(style),
        education = EDUCATION_FIELD,
    )
}

/// Split the source text into `count` consecutive segments, verbatim.
pub fn split_story(source_text: &str, count: usize, style: ImageStyle) -> String {
    format!(
        r#"Split the following text into {count} coherent story nodes.
**Important instructions**:
1. **Complete JSON**: the returned JSON must be complete; never stop in the middle of a string. If the text is long, shorten image_prompt and education first so that every segment's content stays whole.
2. **Verbatim split**: each node's content must be a direct excerpt of the original. **Do not** rewrite or invent; the nodes joined in order must reproduce the full original text.
3. **Whole passages**: each node holds complete paragraphs or scenes, with lengths as even as possible.
4. **Images and study material**: give each node a brief {style} style image description, 1 key language knowledge point and 1 thinking question.

Original text:
"{source_text}"

Return JSON:
{{
  "segments": [
    {{
      "summary": "Short summary",
      "content": "Excerpt of the original...",
      "image_prompt": "Brief {style} style prompt...",
      "education": {{
        "knowledge_points": [
          {{ "question": "Key knowledge point", "answer": "Brief explanation" }}
        ],
        "thinking_questions": [
          {{ "question": "Key thinking question", "answer": "Brief explanation" }}
        ]
      }}
    }}
  ]
}}"#
    )
}

/// Retell a scene through another character's eyes, keeping its events.
pub fn rewrite(
    node: &StoryNode,
    character: &Character,
    cast: &[Character],
    style: ImageStyle,
) -> String {
    let name = &character.name;

    format!(
        r#"Rewrite the following scene from {name}'s perspective.
Events and outcomes must stay exactly the same, but inner thoughts, observations and emotional reactions must reflect {name}'s personality.
If {name} is not present, describe how they perceive the event from where they are, or how they hear about and react to it at the same time.

Original scene (summary): {summary}
Original text: {content}

Return JSON:
{{
  "summary": "{summary}",
  "content": "Story text rewritten in {name}'s first person...",
  "options": [
    {{ "id": "opt_1", "label": "An option unique to {name}", "next_action_hint": "..." }},
    {{ "id": "opt_2", "label": "Another option", "next_action_hint": "..." }}
  ],
  {image}
  {education}
}}

Characters:
{cast}"#,
        summary = node.summary,
        content = node.content,
        image = image_prompt_field(style),
        education = EDUCATION_FIELD,
        cast = cast_json(cast),
    )
}

fn image_prompt_field(style: ImageStyle) -> String {
    format!(
        r#""image_prompt": "Detailed English image prompt for {style} style. Describe the scene visually including characters, environment, lighting. Start with '{style} style'.","#
    )
}

const EDUCATION_FIELD: &str = r#""education": {
    "knowledge_points": [
      { "question": "A language point used in this passage (rhetorical device, idiom, ...)", "answer": "Detailed explanation and usage of that point" }
    ],
    "thinking_questions": [
      { "question": "A question for deeper reflection on this passage", "answer": "Reference answer or guided analysis" }
    ]
  }"#;

fn cast_json(characters: &[Character]) -> String {
    serde_json::to_string(characters).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{character, segment};

    #[test]
    fn test_image_style_parsing() {
        assert_eq!("chinese ink".parse::<ImageStyle>().unwrap(), ImageStyle::ChineseInk);
        assert_eq!("Chinese-Ink".parse::<ImageStyle>().unwrap(), ImageStyle::ChineseInk);
        assert_eq!("PIXELART".parse::<ImageStyle>().unwrap(), ImageStyle::PixelArt);
        assert!("vaporwave".parse::<ImageStyle>().is_err());
        assert_eq!(ImageStyle::default().to_string(), "Cinematic");
    }

    #[test]
    fn test_system_prompt_language() {
        let prompt = system_prompt("English");
        assert!(prompt.contains("write all story text in English"));
        assert!(prompt.contains("valid JSON"));
    }

    #[test]
    fn test_extract_characters_embeds_count_and_text() {
        let prompt = extract_characters("The old man and the sea.", 4);
        assert!(prompt.contains("exactly 4 main characters"));
        assert!(prompt.contains("\"The old man and the sea.\""));
        assert!(prompt.contains("\"characters\""));
    }

    #[test]
    fn test_story_start_uses_first_character() {
        let cast = vec![character("char_1", "Lin"), character("char_2", "Wei")];
        let prompt = story_start(&cast, "It was raining.", ImageStyle::Watercolor);

        assert!(prompt.contains("first character: Lin"));
        assert!(prompt.contains("Start with 'Watercolor style'"));
        assert!(prompt.contains("\"name\":\"Wei\""));
        assert!(prompt.contains("Opening only"));
    }

    #[test]
    fn test_continuation_ending_has_no_options() {
        let lin = character("char_1", "Lin");
        let ending = continuation("sum", "last", &lin, "open the door", true, ImageStyle::Anime);
        let middle = continuation("sum", "last", &lin, "open the door", false, ImageStyle::Anime);

        assert!(ending.contains("This is the ending of the story"));
        assert!(!ending.contains("\"opt_1\""));
        assert!(middle.contains("\"opt_1\""));
        assert!(middle.contains("Action taken: open the door"));
    }

    #[test]
    fn test_split_story_requests_count() {
        let prompt = split_story("A. B. C.", 3, ImageStyle::OilPainting);
        assert!(prompt.contains("into 3 coherent story nodes"));
        assert!(prompt.contains("Brief Oil Painting style prompt"));
        assert!(prompt.contains("\"segments\""));
    }

    #[test]
    fn test_rewrite_keeps_summary() {
        let wei = character("char_2", "Wei");
        let node = segment("s1", false);
        let prompt = rewrite(&node, &wei, &[wei.clone()], ImageStyle::Cinematic);

        assert!(prompt.contains("from Wei's perspective"));
        assert!(prompt.contains("\"summary\": \"summary of s1\""));
        assert!(prompt.contains("Original text: content of s1"));
    }

    #[test]
    fn test_builders_are_deterministic() {
        let cast = vec![character("char_1", "Lin")];
        assert_eq!(
            story_start(&cast, "text", ImageStyle::Cyberpunk),
            story_start(&cast, "text", ImageStyle::Cyberpunk)
        );
    }
}
