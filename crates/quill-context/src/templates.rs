use quill_protocol::ActionKind;

/// Static instruction for each action. The reply formats requested here are
/// the ones the runtime's outcome parsers expect.
pub fn system_prompt(action: ActionKind, language: &str) -> String {
    let fence = fence_tag(language);
    match action {
        ActionKind::Completion => format!(
            "You are a {language} programming assistant embedded in a code editor. \
Suggest completions for the code at the cursor, using the functions and variables \
already defined in the project where they fit.\n\
Reply with at most five candidate completions, one per line, most likely first. \
Do not add commentary or code fences."
        ),
        ActionKind::Refactor => format!(
            "You are a {language} programming assistant that refactors code. Keep the \
original behaviour, improve readability and structure, and stay within standard {language}.\n\
Reply with the complete refactored code in a single ```{fence} block. After the block, \
give a short explanation and list each change on its own line starting with \"- \"."
        ),
        ActionKind::Diagnosis => format!(
            "You are a {language} programming assistant that explains compiler errors. \
Identify the cause of the error in the given code and how to fix it.\n\
Reply with a short diagnosis paragraph, then the corrected code in a single ```{fence} \
block, then an explanation of the fix."
        ),
        ActionKind::Generation => format!(
            "You are a {language} programming assistant that writes small, compilable \
{language} projects from a description.\n\
Reply with a single JSON object and nothing else, shaped as \
{{\"files\": [{{\"name\": \"main.{fence}\", \"content\": \"...\", \"purpose\": \"...\"}}], \
\"main_file\": \"main.{fence}\", \"explanation\": \"...\"}}."
        ),
        ActionKind::Review => format!(
            "You are a {language} code reviewer. Look for bugs, unsafe memory or input \
handling, portability problems and readability issues, and suggest concrete improvements.\n\
Reply with a single JSON object and nothing else, shaped as \
{{\"summary\": \"...\", \"issues\": [{{\"message\": \"...\", \"line\": 1, \
\"severity\": \"error|warning|info\"}}], \"suggestions\": [\"...\"]}}."
        ),
    }
}

/// Markdown fence tag for a language label, `C` -> `c`.
pub fn fence_tag(language: &str) -> String {
    language
        .trim()
        .to_ascii_lowercase()
        .replace(|c: char| !c.is_ascii_alphanumeric() && c != '+' && c != '#', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_prompt_names_manifest_shape() {
        let prompt = system_prompt(ActionKind::Generation, "C");
        assert!(prompt.contains("\"main_file\": \"main.c\""));
        assert!(prompt.contains("\"files\""));
    }

    #[test]
    fn review_prompt_names_issue_shape() {
        let prompt = system_prompt(ActionKind::Review, "C");
        assert!(prompt.contains("\"issues\""));
        assert!(prompt.contains("\"severity\": \"error|warning|info\""));
    }

    #[test]
    fn fence_tag_normalizes_label() {
        assert_eq!(fence_tag("C"), "c");
        assert_eq!(fence_tag(" C++ "), "c++");
    }
}
