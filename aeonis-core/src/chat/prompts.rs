//! System instructions
//!
//! Templates use `{{VARIABLE}}` placeholders rendered from a [`PromptContext`].

use std::collections::HashMap;

/// Built-in system instructions
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("prompts/system.md");

/// Variables substituted into a template
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    variables: HashMap<String, String>,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable value (builder pattern)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Set the project the conversation is bound to
    pub fn with_project(self, project_id: impl Into<String>) -> Self {
        self.with("PROJECT_ID", project_id)
    }
}

/// Render `template`, or the built-in instructions when none is given
pub fn render_system_prompt(template: Option<&str>, context: &PromptContext) -> String {
    render_template(template.unwrap_or(DEFAULT_SYSTEM_PROMPT), context)
}

fn render_template(template: &str, context: &PromptContext) -> String {
    let mut result = template.to_string();

    for (key, value) in &context.variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    // Unset uppercase placeholders become "(not specified)"
    let mut searched = 0;
    while let Some(offset) = result[searched..].find("{{") {
        let start = searched + offset;
        let Some(len) = result[start..].find("}}") else {
            break;
        };
        let inside = &result[start + 2..start + len];
        if !inside.is_empty() && inside.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
            result.replace_range(start..start + len + 2, "(not specified)");
        } else {
            searched = start + 2;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompt_names_project() {
        let prompt = render_system_prompt(None, &PromptContext::new().with_project("p-42"));
        assert!(prompt.contains("project `p-42`"));
        assert!(!prompt.contains("{{PROJECT_ID}}"));
        assert!(prompt.contains("query_spans"));
    }

    #[test]
    fn test_custom_template_and_missing_variable() {
        let prompt = render_system_prompt(
            Some("Project {{PROJECT_ID}} on {{BRANCH}}, keep {{lowercase}}"),
            &PromptContext::new().with_project("p1"),
        );
        assert_eq!(prompt, "Project p1 on (not specified), keep {{lowercase}}");
    }
}
