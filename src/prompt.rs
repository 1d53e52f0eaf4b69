//! Interactive prompts.
//!
//! Flows ask questions through [`Prompter`] so the branch logic can be driven
//! by a scripted prompter in tests. Defaults are shown in brackets and accepted
//! on empty input.

use console::style;
use dialoguer::{Confirm, Input};

use crate::error::Result;

pub trait Prompter {
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool>;

    /// Free-text input; `default` is returned on empty input.
    fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String>;
}

/// Terminal prompter backed by `dialoguer`.
#[derive(Debug, Default)]
pub struct TermPrompter;

impl Prompter for TermPrompter {
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool> {
        Ok(Confirm::new()
            .with_prompt(format!("  {} {}", style("?").cyan().bold(), prompt))
            .default(default)
            .interact()?)
    }

    fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String> {
        let mut input = Input::<String>::new().with_prompt(format!(
            "  {} {}",
            style("?").cyan().bold(),
            prompt
        ));
        match default {
            Some(d) => input = input.default(d.to_string()),
            None => input = input.allow_empty(true),
        }
        Ok(input.interact_text()?.trim().to_string())
    }
}
