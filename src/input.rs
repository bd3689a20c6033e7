use std::path::PathBuf;

use dialoguer::Input;

use crate::errors::{EdgeSuiteError, Result};
use crate::traits::InputDirResolver;

/// A folder given on the command line.
pub struct ExplicitDir(pub PathBuf);

impl InputDirResolver for ExplicitDir {
    fn resolve(&self) -> Result<PathBuf> {
        if self.0.as_os_str().is_empty() {
            return Err(EdgeSuiteError::InputSelection {
                message: "empty input folder".to_string(),
            });
        }
        Ok(self.0.clone())
    }
}

/// Asks on the terminal. An empty answer means no folder was selected.
pub struct InteractivePrompt {
    pub prompt: String,
}

impl Default for InteractivePrompt {
    fn default() -> Self {
        Self {
            prompt: "Select the image folder".to_string(),
        }
    }
}

impl InputDirResolver for InteractivePrompt {
    fn resolve(&self) -> Result<PathBuf> {
        let answer: String = Input::new()
            .with_prompt(&self.prompt)
            .allow_empty(true)
            .interact_text()
            .map_err(|e| EdgeSuiteError::InputSelection {
                message: format!("prompt failed: {}", e),
            })?;

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(EdgeSuiteError::InputSelection {
                message: "No folder selected".to_string(),
            });
        }
        Ok(PathBuf::from(answer))
    }
}

/// The explicit folder if there is one, otherwise the prompt.
pub fn resolver_for(input: Option<PathBuf>) -> Box<dyn InputDirResolver> {
    match input {
        Some(dir) => Box::new(ExplicitDir(dir)),
        None => Box::new(InteractivePrompt::default()),
    }
}
