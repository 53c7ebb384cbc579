//! Language registry: maps a language identifier to its execution profile.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SandboxError};

/// A supported source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Cpp,
    Java,
}

impl Language {
    /// Every supported language, in registry order.
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::JavaScript,
        Language::Cpp,
        Language::Java,
    ];

    /// The canonical identifier for this language.
    pub fn id(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Cpp => "cpp",
            Language::Java => "java",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Language {
    type Err = SandboxError;

    /// Case-sensitive. `node` is accepted as an alias for `javascript`.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "python" => Ok(Language::Python),
            "javascript" | "node" => Ok(Language::JavaScript),
            "cpp" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            other => Err(SandboxError::UnsupportedLanguage(other.to_string())),
        }
    }
}

/// How to build and run one language inside the isolation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionProfile {
    /// The language this profile belongs to.
    pub language: Language,
    /// Container image reference.
    pub image: String,
    /// File name the source is written to inside the working directory.
    pub source_file_name: &'static str,
    /// Optional compile step, run before `run_command`.
    pub build_command: Option<&'static str>,
    /// Command that runs the program.
    pub run_command: &'static str,
}

impl ExecutionProfile {
    /// The default profile for a language.
    pub fn default_for(language: Language) -> Self {
        let (image, source_file_name, build_command, run_command) = match language {
            Language::Python => ("python:3.10-slim", "main.py", None, "python3 -u main.py"),
            Language::JavaScript => ("node:18-alpine", "main.js", None, "node main.js"),
            Language::Cpp => (
                "gcc:latest",
                "main.cpp",
                Some("g++ -O2 -o main main.cpp"),
                "./main",
            ),
            Language::Java => (
                "openjdk:17-alpine",
                "Main.java",
                Some("javac Main.java"),
                "java Main",
            ),
        };

        Self {
            language,
            image: image.to_string(),
            source_file_name,
            build_command,
            run_command,
        }
    }

    /// Shell snippet that builds (if needed) and runs the program.
    ///
    /// The run step only executes when the build step succeeded.
    pub fn command_line(&self) -> String {
        match self.build_command {
            Some(build) => format!("{} && {}", build, self.run_command),
            None => self.run_command.to_string(),
        }
    }
}

/// Closed registry of execution profiles keyed by [`Language`].
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: HashMap<Language, ExecutionProfile>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::with_images(&HashMap::new())
    }
}

impl LanguageRegistry {
    /// Build the registry, replacing default images where an override exists.
    pub fn with_images(overrides: &HashMap<Language, String>) -> Self {
        let profiles = Language::ALL
            .iter()
            .map(|&language| {
                let mut profile = ExecutionProfile::default_for(language);
                if let Some(image) = overrides.get(&language) {
                    profile.image = image.clone();
                }
                (language, profile)
            })
            .collect();

        Self { profiles }
    }

    /// Resolve a language identifier to its profile.
    ///
    /// Fails with [`SandboxError::UnsupportedLanguage`] for unknown identifiers.
    pub fn resolve(&self, language_id: &str) -> Result<&ExecutionProfile> {
        let language: Language = language_id.parse()?;
        self.profiles
            .get(&language)
            .ok_or_else(|| SandboxError::UnsupportedLanguage(language_id.to_string()))
    }

    /// Iterate over all registered profiles.
    pub fn profiles(&self) -> impl Iterator<Item = &ExecutionProfile> {
        self.profiles.values()
    }

    /// Number of registered languages.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
