use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::runtime::shell_quote;

/// Directory code is placed in when a profile does not need its own
pub const DEFAULT_WORKDIR: &str = "/tmp";

/// Base name of the materialized source file, without extension
const SOURCE_STEM: &str = "code";

/// A supported programming language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    JavaScript,
    Cpp,
    Go,
    Ruby,
}

impl Language {
    /// Every supported language, in display order
    pub const ALL: [Language; 6] = [
        Language::Python,
        Language::Java,
        Language::JavaScript,
        Language::Cpp,
        Language::Go,
        Language::Ruby,
    ];

    /// Canonical lowercase identifier (e.g., "cpp")
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Java => "java",
            Language::JavaScript => "javascript",
            Language::Cpp => "cpp",
            Language::Go => "go",
            Language::Ruby => "ruby",
        }
    }

    /// Build and run policy for this language
    pub fn profile(self) -> &'static LanguageProfile {
        match self {
            Language::Python => &PYTHON,
            Language::Java => &JAVA,
            Language::JavaScript => &JAVASCRIPT,
            Language::Cpp => &CPP,
            Language::Go => &GO,
            Language::Ruby => &RUBY,
        }
    }
}

/// Comma-separated list of canonical language identifiers
pub(crate) fn supported_names() -> String {
    Language::ALL
        .iter()
        .map(|lang| lang.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl FromStr for Language {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "cpp" | "c++" => Ok(Language::Cpp),
            "go" | "golang" => Ok(Language::Go),
            "ruby" | "rb" => Ok(Language::Ruby),
            _ => Err(ConfigError::UnsupportedLanguage(s.to_owned())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compilation step of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileTemplate {
    /// Shell command with placeholders
    /// Placeholders: {source}, {binary}
    pub command: &'static str,

    /// Output binary name, placed in the profile's working directory
    pub binary: &'static str,
}

/// Static per-language policy: where code goes and how it is built and run
///
/// Command templates are shell strings. `{source}` expands to the source path
/// inside the container, `{binary}` to the compiled binary path and
/// `{libraries}` to the quoted, space-separated library list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageProfile {
    /// Human-readable name (e.g., "C++")
    pub name: &'static str,

    /// File extension without dot
    pub extension: &'static str,

    /// Image used when a session names neither an image nor a dockerfile
    pub default_image: &'static str,

    /// Directory inside the container that holds the code and runs commands
    pub workdir: &'static str,

    /// Command preparing the working directory for library installation
    pub setup: Option<&'static str>,

    /// Library installation template (None when installation is unsupported)
    pub install: Option<&'static str>,

    /// Compilation step (None for interpreted languages)
    pub compile: Option<CompileTemplate>,

    /// Run commands, executed in order
    pub run: &'static [&'static str],
}

const PYTHON: LanguageProfile = LanguageProfile {
    name: "Python",
    extension: "py",
    default_image: "python:3.9.19-bullseye",
    workdir: DEFAULT_WORKDIR,
    setup: None,
    install: Some("pip install {libraries}"),
    compile: None,
    run: &["python {source}"],
};

// Java images ship without a package manager we can drive non-interactively
const JAVA: LanguageProfile = LanguageProfile {
    name: "Java",
    extension: "java",
    default_image: "openjdk:11.0.12-jdk-bullseye",
    workdir: DEFAULT_WORKDIR,
    setup: None,
    install: None,
    compile: None,
    run: &["java {source}"],
};

const JAVASCRIPT: LanguageProfile = LanguageProfile {
    name: "JavaScript",
    extension: "js",
    default_image: "node:22-bullseye",
    workdir: DEFAULT_WORKDIR,
    setup: None,
    install: Some("yarn add {libraries}"),
    compile: None,
    run: &["node {source}"],
};

const CPP: LanguageProfile = LanguageProfile {
    name: "C++",
    extension: "cpp",
    default_image: "gcc:11.2.0-bullseye",
    workdir: DEFAULT_WORKDIR,
    setup: None,
    install: Some("apt-get update && apt-get install -y {libraries}"),
    compile: Some(CompileTemplate {
        command: "g++ -o {binary} {source}",
        binary: "a.out",
    }),
    run: &["{binary}"],
};

// `go get` needs a module, so Go code lives in its own module directory
const GO: LanguageProfile = LanguageProfile {
    name: "Go",
    extension: "go",
    default_image: "golang:1.17.0-bullseye",
    workdir: "/example",
    setup: Some("test -f go.mod || go mod init example"),
    install: Some("go get {libraries}"),
    compile: None,
    run: &["go run {source}"],
};

const RUBY: LanguageProfile = LanguageProfile {
    name: "Ruby",
    extension: "rb",
    default_image: "ruby:3.0.2-bullseye",
    workdir: DEFAULT_WORKDIR,
    setup: None,
    install: Some("gem install {libraries}"),
    compile: None,
    run: &["ruby {source}"],
};

impl LanguageProfile {
    /// Check if the language has a compilation step
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Check if libraries can be installed for this language
    pub fn supports_install(&self) -> bool {
        self.install.is_some()
    }

    /// File name of the materialized source (e.g., "code.py")
    pub fn source_name(&self) -> String {
        format!("{SOURCE_STEM}.{}", self.extension)
    }

    /// Path of the source file inside the container
    pub fn source_path(&self) -> String {
        join_path(self.workdir, &self.source_name())
    }

    /// Path of the compiled binary inside the container
    pub fn binary_path(&self) -> Option<String> {
        self.compile
            .as_ref()
            .map(|compile| join_path(self.workdir, compile.binary))
    }

    /// Installation command for the given libraries
    ///
    /// Returns `None` when the language does not support installation.
    pub fn install_command(&self, libraries: &[&str]) -> Option<String> {
        let template = self.install?;
        let libraries = libraries
            .iter()
            .map(|lib| shell_quote(lib))
            .collect::<Vec<_>>()
            .join(" ");
        Some(template.replace("{libraries}", &libraries))
    }

    /// Expanded compile command
    pub fn compile_command(&self) -> Option<String> {
        let compile = self.compile.as_ref()?;
        Some(self.expand(compile.command))
    }

    /// Expanded run commands, in execution order
    pub fn run_commands(&self) -> Vec<String> {
        self.run.iter().map(|template| self.expand(template)).collect()
    }

    fn expand(&self, template: &str) -> String {
        let binary = self.binary_path().unwrap_or_default();
        Self::expand_command(template, &self.source_path(), &binary)
    }

    /// Expand placeholders in the given command
    pub fn expand_command(command: &str, source: &str, binary: &str) -> String {
        command
            .replace("{source}", source)
            .replace("{binary}", binary)
    }
}

fn join_path(dir: &str, name: &str) -> String {
    format!("{}/{name}", dir.trim_end_matches('/'))
}
