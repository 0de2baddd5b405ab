use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::VincError;
use crate::VincResult;
use crate::rules::CommentStyle;

/// Default maximum file size in bytes (10 MB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Default number of lines a repair may replace when a region has lost its end
/// marker.
pub const DEFAULT_REPAIR_LOOKAHEAD: usize = 100;

/// Supported config file locations in discovery order (highest precedence
/// first).
pub const CONFIG_FILE_CANDIDATES: [&str; 3] = ["vinc.toml", ".vinc.toml", ".config/vinc.toml"];

/// Configuration loaded from a `vinc.toml` file.
///
/// ```toml
/// default_comment = { start = "#" }
/// detect_included_language = true
/// repair_lookahead = 100
///
/// [exclude]
/// patterns = ["vendor/", "*.generated.md"]
///
/// [include]
/// patterns = ["**/*.conf"]
///
/// [languages.markdown]
/// comment = { start = "<!--", end = "-->" }
///
/// [[sections]]
/// language = "yaml"
/// start = '^\s*template:\s*\|'
/// end = '^\S'
/// comment = { start = "{{/*", end = "*/}}" }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct VincConfig {
	/// Comment style for documents whose language has no built-in or
	/// configured style.
	#[serde(default = "default_comment")]
	pub default_comment: CommentStyle,
	/// When true, an included file's extension decides the comment style of
	/// its region markers instead of the including document's language.
	#[serde(default)]
	pub detect_included_language: bool,
	/// Upper bound on the number of lines replaced when repairing a region
	/// whose end marker is missing.
	#[serde(default = "default_repair_lookahead")]
	pub repair_lookahead: usize,
	/// Maximum size in bytes of a document or included file. Larger files are
	/// skipped.
	#[serde(default = "default_max_file_size")]
	pub max_file_size: u64,
	/// When true, `.gitignore` files are not used to filter the files the
	/// command line scans.
	#[serde(default)]
	pub disable_gitignore: bool,
	/// Exclusion configuration using gitignore-style patterns.
	#[serde(default)]
	pub exclude: ExcludeConfig,
	/// Inclusion configuration: additional glob patterns to scan.
	#[serde(default)]
	pub include: IncludeConfig,
	/// Per-language overrides keyed by language id.
	#[serde(default)]
	pub languages: HashMap<String, LanguageOverride>,
	/// Regions of a document that use another comment style than the
	/// document's language.
	#[serde(default)]
	pub sections: Vec<SectionOverride>,
}

impl Default for VincConfig {
	fn default() -> Self {
		Self {
			default_comment: default_comment(),
			detect_included_language: false,
			repair_lookahead: DEFAULT_REPAIR_LOOKAHEAD,
			max_file_size: DEFAULT_MAX_FILE_SIZE,
			disable_gitignore: false,
			exclude: ExcludeConfig::default(),
			include: IncludeConfig::default(),
			languages: HashMap::new(),
			sections: Vec::new(),
		}
	}
}

/// Override of the directive rules for a single language.
///
/// Either supply a `comment` style and let the pattern and markers be derived
/// from it, or provide any of `pattern`, `start_marker` and `end_marker`
/// verbatim. Verbatim values win over derived ones.
///
/// A custom `pattern` must capture the include path, either in a group named
/// `path` or in its first participating group.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LanguageOverride {
	#[serde(default)]
	pub comment: Option<CommentStyle>,
	#[serde(default)]
	pub pattern: Option<String>,
	#[serde(default)]
	pub start_marker: Option<String>,
	#[serde(default)]
	pub end_marker: Option<String>,
}

/// A section of a document that uses a different comment style, for example
/// a template block embedded in a YAML file.
///
/// A line belongs to the section when the nearest preceding line matching
/// `start` comes after the nearest preceding line matching `end`. Sections do
/// not nest.
#[derive(Debug, Clone, Deserialize)]
pub struct SectionOverride {
	/// Language id of the documents this section applies to.
	pub language: String,
	/// Pattern of the line opening the section.
	pub start: String,
	/// Pattern of the line closing the section.
	pub end: String,
	/// Comment style used inside the section.
	pub comment: CommentStyle,
}

/// Configuration for excluding files and directories from scanning.
///
/// Patterns follow gitignore syntax and are applied on top of any
/// `.gitignore` rules (unless `disable_gitignore` is set).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExcludeConfig {
	#[serde(default)]
	pub patterns: Vec<String>,
}

/// Configuration for including additional files in scanning.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncludeConfig {
	/// Glob patterns, relative to the project root, for files to scan even
	/// though their extension maps to no known language.
	#[serde(default)]
	pub patterns: Vec<String>,
}

fn default_comment() -> CommentStyle {
	CommentStyle::line("#")
}

fn default_repair_lookahead() -> usize {
	DEFAULT_REPAIR_LOOKAHEAD
}

fn default_max_file_size() -> u64 {
	DEFAULT_MAX_FILE_SIZE
}

impl VincConfig {
	/// Resolve the config path from known discovery candidates.
	#[must_use]
	pub fn resolve_path(root: &Path) -> Option<PathBuf> {
		CONFIG_FILE_CANDIDATES
			.iter()
			.map(|candidate| root.join(candidate))
			.find(|path| path.is_file())
	}

	/// Load the config from the first discovered config file at `root`.
	/// Returns `None` if no config file exists.
	pub fn load(root: &Path) -> VincResult<Option<VincConfig>> {
		let Some(config_path) = Self::resolve_path(root) else {
			return Ok(None);
		};

		let content = std::fs::read_to_string(&config_path)?;
		Self::parse(&content).map(Some)
	}

	/// Parse a config from TOML text.
	pub fn parse(content: &str) -> VincResult<VincConfig> {
		toml::from_str(content).map_err(|e| VincError::ConfigParse(e.to_string()))
	}

	/// Load the discovered config, or the defaults when there is none.
	pub fn load_or_default(root: &Path) -> VincResult<VincConfig> {
		Ok(Self::load(root)?.unwrap_or_default())
	}
}
