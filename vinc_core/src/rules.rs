use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Captures;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::VincError;
use crate::VincResult;
use crate::config::VincConfig;
use crate::languages::default_comment_tokens;
use crate::languages::known_languages;
use crate::languages::language_for_path;

/// The keyword identifying a live include directive.
pub const DIRECTIVE_KEYWORD: &str = "virtualInclude";
/// The keyword opening a generated region.
pub const START_KEYWORD: &str = "virtualIncludeStart";
/// The keyword closing a generated region.
pub const END_KEYWORD: &str = "virtualIncludeEnd";

const START_NOTICE: &str = "- DO NOT EDIT CONTENT BELOW";
const END_NOTICE: &str = "- DO NOT EDIT CONTENT ABOVE";

/// The comment tokens of a language. `end` is empty for languages that only
/// have line comments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommentStyle {
	pub start: String,
	#[serde(default)]
	pub end: String,
}

impl CommentStyle {
	pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
		Self {
			start: start.into(),
			end: end.into(),
		}
	}

	/// A style with a start token only.
	pub fn line(start: impl Into<String>) -> Self {
		Self::new(start, "")
	}
}

/// Escape regex metacharacters in a comment token so it can be embedded in a
/// directive pattern literally.
pub fn escape_token(token: &str) -> String {
	regex::escape(token)
}

/// Build the directive pattern for a comment style. The include path is
/// captured in group 1 (double quotes) or group 2 (single quotes).
pub fn directive_pattern(style: &CommentStyle) -> String {
	format!(
		r#"^\s*{}\s*{DIRECTIVE_KEYWORD}\s+(?:"([^"]+)"|'([^']+)')"#,
		escape_token(&style.start)
	)
}

/// The start marker line written for a comment style.
///
/// Line-comment styles keep the separating space before their empty closer.
pub fn start_marker_for(style: &CommentStyle) -> String {
	format!("{} {START_KEYWORD} {START_NOTICE} {}", style.start, style.end)
}

/// The end marker line written for a comment style.
pub fn end_marker_for(style: &CommentStyle) -> String {
	format!("{} {END_KEYWORD} {END_NOTICE} {}", style.start, style.end)
}

/// Compiled rules for one line context: the pattern recognising a directive
/// and the marker lines delimiting its region.
#[derive(Debug)]
pub struct MarkerRules {
	pub pattern: Regex,
	pub start_marker: String,
	pub end_marker: String,
	pub style: CommentStyle,
}

impl MarkerRules {
	/// Derive the pattern and both markers from a comment style.
	pub fn from_style(style: &CommentStyle) -> VincResult<Self> {
		let pattern = directive_pattern(style);
		Ok(Self {
			pattern: compile(&pattern, "comment style")?,
			start_marker: start_marker_for(style),
			end_marker: end_marker_for(style),
			style: style.clone(),
		})
	}

	pub fn is_directive(&self, line: &str) -> bool {
		self.pattern.is_match(line)
	}

	/// The include path of `line` when it is a directive in this context.
	pub fn capture_path(&self, line: &str) -> Option<String> {
		self.pattern.captures(line).and_then(|caps| capture_path(&caps))
	}

	pub fn is_start_marker(&self, line: &str) -> bool {
		line.trim() == self.start_marker.trim()
	}

	pub fn is_end_marker(&self, line: &str) -> bool {
		line.trim() == self.end_marker.trim()
	}

	pub fn is_marker(&self, line: &str) -> bool {
		self.is_start_marker(line) || self.is_end_marker(line)
	}
}

/// Extract the include path from a directive match: a group named `path`
/// wins, otherwise the first group that participated in the match.
fn capture_path(caps: &Captures<'_>) -> Option<String> {
	if let Some(path) = caps.name("path") {
		return Some(path.as_str().to_string());
	}

	caps.iter()
		.skip(1)
		.flatten()
		.find(|group| !group.as_str().is_empty())
		.map(|group| group.as_str().to_string())
}

fn compile(pattern: &str, origin: impl Into<String>) -> VincResult<Regex> {
	Regex::new(pattern).map_err(|e| {
		VincError::InvalidPattern {
			origin: origin.into(),
			pattern: pattern.to_string(),
			reason: e.to_string(),
		}
	})
}

/// A directive carrying its own comment style:
/// `virtualInclude "path" with "<start>" ["<end>"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineOverride {
	pub path: String,
	pub style: CommentStyle,
}

fn inline_override_pattern() -> &'static Regex {
	static PATTERN: OnceLock<Regex> = OnceLock::new();
	PATTERN.get_or_init(|| {
		Regex::new(
			r#"\bvirtualInclude\s+(?:"([^"]+)"|'([^']+)')\s+with\s+(?:"([^"]+)"|'([^']+)')(?:\s+(?:"([^"]+)"|'([^']+)'))?"#,
		)
		.expect("inline override pattern is a valid regex")
	})
}

/// Parse an inline comment-style override from a directive line.
pub fn parse_inline_override(line: &str) -> Option<InlineOverride> {
	let caps = inline_override_pattern().captures(line)?;
	let group = |a: usize, b: usize| caps.get(a).or_else(|| caps.get(b)).map(|m| m.as_str());
	let path = group(1, 2)?;
	let start = group(3, 4)?;
	let end = group(5, 6).unwrap_or_default();

	Some(InlineOverride {
		path: path.to_string(),
		style: CommentStyle::new(start, end),
	})
}

/// Whether `line` holds an inline override anywhere, regardless of the
/// comment token in front of it.
pub fn has_inline_override(line: &str) -> bool {
	inline_override_pattern().is_match(line)
}

/// Which resolution step produced a set of rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOrigin {
	InlineOverride,
	Section(usize),
	IncludedLanguage(String),
	Language(String),
	Default,
}

/// The rules in force for one line, together with where they came from.
#[derive(Debug, Clone)]
pub struct Resolution {
	pub rules: Arc<MarkerRules>,
	pub origin: RuleOrigin,
	pub inline: Option<InlineOverride>,
}

#[derive(Debug)]
struct CompiledSection {
	language: String,
	start: Regex,
	end: Regex,
	rules: Arc<MarkerRules>,
}

/// Resolves the [`MarkerRules`] for a line of a document.
///
/// Precedence, first match wins:
///
/// 1. an inline override on the line itself
/// 2. a configured section enclosing the line
/// 3. the included file's language, when `detect_included_language` is set
/// 4. the document's language (configured override, then built-in)
/// 5. `default_comment`
///
/// Every configured pattern is compiled once, on construction.
#[derive(Debug)]
pub struct RuleResolver {
	styles: HashMap<CommentStyle, Arc<MarkerRules>>,
	languages: HashMap<String, Arc<MarkerRules>>,
	sections: Vec<CompiledSection>,
	default_rules: Arc<MarkerRules>,
	detect_included_language: bool,
}

impl RuleResolver {
	pub fn new(config: &VincConfig) -> VincResult<Self> {
		let mut styles = HashMap::new();
		let default_rules = Arc::new(MarkerRules::from_style(&config.default_comment)?);
		styles.insert(config.default_comment.clone(), default_rules.clone());

		for language in known_languages() {
			if let Some((start, end)) = default_comment_tokens(language) {
				let style = CommentStyle::new(start, end);
				if !styles.contains_key(&style) {
					let rules = Arc::new(MarkerRules::from_style(&style)?);
					styles.insert(style, rules);
				}
			}
		}

		let mut languages = HashMap::new();
		for (language, entry) in &config.languages {
			let style = entry
				.comment
				.clone()
				.or_else(|| default_comment_tokens(language).map(|(start, end)| CommentStyle::new(start, end)))
				.unwrap_or_else(|| config.default_comment.clone());
			let pattern = match &entry.pattern {
				Some(pattern) => compile(pattern, format!("languages.{language}.pattern"))?,
				None => compile(&directive_pattern(&style), format!("languages.{language}.comment"))?,
			};
			let rules = MarkerRules {
				pattern,
				start_marker: entry
					.start_marker
					.clone()
					.unwrap_or_else(|| start_marker_for(&style)),
				end_marker: entry
					.end_marker
					.clone()
					.unwrap_or_else(|| end_marker_for(&style)),
				style,
			};
			languages.insert(language.clone(), Arc::new(rules));
		}

		let mut sections = Vec::with_capacity(config.sections.len());
		for (index, section) in config.sections.iter().enumerate() {
			let start = compile(&section.start, format!("sections[{index}].start"))?;
			let end = compile(&section.end, format!("sections[{index}].end"))?;
			let rules = match styles.get(&section.comment) {
				Some(rules) => rules.clone(),
				None => {
					let rules = Arc::new(MarkerRules::from_style(&section.comment)?);
					styles.insert(section.comment.clone(), rules.clone());
					rules
				}
			};
			sections.push(CompiledSection {
				language: section.language.clone(),
				start,
				end,
				rules,
			});
		}

		Ok(Self {
			styles,
			languages,
			sections,
			default_rules,
			detect_included_language: config.detect_included_language,
		})
	}

	/// Resolve the rules for `lines[index]` of a document in `language`.
	///
	/// `included` is the resolved path the line's directive points at, when
	/// known.
	pub fn resolve(
		&self,
		language: &str,
		lines: &[String],
		index: usize,
		included: Option<&Path>,
	) -> VincResult<Resolution> {
		let line = lines.get(index).map_or("", String::as_str);

		if let Some(inline) = parse_inline_override(line) {
			let rules = self.rules_for_style(&inline.style)?;
			return Ok(Resolution {
				rules,
				origin: RuleOrigin::InlineOverride,
				inline: Some(inline),
			});
		}

		if let Some((section, rules)) = self.section_rules(language, lines, index) {
			return Ok(Resolution {
				rules,
				origin: RuleOrigin::Section(section),
				inline: None,
			});
		}

		if self.detect_included_language {
			if let Some(detected) = included.and_then(language_for_path) {
				if let Some(rules) = self.language_rules(detected) {
					return Ok(Resolution {
						rules,
						origin: RuleOrigin::IncludedLanguage(detected.to_string()),
						inline: None,
					});
				}
			}
		}

		Ok(self.document_resolution(language))
	}

	/// The rules used to recognise directives on a line: the enclosing
	/// section, then the document's language, then the default.
	pub fn context_rules(&self, language: &str, lines: &[String], index: usize) -> Resolution {
		if let Some((section, rules)) = self.section_rules(language, lines, index) {
			return Resolution {
				rules,
				origin: RuleOrigin::Section(section),
				inline: None,
			};
		}

		self.document_resolution(language)
	}

	/// Rules for an explicit comment style, compiled on demand when the style
	/// is not one of the preloaded ones.
	pub fn rules_for_style(&self, style: &CommentStyle) -> VincResult<Arc<MarkerRules>> {
		match self.styles.get(style) {
			Some(rules) => Ok(rules.clone()),
			None => Ok(Arc::new(MarkerRules::from_style(style)?)),
		}
	}

	/// The configured or built-in rules for a language id.
	pub fn language_rules(&self, language: &str) -> Option<Arc<MarkerRules>> {
		if let Some(rules) = self.languages.get(language) {
			return Some(rules.clone());
		}

		let (start, end) = default_comment_tokens(language)?;
		self.styles.get(&CommentStyle::new(start, end)).cloned()
	}

	pub fn default_rules(&self) -> Arc<MarkerRules> {
		self.default_rules.clone()
	}

	fn document_resolution(&self, language: &str) -> Resolution {
		match self.language_rules(language) {
			Some(rules) => {
				Resolution {
					rules,
					origin: RuleOrigin::Language(language.to_string()),
					inline: None,
				}
			}
			None => {
				Resolution {
					rules: self.default_rules.clone(),
					origin: RuleOrigin::Default,
					inline: None,
				}
			}
		}
	}

	/// The section enclosing `lines[index]`, if any. A line closing a section
	/// is outside it, as is the line opening it. When several sections are
	/// open the nearest start wins.
	fn section_rules(&self, language: &str, lines: &[String], index: usize) -> Option<(usize, Arc<MarkerRules>)> {
		let line = lines.get(index)?;
		let mut nearest: Option<(usize, usize)> = None;

		for (position, section) in self.sections.iter().enumerate() {
			if section.language != language || section.end.is_match(line) {
				continue;
			}

			for previous in (0..index).rev() {
				let candidate = &lines[previous];
				if section.start.is_match(candidate) {
					if nearest.is_none_or(|(_, start)| previous > start) {
						nearest = Some((position, previous));
					}
					break;
				}
				if section.end.is_match(candidate) {
					break;
				}
			}
		}

		nearest.map(|(position, _)| (position, self.sections[position].rules.clone()))
	}
}
