use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;
use tracing::warn;

use crate::VincError;
use crate::VincResult;
use crate::guard::is_self_include;
use crate::guard::resolve_include;
use crate::rules::InlineOverride;
use crate::rules::MarkerRules;
use crate::rules::RuleOrigin;
use crate::rules::RuleResolver;
use crate::rules::parse_inline_override;

/// A snapshot of a document's text split into lines.
///
/// Line endings are normalized to `\n` and the text is split on every `\n`,
/// so a trailing newline shows up as a final empty line and
/// [`Document::text`] reproduces the input exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
	pub path: PathBuf,
	pub language: String,
	pub lines: Vec<String>,
}

impl Document {
	pub fn new(path: impl Into<PathBuf>, language: impl Into<String>, lines: Vec<String>) -> Self {
		Self {
			path: path.into(),
			language: language.into(),
			lines,
		}
	}

	pub fn from_text(path: impl Into<PathBuf>, language: impl Into<String>, text: &str) -> Self {
		let text = normalize_line_endings(text);
		let lines = text.split('\n').map(ToString::to_string).collect();
		Self::new(path, language, lines)
	}

	pub fn text(&self) -> String {
		self.lines.join("\n")
	}
}

/// Normalize `\r\n` and lone `\r` line endings to `\n`.
pub fn normalize_line_endings(content: &str) -> String {
	if content.contains('\r') {
		content.replace("\r\n", "\n").replace('\r', "\n")
	} else {
		content.to_string()
	}
}

/// A line of a document asking for another file's content.
#[derive(Debug, Clone)]
pub struct Directive {
	/// Zero-based line of the directive in the scanned snapshot.
	pub line: usize,
	/// The path exactly as written between the quotes.
	pub raw_path: String,
	/// The include path resolved against the document's directory.
	pub path: PathBuf,
	/// Leading whitespace of the directive line, applied to the generated
	/// region.
	pub indent: String,
	/// Rules deciding the region markers and neutralization of this include.
	pub rules: Arc<MarkerRules>,
	/// Rules that recognised the directive line itself.
	pub context: Arc<MarkerRules>,
	pub origin: RuleOrigin,
	pub inline: Option<InlineOverride>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
	/// The include target does not exist.
	MissingFile,
	/// The include target is the document itself.
	SelfInclude,
	/// The include target exists but could not be read.
	ReadFailed,
}

impl fmt::Display for IssueKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::MissingFile => write!(f, "missing file"),
			Self::SelfInclude => write!(f, "self include"),
			Self::ReadFailed => write!(f, "read failed"),
		}
	}
}

/// A problem with a single directive. Issues never stop the rest of the
/// document from being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
	pub kind: IssueKind,
	pub line: usize,
	pub raw_path: String,
	pub path: PathBuf,
	pub reason: Option<String>,
}

impl Issue {
	pub fn message(&self) -> String {
		self.to_error().to_string()
	}

	/// The diagnostic error describing this issue.
	pub fn to_error(&self) -> VincError {
		let path = self.path.display().to_string();
		match self.kind {
			IssueKind::MissingFile => VincError::MissingInclude { path },
			IssueKind::SelfInclude => VincError::SelfInclude { path },
			IssueKind::ReadFailed => {
				VincError::ReadFailed {
					path,
					reason: self.reason.clone().unwrap_or_default(),
				}
			}
		}
	}
}

/// The directives and rejected directives found in one document.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
	/// Accepted directives, ordered by line.
	pub directives: Vec<Directive>,
	/// Rejected directives, ordered by line.
	pub issues: Vec<Issue>,
	/// Every line holding a directive, accepted or not. A region never
	/// extends past the next of these.
	pub directive_lines: Vec<usize>,
}

impl ScanResult {
	/// The include targets that do not exist yet. They are still watched so
	/// that creating them triggers a pass.
	pub fn missing_paths(&self) -> impl Iterator<Item = &Path> {
		self.issues
			.iter()
			.filter(|issue| issue.kind == IssueKind::MissingFile)
			.map(|issue| issue.path.as_path())
	}
}

/// Scan every line of `document` for include directives.
///
/// Self includes and missing targets are reported as issues and left out of
/// the directive list; scanning continues with the next line.
pub fn scan(document: &Document, resolver: &RuleResolver) -> VincResult<ScanResult> {
	let mut result = ScanResult::default();
	let lines = &document.lines;

	for (index, line) in lines.iter().enumerate() {
		let context = resolver.context_rules(&document.language, lines, index);
		let raw_path = match parse_inline_override(line) {
			Some(inline) => {
				let overridden = resolver.rules_for_style(&inline.style)?;
				(context.rules.is_directive(line) || overridden.is_directive(line)).then_some(inline.path)
			}
			None => context.rules.capture_path(line),
		};

		let Some(raw_path) = raw_path else {
			continue;
		};

		result.directive_lines.push(index);
		let path = resolve_include(&document.path, &raw_path);

		if is_self_include(&document.path, &path) {
			warn!(
				document = %document.path.display(),
				line = index + 1,
				"rejected directive including its own document"
			);
			result.issues.push(Issue {
				kind: IssueKind::SelfInclude,
				line: index,
				raw_path,
				path,
				reason: None,
			});
			continue;
		}

		if !path.exists() {
			debug!(
				document = %document.path.display(),
				target = %path.display(),
				"include target does not exist"
			);
			result.issues.push(Issue {
				kind: IssueKind::MissingFile,
				line: index,
				raw_path,
				path,
				reason: None,
			});
			continue;
		}

		let resolution = resolver.resolve(&document.language, lines, index, Some(&path))?;
		result.directives.push(Directive {
			line: index,
			raw_path,
			indent: leading_whitespace(line).to_string(),
			path,
			rules: resolution.rules,
			context: context.rules,
			origin: resolution.origin,
			inline: resolution.inline,
		});
	}

	debug!(
		document = %document.path.display(),
		directives = result.directives.len(),
		issues = result.issues.len(),
		"scanned document"
	);

	Ok(result)
}

/// Whether `line` looks like a directive, complete or still being typed.
pub fn is_directive_line(line: &str) -> bool {
	static PATTERN: OnceLock<Regex> = OnceLock::new();
	PATTERN
		.get_or_init(|| Regex::new(r"\bvirtualInclude(?:\s|$)").expect("directive line pattern is a valid regex"))
		.is_match(line)
}

pub(crate) fn leading_whitespace(line: &str) -> &str {
	&line[..line.len() - line.trim_start().len()]
}
