use std::borrow::Cow;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::trace;
use tracing::warn;

use crate::VincError;
use crate::VincResult;
use crate::directive::leading_whitespace;
use crate::directive::normalize_line_endings;
use crate::rules::MarkerRules;
use crate::rules::has_inline_override;

/// The spelling a nested directive's keyword is rewritten to. It never
/// matches a directive pattern, so included content is expanded one level
/// deep only.
pub const INERT_KEYWORD: &str = "virtualInclude-nested (edit the source file instead)";

/// The live keyword, unless it is already neutralized or part of a marker.
fn live_keyword() -> &'static Regex {
	static PATTERN: OnceLock<Regex> = OnceLock::new();
	PATTERN.get_or_init(|| {
		Regex::new(r"\bvirtualInclude(?P<rest>[^\w-]|$)").expect("live keyword pattern is a valid regex")
	})
}

fn is_live(line: &str, rules: &[&MarkerRules]) -> bool {
	has_inline_override(line) || rules.iter().any(|rules| rules.is_directive(line))
}

/// Rewrite the keyword of a directive found in included content.
///
/// Marker lines of any of `rules` pass through untouched, as do lines that
/// are not directives. When a pattern still matches once the keyword is
/// rewritten, the whole line is prefixed with the inert keyword instead.
/// Already neutralized lines are not directives, so applying this twice
/// changes nothing.
pub fn neutralize_line<'a>(line: &'a str, rules: &[&MarkerRules]) -> Cow<'a, str> {
	if rules.iter().any(|rules| rules.is_marker(line)) || !is_live(line, rules) {
		return Cow::Borrowed(line);
	}

	let rewritten = live_keyword().replacen(line, 1, format!("{INERT_KEYWORD}${{rest}}"));
	if !is_live(&rewritten, rules) {
		trace!(line, "neutralized nested directive");
		return Cow::Owned(rewritten.into_owned());
	}

	let disabled = format!(
		"{}{INERT_KEYWORD}: {}",
		leading_whitespace(line),
		line.trim_start()
	);
	if is_live(&disabled, rules) {
		warn!(line, "nested directive still matches its pattern after neutralizing");
	} else {
		trace!(line, "disabled nested directive");
	}

	Cow::Owned(disabled)
}

/// Split included content into lines and neutralize every nested directive.
pub fn neutralize_content(content: &str, rules: &[&MarkerRules]) -> Vec<String> {
	normalize_line_endings(content)
		.lines()
		.map(|line| neutralize_line(line, rules).into_owned())
		.collect()
}

/// Read an included file and return its neutralized lines.
pub fn read_include(path: &Path, rules: &[&MarkerRules], max_file_size: u64) -> VincResult<Vec<String>> {
	let metadata = std::fs::metadata(path)?;
	if metadata.len() > max_file_size {
		return Err(VincError::FileTooLarge {
			path: path.display().to_string(),
			size: metadata.len(),
			limit: max_file_size,
		});
	}

	let content = std::fs::read_to_string(path)?;
	Ok(neutralize_content(&content, rules))
}
