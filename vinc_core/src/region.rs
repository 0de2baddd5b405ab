use tracing::trace;

use crate::directive::Directive;
use crate::directive::ScanResult;

/// The generated lines of one directive: a start marker, the content, and an
/// end marker. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
	pub start: usize,
	pub end: usize,
}

impl Region {
	pub fn contains(&self, line: usize) -> bool {
		(self.start..=self.end).contains(&line)
	}
}

/// What a directive's region needs to be in sync with its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
	/// No start marker follows the directive.
	NeedsInsert,
	/// The region holds exactly the expected content.
	UpToDate(Region),
	/// The region is complete but its content differs.
	NeedsReplace(Region),
	/// The start marker has no end marker. The region end is a guess bounded
	/// by the expected content length and the repair lookahead.
	NeedsRepair(Region),
}

impl RegionState {
	pub fn is_up_to_date(&self) -> bool {
		matches!(self, Self::UpToDate(_))
	}

	pub fn region(&self) -> Option<Region> {
		match self {
			Self::NeedsInsert => None,
			Self::UpToDate(region) | Self::NeedsReplace(region) | Self::NeedsRepair(region) => Some(*region),
		}
	}

	pub fn label(&self) -> &'static str {
		match self {
			Self::NeedsInsert => "missing",
			Self::UpToDate(_) => "up to date",
			Self::NeedsReplace(_) => "stale",
			Self::NeedsRepair(_) => "broken",
		}
	}
}

/// The exclusive line bound of a directive's region: the next directive line,
/// or the end of the document.
pub fn region_limit(scan: &ScanResult, directive: &Directive, line_count: usize) -> usize {
	scan.directive_lines
		.iter()
		.copied()
		.find(|line| *line > directive.line)
		.unwrap_or(line_count)
		.min(line_count)
}

/// Find the start marker directly below the directive and the last end
/// marker before `limit`.
fn locate(lines: &[String], directive: &Directive, limit: usize) -> Option<(usize, Option<usize>)> {
	let start = directive.line + 1;
	let limit = limit.min(lines.len());
	if start >= limit || !directive.rules.is_start_marker(&lines[start]) {
		return None;
	}

	let end = (start + 1..limit)
		.rev()
		.find(|line| directive.rules.is_end_marker(&lines[*line]));

	Some((start, end))
}

/// Classify the region below `directive` against its `expected`, already
/// indented, content lines.
///
/// The last end marker before `limit` closes the region, so stray end markers
/// left in the content end up inside the replaced span.
pub fn inspect(
	lines: &[String],
	directive: &Directive,
	limit: usize,
	expected: &[String],
	lookahead: usize,
) -> RegionState {
	let Some((start, end)) = locate(lines, directive, limit) else {
		return RegionState::NeedsInsert;
	};

	let state = match end {
		Some(end) => {
			let region = Region { start, end };
			if lines[start + 1..end] == *expected {
				RegionState::UpToDate(region)
			} else {
				RegionState::NeedsReplace(region)
			}
		}
		None => {
			let bound = limit.min(lines.len()).saturating_sub(1);
			let end = (start + expected.len().min(lookahead)).min(bound).max(start);
			RegionState::NeedsRepair(Region { start, end })
		}
	};

	trace!(line = directive.line, state = state.label(), "inspected region");
	state
}

/// Prefix every non-empty content line with `indent`.
pub fn indent_lines(content: &[String], indent: &str) -> Vec<String> {
	content
		.iter()
		.map(|line| {
			if line.is_empty() {
				String::new()
			} else {
				format!("{indent}{line}")
			}
		})
		.collect()
}

/// Remove `indent` from the start of every content line that carries it.
pub fn strip_indent(content: &[String], indent: &str) -> Vec<String> {
	content
		.iter()
		.map(|line| line.strip_prefix(indent).unwrap_or(line).to_string())
		.collect()
}

/// Build the full region for a directive around already indented content.
pub fn render_region(directive: &Directive, indented: &[String]) -> Vec<String> {
	let mut lines = Vec::with_capacity(indented.len() + 2);
	lines.push(format!("{}{}", directive.indent, directive.rules.start_marker));
	lines.extend(indented.iter().cloned());
	lines.push(format!("{}{}", directive.indent, directive.rules.end_marker));
	lines
}

/// The lines of every existing region in a scanned document, markers
/// included. A region without an end marker protects its start marker only.
pub fn protected_spans(lines: &[String], scan: &ScanResult) -> Vec<Region> {
	scan.directives
		.iter()
		.filter_map(|directive| {
			let limit = region_limit(scan, directive, lines.len());
			let (start, end) = locate(lines, directive, limit)?;
			Some(Region {
				start,
				end: end.unwrap_or(start),
			})
		})
		.collect()
}
