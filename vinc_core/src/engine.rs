use std::path::Path;
use std::path::PathBuf;

use tracing::debug;

use crate::VincResult;
use crate::config::DEFAULT_MAX_FILE_SIZE;
use crate::config::DEFAULT_REPAIR_LOOKAHEAD;
use crate::config::VincConfig;
use crate::directive::Document;
use crate::directive::Issue;
use crate::directive::IssueKind;
use crate::directive::scan;
use crate::edit::EditScript;
use crate::edit::LineEdit;
use crate::neutralize::read_include;
use crate::region::RegionState;
use crate::region::indent_lines;
use crate::region::inspect;
use crate::region::region_limit;
use crate::region::render_region;
use crate::rules::RuleResolver;

/// Options controlling how a document is synchronized.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
	/// Maximum number of lines replaced when a region lost its end marker.
	pub repair_lookahead: usize,
	/// Included files larger than this are reported instead of read.
	pub max_file_size: u64,
}

impl Default for SyncOptions {
	fn default() -> Self {
		Self {
			repair_lookahead: DEFAULT_REPAIR_LOOKAHEAD,
			max_file_size: DEFAULT_MAX_FILE_SIZE,
		}
	}
}

impl SyncOptions {
	pub fn from_config(config: &VincConfig) -> Self {
		Self {
			repair_lookahead: config.repair_lookahead,
			max_file_size: config.max_file_size,
		}
	}
}

/// One accepted directive and the state its region was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveReport {
	pub line: usize,
	pub raw_path: String,
	pub path: PathBuf,
	pub state: RegionState,
}

/// Everything one pass over a document decided.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
	/// Edits bringing every region in sync, in snapshot coordinates.
	pub edits: EditScript,
	/// Rejected directives and unreadable includes, ordered by line.
	pub issues: Vec<Issue>,
	/// Every file the document includes, missing ones too.
	pub sources: Vec<PathBuf>,
	/// Accepted directives whose include could be read.
	pub directives: Vec<DirectiveReport>,
}

impl SyncPlan {
	/// Number of unresolved issues, for display.
	pub fn issue_count(&self) -> usize {
		self.issues.len()
	}

	pub fn is_up_to_date(&self) -> bool {
		self.edits.is_empty()
	}

	/// Directives whose region needs an edit.
	pub fn stale(&self) -> impl Iterator<Item = &DirectiveReport> {
		self.directives
			.iter()
			.filter(|directive| !directive.state.is_up_to_date())
	}
}

/// Plan the synchronization of every region of `document`.
///
/// Reads each include, neutralizes nested directives, inspects the existing
/// region and records the edit needed. Nothing is written.
pub fn plan(document: &Document, resolver: &RuleResolver, options: &SyncOptions) -> VincResult<SyncPlan> {
	let scan = scan(document, resolver)?;
	let lines = &document.lines;
	let mut plan = SyncPlan::default();

	for directive in &scan.directives {
		push_source(&mut plan.sources, &directive.path);

		let content = match read_include(
			&directive.path,
			&[directive.rules.as_ref(), directive.context.as_ref()],
			options.max_file_size,
		) {
			Ok(content) => content,
			Err(error) => {
				debug!(target = %directive.path.display(), %error, "failed to read include");
				plan.issues.push(Issue {
					kind: IssueKind::ReadFailed,
					line: directive.line,
					raw_path: directive.raw_path.clone(),
					path: directive.path.clone(),
					reason: Some(error.to_string()),
				});
				continue;
			}
		};

		let expected = indent_lines(&content, &directive.indent);
		let limit = region_limit(&scan, directive, lines.len());
		let state = inspect(lines, directive, limit, &expected, options.repair_lookahead);

		match state {
			RegionState::NeedsInsert => {
				plan.edits.push(LineEdit::insert(
					directive.line + 1,
					render_region(directive, &expected),
				));
			}
			RegionState::NeedsReplace(region) | RegionState::NeedsRepair(region) => {
				plan.edits.push(LineEdit::replace(
					region.start,
					region.end + 1,
					render_region(directive, &expected),
				));
			}
			RegionState::UpToDate(_) => {}
		}

		plan.directives.push(DirectiveReport {
			line: directive.line,
			raw_path: directive.raw_path.clone(),
			path: directive.path.clone(),
			state,
		});
	}

	for missing in scan.missing_paths() {
		push_source(&mut plan.sources, missing);
	}

	plan.issues.extend(scan.issues);
	plan.issues.sort_by_key(|issue| issue.line);

	debug!(
		document = %document.path.display(),
		edits = plan.edits.len(),
		issues = plan.issues.len(),
		"planned document"
	);

	Ok(plan)
}

fn push_source(sources: &mut Vec<PathBuf>, path: &Path) {
	if !sources.iter().any(|source| source == path) {
		sources.push(path.to_path_buf());
	}
}
