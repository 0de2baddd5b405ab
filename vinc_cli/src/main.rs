use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::process;
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use owo_colors::OwoColorize;
use serde::Serialize;
use similar::ChangeTag;
use similar::TextDiff;
use tracing_subscriber::EnvFilter;
use vinc_cli::Commands;
use vinc_cli::OutputFormat;
use vinc_cli::VincCli;
use vinc_core::AnyEmptyResult;
use vinc_core::AnyResult;
use vinc_core::FileChange;
use vinc_core::FsStore;
use vinc_core::Issue;
use vinc_core::IssueKind;
use vinc_core::PassOutcome;
use vinc_core::VincConfig;
use vinc_core::VincError;
use vinc_core::WalkOptions;
use vinc_core::Workspace;
use vinc_core::collect_files;
use vinc_core::config::CONFIG_FILE_CANDIDATES;
use vinc_core::guard::normalize_path;

static USE_COLOR: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

fn color_enabled() -> bool {
	USE_COLOR.load(std::sync::atomic::Ordering::Relaxed)
}

/// Apply ANSI color codes only when color is enabled.
macro_rules! colored {
	($text:expr,red) => {
		if color_enabled() {
			format!("{}", $text.red())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,green) => {
		if color_enabled() {
			format!("{}", $text.green())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,yellow) => {
		if color_enabled() {
			format!("{}", $text.yellow())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,bold) => {
		if color_enabled() {
			format!("{}", $text.bold())
		} else {
			format!("{}", $text)
		}
	};
}

const SAMPLE_CONFIG: &str = r##"# vinc configuration
#
# Every option is optional. Directives look like this in any file:
#
#   # virtualInclude "shared/header.txt"
#
# and are expanded into a marked region holding the included file's content.

# Comment style for files whose language vinc does not recognize.
# default_comment = { start = "#" }

# Use the included file's extension to pick the comment style of its markers.
# detect_included_language = false

# Upper bound on the lines replaced when a region lost its end marker.
# repair_lookahead = 100

# Files larger than this (in bytes) are skipped.
# max_file_size = 10485760

# [exclude]
# patterns = ["vendor/", "*.generated.md"]

# [include]
# patterns = ["**/*.conf"]

# [languages.markdown]
# comment = { start = "<!--", end = "-->" }

# [[sections]]
# language = "yaml"
# start = '^\s*template:\s*\|'
# end = '^\S'
# comment = { start = "{{/*", end = "*/}}" }
"##;

fn main() {
	let args = VincCli::parse();

	// Respect NO_COLOR env var and --no-color flag.
	let use_color = !args.no_color
		&& std::env::var_os("NO_COLOR").is_none()
		&& supports_color::on(supports_color::Stream::Stderr).is_some();
	if !use_color {
		USE_COLOR.store(false, std::sync::atomic::Ordering::Relaxed);
	}

	init_tracing(args.verbose, use_color);

	// Install miette's fancy handler for rich error diagnostics.
	miette::set_hook(Box::new(move |_| {
		Box::new(
			miette::MietteHandlerOpts::new()
				.color(use_color)
				.unicode(use_color)
				.build(),
		)
	}))
	.ok();

	let result = match &args.command {
		Some(Commands::Init) => run_init(&args),
		Some(Commands::Update {
			dry_run,
			watch,
			files,
		}) => run_update(&args, *dry_run, *watch, files),
		Some(Commands::Check { diff, format }) => run_check(&args, *diff, *format),
		Some(Commands::List) => run_list(&args),
		Some(Commands::Lsp) => run_lsp(),
		None => {
			eprintln!("No subcommand specified. Run `vinc --help` for usage.");
			process::exit(1);
		}
	};

	if let Err(e) = result {
		// Try to render through miette for rich diagnostics with help text
		// and error codes.
		match e.downcast::<VincError>() {
			Ok(vinc_err) => {
				let report: miette::Report = (*vinc_err).into();
				eprintln!("{report:?}");
			}
			Err(e) => {
				eprintln!("{} {e}", colored!("error:", red));
			}
		}
		process::exit(2);
	}
}

/// Logs go to stderr so that stdout stays machine readable. `RUST_LOG` wins
/// over `--verbose`.
fn init_tracing(verbose: bool, use_color: bool) {
	let filter = if std::env::var_os("RUST_LOG").is_some() {
		EnvFilter::from_default_env()
	} else if verbose {
		EnvFilter::new("vinc_core=debug,vinc_lsp=debug")
	} else {
		EnvFilter::new("error")
	};

	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(false)
		.with_ansi(use_color)
		.try_init();
}

fn resolve_root(args: &VincCli) -> PathBuf {
	let root = args
		.path
		.clone()
		.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
	root.canonicalize().unwrap_or(root)
}

/// Everything a command needs to run passes over a project.
struct Project {
	root: PathBuf,
	config: VincConfig,
	walk: WalkOptions,
	workspace: Workspace,
}

impl Project {
	fn load(args: &VincCli) -> AnyResult<Self> {
		let root = resolve_root(args);
		let config = VincConfig::load_or_default(&root)?;
		let walk = WalkOptions::from_config(Some(&config));
		let workspace = Workspace::from_config(&config)?;

		Ok(Self {
			root,
			config,
			walk,
			workspace,
		})
	}

	/// The documents to process: the explicit `files`, or every scannable
	/// file of the project.
	fn documents(&self, files: &[PathBuf]) -> AnyResult<Vec<PathBuf>> {
		if files.is_empty() {
			return Ok(collect_files(&self.root, &self.walk)?);
		}

		Ok(files
			.iter()
			.map(|file| {
				if file.is_absolute() {
					normalize_path(file)
				} else {
					normalize_path(&self.root.join(file))
				}
			})
			.collect())
	}

	fn sync(&mut self, store: &mut FsStore, documents: &[PathBuf]) -> Vec<PassOutcome> {
		self.workspace.process_all(store, documents)
	}
}

fn run_init(args: &VincCli) -> AnyEmptyResult {
	let root = resolve_root(args);

	if let Some(existing) = VincConfig::resolve_path(&root) {
		println!("Config file already exists: {}", existing.display());
		return Ok(());
	}

	let config_path = root.join(CONFIG_FILE_CANDIDATES[0]);
	std::fs::write(&config_path, SAMPLE_CONFIG)?;
	println!("Created vinc.toml");

	println!();
	println!("Next steps:");
	println!("  1. Add a directive in the comment syntax of any file:");
	println!("     # virtualInclude \"shared/header.txt\"");
	println!("  2. Run `vinc update` to expand it");
	println!("  3. Run `vinc check` in CI to keep regions from drifting");

	Ok(())
}

/// Totals of one batch of passes.
#[derive(Debug, Default)]
struct PassSummary {
	regions: usize,
	issues: usize,
	failures: usize,
}

/// Print every issue and failure of `outcomes` to stderr and total them up.
fn report_outcomes(outcomes: &[PassOutcome], root: &Path) -> PassSummary {
	let mut summary = PassSummary::default();

	for outcome in outcomes {
		let rel = make_relative(&outcome.path, root);

		for issue in &outcome.plan.issues {
			let report = issue_to_report(issue, &rel);
			eprintln!("{report:?}");
			summary.issues += 1;
		}

		if let Some(failure) = &outcome.failure {
			eprintln!("{} {rel}: {failure}", colored!("error:", red));
			summary.failures += 1;
		}

		if outcome.failure.is_none() {
			summary.regions += outcome.plan.stale().count();
		}
	}

	summary
}

fn run_update(args: &VincCli, dry_run: bool, watch: bool, files: &[PathBuf]) -> AnyEmptyResult {
	let mut project = Project::load(args)?;

	// Run the initial update.
	let failed = run_update_once(args, &mut project, dry_run, files)?;

	if !watch || dry_run {
		if failed > 0 {
			return Err(format!("{failed} document(s) could not be synchronized").into());
		}
		return Ok(());
	}

	watch_project(args, &mut project, files)
}

/// Run one pass over every document. Returns the number of documents whose
/// pass failed.
fn run_update_once(args: &VincCli, project: &mut Project, dry_run: bool, files: &[PathBuf]) -> AnyResult<usize> {
	let documents = project.documents(files)?;
	let mut store = if dry_run {
		FsStore::dry_run(project.config.max_file_size)
	} else {
		FsStore::new(project.config.max_file_size)
	};

	let outcomes = project.sync(&mut store, &documents);
	let summary = report_outcomes(&outcomes, &project.root);
	print_update_summary(args, &project.root, &summary, store.changes(), dry_run);

	Ok(summary.failures)
}

fn print_update_summary(args: &VincCli, root: &Path, summary: &PassSummary, changes: &[FileChange], dry_run: bool) {
	if summary.issues > 0 {
		eprintln!(
			"{} {} directive(s) could not be resolved",
			colored!("warning:", yellow),
			summary.issues
		);
	}

	if changes.is_empty() {
		println!("All included regions are already up to date.");
		return;
	}

	let mut paths: Vec<_> = changes
		.iter()
		.map(|change| make_relative(&change.path, root))
		.collect();
	paths.sort();
	paths.dedup();

	if dry_run {
		println!(
			"Dry run: would update {} region(s) in {} file(s):",
			summary.regions,
			paths.len()
		);
		for path in &paths {
			println!("  {path}");
		}
	} else {
		println!(
			"Updated {} region(s) in {} file(s).",
			summary.regions,
			paths.len()
		);
		if args.verbose {
			for path in &paths {
				println!("  {path}");
			}
		}
	}
}

/// Re-synchronize documents as their sources change until interrupted.
///
/// A change to an included file re-processes the documents that include it.
/// A change to a document re-processes the document itself, unless the
/// change is the write of the previous wave. Deleted documents are
/// forgotten. A change to the config reloads the project.
fn watch_project(args: &VincCli, project: &mut Project, files: &[PathBuf]) -> AnyEmptyResult {
	use notify::Watcher;

	println!("\nWatching for file changes... (press Ctrl+C to stop)");

	let (tx, rx) = mpsc::channel::<Vec<PathBuf>>();
	let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
		if let Ok(event) = res {
			if matches!(
				event.kind,
				notify::EventKind::Modify(_) | notify::EventKind::Create(_) | notify::EventKind::Remove(_)
			) {
				let _ = tx.send(event.paths);
			}
		}
	})?;
	watcher.watch(&project.root, notify::RecursiveMode::Recursive)?;

	let mut external = HashSet::new();
	watch_external_sources(&mut watcher, project, &mut external);

	let mut written: HashMap<PathBuf, String> = HashMap::new();

	loop {
		let mut changed: BTreeSet<PathBuf> = rx
			.recv()?
			.iter()
			.map(PathBuf::as_path)
			.map(normalize_path)
			.collect();
		// Debounce: drain additional events within 200ms.
		while let Ok(paths) = rx.recv_timeout(Duration::from_millis(200)) {
			changed.extend(paths.iter().map(PathBuf::as_path).map(normalize_path));
		}

		let targets = if changed.iter().any(|path| is_config_path(&project.root, path)) {
			println!("\nConfig change detected, reloading...");
			match Project::load(args) {
				Ok(reloaded) => *project = reloaded,
				Err(e) => {
					eprintln!("{} {e}", colored!("error:", red));
					continue;
				}
			}
			project.documents(files)?
		} else {
			match affected_documents(project, &changed, &written, files) {
				Ok(targets) => targets,
				Err(e) => {
					eprintln!("{} {e}", colored!("error:", red));
					continue;
				}
			}
		};

		if targets.is_empty() {
			continue;
		}

		println!(
			"\nFile change detected, updating {} document(s)...",
			targets.len()
		);
		let mut store = FsStore::new(project.config.max_file_size);
		let outcomes = project.sync(&mut store, &targets);
		let summary = report_outcomes(&outcomes, &project.root);
		print_update_summary(args, &project.root, &summary, store.changes(), false);

		written = store
			.take_changes()
			.into_iter()
			.map(|change| (normalize_path(&change.path), change.after))
			.collect();
		watch_external_sources(&mut watcher, project, &mut external);
	}
}

/// The documents that need a pass after `changed` paths changed on disk.
fn affected_documents(
	project: &mut Project,
	changed: &BTreeSet<PathBuf>,
	written: &HashMap<PathBuf, String>,
	files: &[PathBuf],
) -> AnyResult<Vec<PathBuf>> {
	let documents: HashSet<PathBuf> = project
		.documents(files)?
		.iter()
		.map(PathBuf::as_path)
		.map(normalize_path)
		.collect();
	let mut targets = BTreeSet::new();

	for path in changed {
		targets.extend(project.workspace.dependents_of(path));

		if !path.exists() {
			project.workspace.forget(path);
			continue;
		}

		if documents.contains(path) && !is_own_write(path, written) {
			targets.insert(path.clone());
		}
	}

	targets.retain(|path| path.is_file());
	Ok(targets.into_iter().collect())
}

/// Whether the file still holds exactly what the previous wave wrote.
fn is_own_write(path: &Path, written: &HashMap<PathBuf, String>) -> bool {
	written.get(path).is_some_and(|after| {
		std::fs::read_to_string(path).is_ok_and(|current| &current == after)
	})
}

fn is_config_path(root: &Path, path: &Path) -> bool {
	CONFIG_FILE_CANDIDATES
		.iter()
		.any(|candidate| normalize_path(&root.join(candidate)) == path)
}

/// Included files outside the project root are not covered by the recursive
/// watch; watch their directories individually.
fn watch_external_sources(
	watcher: &mut impl notify::Watcher,
	project: &Project,
	external: &mut HashSet<PathBuf>,
) {
	let directories: Vec<PathBuf> = project
		.workspace
		.mapping()
		.sources()
		.filter(|source| !source.starts_with(&project.root))
		.filter_map(|source| source.parent().map(Path::to_path_buf))
		.collect();

	for directory in directories {
		if !directory.is_dir() || external.contains(&directory) {
			continue;
		}
		match watcher.watch(&directory, notify::RecursiveMode::NonRecursive) {
			Ok(()) => {
				external.insert(directory);
			}
			Err(e) => {
				eprintln!(
					"{} cannot watch {}: {e}",
					colored!("warning:", yellow),
					directory.display()
				);
			}
		}
	}
}

#[derive(Debug, Serialize)]
struct CheckReport {
	ok: bool,
	stale: Vec<StaleEntry>,
	issues: Vec<IssueEntry>,
}

#[derive(Debug, Serialize)]
struct StaleEntry {
	file: String,
	line: usize,
	target: String,
	state: &'static str,
}

#[derive(Debug, Serialize)]
struct IssueEntry {
	file: String,
	line: usize,
	target: String,
	kind: String,
	severity: &'static str,
	message: String,
}

impl CheckReport {
	fn from_outcomes(outcomes: &[PassOutcome], root: &Path) -> Self {
		let mut stale = Vec::new();
		let mut issues = Vec::new();

		for outcome in outcomes {
			let file = make_relative(&outcome.path, root);

			for report in outcome.plan.stale() {
				stale.push(StaleEntry {
					file: file.clone(),
					line: report.line + 1,
					target: report.raw_path.clone(),
					state: report.state.label(),
				});
			}

			for issue in &outcome.plan.issues {
				issues.push(IssueEntry {
					file: file.clone(),
					line: issue.line + 1,
					target: issue.raw_path.clone(),
					kind: issue.kind.to_string(),
					severity: issue_severity(issue.kind),
					message: issue.message(),
				});
			}

			if let Some(failure) = &outcome.failure {
				issues.push(IssueEntry {
					file: file.clone(),
					line: 1,
					target: file.clone(),
					kind: "unavailable".to_string(),
					severity: "error",
					message: failure.to_string(),
				});
			}
		}

		stale.sort_by(|a, b| a.file.cmp(&b.file).then_with(|| a.line.cmp(&b.line)));
		issues.sort_by(|a, b| a.file.cmp(&b.file).then_with(|| a.line.cmp(&b.line)));

		Self {
			ok: stale.is_empty() && issues.is_empty(),
			stale,
			issues,
		}
	}

	/// Number of stale regions per file, ordered by file.
	fn stale_counts(&self) -> BTreeMap<String, usize> {
		let mut counts = BTreeMap::new();
		for entry in &self.stale {
			*counts.entry(entry.file.clone()).or_default() += 1;
		}
		counts
	}

	fn summary(&self) -> String {
		let mut parts = Vec::new();
		if !self.issues.is_empty() {
			parts.push(format!("{} unresolved directive(s)", self.issues.len()));
		}
		if !self.stale.is_empty() {
			parts.push(format!("{} region(s) are out of date", self.stale.len()));
		}
		format!("{}. Run `vinc update` to fix.", parts.join(" and "))
	}
}

fn run_check(args: &VincCli, show_diff: bool, format: OutputFormat) -> AnyEmptyResult {
	let mut project = Project::load(args)?;
	let documents = project.documents(&[])?;
	let mut store = FsStore::dry_run(project.config.max_file_size);
	let outcomes = project.sync(&mut store, &documents);
	let report = CheckReport::from_outcomes(&outcomes, &project.root);

	if report.ok {
		match format {
			OutputFormat::Json => println!("{}", serde_json::to_string(&report)?),
			OutputFormat::Github => println!("All included regions are up to date."),
			OutputFormat::Text => println!("Check passed: all included regions are up to date."),
		}
		return Ok(());
	}

	match format {
		OutputFormat::Json => {
			println!("{}", serde_json::to_string(&report)?);
		}
		OutputFormat::Github => {
			for issue in &report.issues {
				println!(
					"::{} file={},line={}::{}",
					issue.severity, issue.file, issue.line, issue.message
				);
			}
			for entry in &report.stale {
				println!(
					"::warning file={},line={}::Region for `{}` is {}",
					entry.file, entry.line, entry.target, entry.state
				);
			}
			eprintln!("{}", report.summary());
		}
		OutputFormat::Text => {
			eprintln!("Check failed.");
			eprintln!("  unresolved directives: {}", report.issues.len());
			eprintln!("  stale regions: {}", report.stale.len());

			if !report.issues.is_empty() {
				eprintln!();
				eprintln!("Unresolved directives:");
				for issue in &report.issues {
					eprintln!("  {}:{}: {}", issue.file, issue.line, issue.message);
				}
			}

			if !report.stale.is_empty() {
				eprintln!();
				eprintln!("Stale regions:");
				for entry in &report.stale {
					eprintln!(
						"  `{}` at {}:{} [{}]",
						entry.target, entry.file, entry.line, entry.state
					);
				}

				for (file, count) in report.stale_counts() {
					let diagnostic = miette::Report::new(VincError::StaleRegions { file, count });
					eprintln!("{diagnostic:?}");
				}
			}

			if show_diff {
				let mut changes: Vec<_> = store.changes().iter().collect();
				changes.sort_by(|a, b| a.path.cmp(&b.path));
				for change in changes {
					eprintln!();
					eprintln!(
						"{}",
						colored!(make_relative(&change.path, &project.root), bold)
					);
					print_diff(&change.before, &change.after);
				}
			}

			eprintln!();
			eprintln!("{}", report.summary());
		}
	}

	process::exit(1);
}

fn run_list(args: &VincCli) -> AnyEmptyResult {
	let mut project = Project::load(args)?;
	let documents = project.documents(&[])?;
	let mut store = FsStore::dry_run(project.config.max_file_size);
	let outcomes = project.sync(&mut store, &documents);

	let mut directive_count = 0;
	let mut file_count = 0;

	for outcome in &outcomes {
		let mut entries: Vec<(usize, String, String)> = outcome
			.plan
			.directives
			.iter()
			.map(|report| {
				(
					report.line,
					report.raw_path.clone(),
					report.state.label().to_string(),
				)
			})
			.chain(
				outcome
					.plan
					.issues
					.iter()
					.map(|issue| (issue.line, issue.raw_path.clone(), issue.kind.to_string())),
			)
			.collect();

		if entries.is_empty() {
			continue;
		}

		entries.sort();
		file_count += 1;
		directive_count += entries.len();

		let rel = make_relative(&outcome.path, &project.root);
		println!("{}", colored!(rel, bold));
		for (line, target, state) in entries {
			let state = match state.as_str() {
				"up to date" => colored!(&state, green),
				"missing file" | "self include" | "read failed" => colored!(&state, red),
				_ => colored!(&state, yellow),
			};
			println!("  {}: -> {target} [{state}]", line + 1);
		}
	}

	if directive_count == 0 {
		println!("No virtualInclude directives found.");
		return Ok(());
	}

	println!("\n{directive_count} directive(s) in {file_count} file(s)");

	Ok(())
}

fn run_lsp() -> AnyEmptyResult {
	let rt = tokio::runtime::Runtime::new()?;
	rt.block_on(vinc_lsp::run_server());
	Ok(())
}

/// Print a unified diff between two strings, colorized.
fn print_diff(current: &str, expected: &str) {
	let diff = TextDiff::from_lines(current, expected);
	for (index, group) in diff.grouped_ops(3).iter().enumerate() {
		if index > 0 {
			eprintln!("  ...");
		}
		for op in group {
			for change in diff.iter_changes(op) {
				let text = change.to_string_lossy();
				let text = text.trim_end_matches(['\r', '\n']);
				match change.tag() {
					ChangeTag::Delete => {
						eprintln!("  {}", colored!(format!("-{text}"), red));
					}
					ChangeTag::Insert => {
						eprintln!("  {}", colored!(format!("+{text}"), green));
					}
					ChangeTag::Equal => {
						eprintln!("   {text}");
					}
				}
			}
		}
	}
}

/// Make a path relative to root for display purposes.
fn make_relative(path: &Path, root: &Path) -> String {
	path.strip_prefix(root)
		.unwrap_or(path)
		.display()
		.to_string()
}

fn issue_severity(kind: IssueKind) -> &'static str {
	match kind {
		IssueKind::SelfInclude => "error",
		IssueKind::MissingFile | IssueKind::ReadFailed => "warning",
	}
}

/// Convert an [`Issue`] into a `miette::Report` with severity, error code and
/// help text for rich terminal display.
fn issue_to_report(issue: &Issue, rel_path: &str) -> miette::Report {
	let location = format!("{rel_path}:{}", issue.line + 1);
	let severity = match issue.kind {
		IssueKind::SelfInclude => miette::Severity::Error,
		IssueKind::MissingFile | IssueKind::ReadFailed => miette::Severity::Warning,
	};
	let (code, help) = match issue.kind {
		IssueKind::MissingFile => {
			(
				"vinc::missing_include",
				format!(
					"`{}` is resolved relative to the directory of {rel_path}; the region is \
					 inserted once the file exists",
					issue.raw_path
				),
			)
		}
		IssueKind::SelfInclude => {
			(
				"vinc::self_include",
				"remove the directive or point it at a different file".to_string(),
			)
		}
		IssueKind::ReadFailed => {
			(
				"vinc::read_failed",
				"check the file's permissions and `max_file_size` in vinc.toml".to_string(),
			)
		}
	};

	let diagnostic = miette::MietteDiagnostic::new(format!("[{location}] {}", issue.message()))
		.with_code(code)
		.with_help(help)
		.with_severity(severity);
	miette::Report::new(diagnostic)
}
