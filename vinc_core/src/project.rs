use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use globset::Glob;
use globset::GlobSet;
use globset::GlobSetBuilder;
use ignore::gitignore::Gitignore;
use ignore::gitignore::GitignoreBuilder;
use tracing::debug;

use crate::VincError;
use crate::VincResult;
use crate::config::CONFIG_FILE_CANDIDATES;
use crate::config::DEFAULT_MAX_FILE_SIZE;
use crate::config::VincConfig;
use crate::directive::Document;
use crate::edit::EditScript;
use crate::guard::normalize_path;
use crate::languages::language_for_path;
use crate::workspace::DocumentStore;

/// Options controlling which files of a project are scanned for directives.
#[derive(Debug, Clone)]
pub struct WalkOptions {
	/// Gitignore-style patterns to exclude from scanning.
	pub exclude_patterns: Vec<String>,
	/// Files matching these globs are scanned whatever their extension.
	pub include_set: GlobSet,
	/// Files larger than this are skipped.
	pub max_file_size: u64,
	/// Whether to disable `.gitignore` integration.
	pub disable_gitignore: bool,
}

impl Default for WalkOptions {
	fn default() -> Self {
		Self {
			exclude_patterns: Vec::new(),
			include_set: GlobSet::empty(),
			max_file_size: DEFAULT_MAX_FILE_SIZE,
			disable_gitignore: false,
		}
	}
}

impl WalkOptions {
	pub fn from_config(config: Option<&VincConfig>) -> Self {
		let exclude_patterns = config
			.map(|c| c.exclude.patterns.clone())
			.unwrap_or_default();
		let include_patterns = config.map(|c| &c.include.patterns[..]).unwrap_or_default();
		let max_file_size = config.map_or(DEFAULT_MAX_FILE_SIZE, |c| c.max_file_size);
		let disable_gitignore = config.is_some_and(|c| c.disable_gitignore);

		Self {
			exclude_patterns,
			include_set: build_glob_set(include_patterns),
			max_file_size,
			disable_gitignore,
		}
	}
}

/// The language id used for a document: the detected language, or the bare
/// extension so that `[languages.<ext>]` entries apply to unknown file types.
pub fn document_language(path: &Path) -> String {
	language_for_path(path)
		.map(ToString::to_string)
		.or_else(|| {
			path.extension()
				.and_then(|ext| ext.to_str())
				.map(str::to_ascii_lowercase)
		})
		.unwrap_or_default()
}

/// Collect every file under `root` that may hold directives.
///
/// Files with a known language are scanned, as are files matching an
/// `[include]` glob. `.gitignore` rules apply unless disabled, and
/// `[exclude]` patterns always apply on top.
pub fn collect_files(root: &Path, options: &WalkOptions) -> VincResult<Vec<PathBuf>> {
	let mut files = Vec::new();
	let mut visited_dirs = HashSet::new();

	let gitignore = if options.disable_gitignore {
		Gitignore::empty()
	} else {
		build_gitignore(root)
	};
	let custom_exclude = build_exclude_matcher(root, &options.exclude_patterns)?;

	let walker = Walker {
		root,
		gitignore: &gitignore,
		custom_exclude: &custom_exclude,
		options,
	};
	walker.walk(root, &mut files, &mut visited_dirs)?;

	files.sort();
	files.dedup();
	debug!(root = %root.display(), files = files.len(), "collected files");
	Ok(files)
}

struct Walker<'a> {
	root: &'a Path,
	gitignore: &'a Gitignore,
	custom_exclude: &'a Gitignore,
	options: &'a WalkOptions,
}

impl Walker<'_> {
	fn walk(&self, dir: &Path, files: &mut Vec<PathBuf>, visited_dirs: &mut HashSet<PathBuf>) -> VincResult<()> {
		if !dir.is_dir() {
			return Ok(());
		}

		// Symlinked directories may loop back; visit each real directory once.
		let canonical = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
		if !visited_dirs.insert(canonical) {
			return Ok(());
		}

		for entry in std::fs::read_dir(dir)? {
			let path = entry?.path();

			if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
				if is_ignored_directory_name(name) {
					continue;
				}
			}

			let is_dir = path.is_dir();
			if self.gitignore.matched(&path, is_dir).is_ignore()
				|| self.custom_exclude.matched(&path, is_dir).is_ignore()
			{
				continue;
			}

			if is_dir {
				// A nested config marks a separate project.
				if has_project_config(&path) {
					continue;
				}
				self.walk(&path, files, visited_dirs)?;
			} else if self.is_scannable(&path) {
				files.push(path);
			}
		}

		Ok(())
	}

	fn is_scannable(&self, path: &Path) -> bool {
		let fits = std::fs::metadata(path).is_ok_and(|meta| meta.len() <= self.options.max_file_size);
		if !fits {
			return false;
		}

		if language_for_path(path).is_some() {
			return true;
		}

		path.strip_prefix(self.root)
			.is_ok_and(|relative| self.options.include_set.is_match(relative))
	}
}

fn is_ignored_directory_name(name: &str) -> bool {
	name.starts_with('.') || name == "node_modules" || name == "target"
}

fn has_project_config(dir: &Path) -> bool {
	CONFIG_FILE_CANDIDATES
		.iter()
		.any(|candidate| dir.join(candidate).is_file())
}

/// Build a `GlobSet` from a list of glob pattern strings. Invalid globs are
/// skipped.
fn build_glob_set(patterns: &[String]) -> GlobSet {
	let mut builder = GlobSetBuilder::new();
	for pattern in patterns {
		if let Ok(glob) = Glob::new(pattern) {
			builder.add(glob);
		}
	}
	builder.build().unwrap_or_else(|_| GlobSet::empty())
}

fn build_exclude_matcher(root: &Path, patterns: &[String]) -> VincResult<Gitignore> {
	let mut builder = GitignoreBuilder::new(root);
	for pattern in patterns {
		builder.add_line(None, pattern).map_err(|e| {
			VincError::ConfigParse(format!("invalid exclude pattern `{pattern}`: {e}"))
		})?;
	}
	builder
		.build()
		.map_err(|e| VincError::ConfigParse(format!("failed to build exclude rules: {e}")))
}

fn build_gitignore(root: &Path) -> Gitignore {
	let mut builder = GitignoreBuilder::new(root);
	let gitignore_path = root.join(".gitignore");
	if gitignore_path.exists() {
		let _ = builder.add(gitignore_path);
	}
	builder.build().unwrap_or_else(|_| Gitignore::empty())
}

#[derive(Debug, Clone)]
struct Snapshot {
	raw: String,
	document: Document,
}

/// A file whose content a pass changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
	pub path: PathBuf,
	pub before: String,
	pub after: String,
}

/// A [`DocumentStore`] backed by the file system.
///
/// The text returned by `read` is remembered; `apply` refuses to write when
/// the file changed on disk in the meantime. CRLF files keep their line
/// endings. In dry-run mode changes are collected but never written.
#[derive(Debug)]
pub struct FsStore {
	dry_run: bool,
	max_file_size: u64,
	snapshots: HashMap<PathBuf, Snapshot>,
	changes: Vec<FileChange>,
}

impl FsStore {
	pub fn new(max_file_size: u64) -> Self {
		Self {
			dry_run: false,
			max_file_size,
			snapshots: HashMap::new(),
			changes: Vec::new(),
		}
	}

	pub fn dry_run(max_file_size: u64) -> Self {
		Self {
			dry_run: true,
			..Self::new(max_file_size)
		}
	}

	/// Every change applied (or, in dry-run mode, computed) so far.
	pub fn changes(&self) -> &[FileChange] {
		&self.changes
	}

	pub fn take_changes(&mut self) -> Vec<FileChange> {
		std::mem::take(&mut self.changes)
	}
}

impl DocumentStore for FsStore {
	fn read(&mut self, path: &Path) -> VincResult<Document> {
		let metadata = std::fs::metadata(path)?;
		if metadata.len() > self.max_file_size {
			return Err(VincError::FileTooLarge {
				path: path.display().to_string(),
				size: metadata.len(),
				limit: self.max_file_size,
			});
		}

		let raw = std::fs::read_to_string(path)?;
		let document = Document::from_text(normalize_path(path), document_language(path), &raw);
		self.snapshots.insert(
			normalize_path(path),
			Snapshot {
				raw,
				document: document.clone(),
			},
		);

		Ok(document)
	}

	fn is_live(&self, path: &Path) -> bool {
		path.is_file()
	}

	fn apply(&mut self, path: &Path, script: &EditScript) -> VincResult<()> {
		let unavailable = || {
			VincError::DocumentUnavailable {
				path: path.display().to_string(),
			}
		};
		let snapshot = self.snapshots.get(&normalize_path(path)).ok_or_else(unavailable)?;
		let current = std::fs::read_to_string(path).map_err(|_| unavailable())?;
		if current != snapshot.raw {
			return Err(unavailable());
		}

		let mut after = script.apply(&snapshot.document.lines).join("\n");
		if snapshot.raw.contains("\r\n") {
			after = after.replace('\n', "\r\n");
		}

		if after == snapshot.raw {
			return Ok(());
		}

		if !self.dry_run {
			std::fs::write(path, &after)?;
		}

		self.changes.push(FileChange {
			path: path.to_path_buf(),
			before: snapshot.raw.clone(),
			after,
		});

		Ok(())
	}

	fn writes_through(&self) -> bool {
		!self.dry_run
	}
}
