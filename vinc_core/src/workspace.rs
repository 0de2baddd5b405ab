use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;
use tracing::warn;

use crate::VincError;
use crate::VincResult;
use crate::config::VincConfig;
use crate::directive::Document;
use crate::directive::Issue;
use crate::edit::EditScript;
use crate::engine::SyncOptions;
use crate::engine::SyncPlan;
use crate::engine::plan;
use crate::guard::normalize_path;
use crate::mapping::SourceMap;
use crate::rules::RuleResolver;

/// Access to the documents being synchronized: files on disk for the command
/// line, open buffers for an editor.
pub trait DocumentStore {
	/// The current text of a document.
	fn read(&mut self, path: &Path) -> VincResult<Document>;

	/// Whether the document can still be edited.
	fn is_live(&self, path: &Path) -> bool;

	/// Apply every edit of `script` to the document as one change. The
	/// script is in the coordinates of the last text returned by
	/// [`DocumentStore::read`].
	fn apply(&mut self, path: &Path, script: &EditScript) -> VincResult<()>;

	/// Whether applied edits are visible to later reads, including reads of
	/// included files. Passes over dependents only settle when they are.
	fn writes_through(&self) -> bool {
		true
	}
}

/// Upper bound on the rounds of [`Workspace::process_all`]. Documents
/// including each other never settle.
pub const MAX_SYNC_ROUNDS: usize = 8;

/// Proof that a document is being updated programmatically. Hand it back to
/// [`Workspace::finish_update`] once the update has been applied or has
/// failed.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct UpdateToken {
	path: PathBuf,
	id: u64,
}

impl UpdateToken {
	pub fn path(&self) -> &Path {
		&self.path
	}
}

/// What the workspace tracks per document between passes.
#[derive(Debug, Clone, Default)]
pub struct DocumentState {
	pub language: String,
	/// Set while an update of this document is in flight.
	pub updating: Option<u64>,
	/// Issues found by the last pass.
	pub issues: Vec<Issue>,
}

/// The result of one pass over one document.
#[derive(Debug)]
pub struct PassOutcome {
	pub path: PathBuf,
	pub plan: SyncPlan,
	/// Whether the edits were applied to the document.
	pub applied: bool,
	/// Why planning or applying failed. Failures stay scoped to this pass.
	pub failure: Option<VincError>,
}

impl PassOutcome {
	fn failed(path: PathBuf, plan: SyncPlan, error: VincError) -> Self {
		Self {
			path,
			plan,
			applied: false,
			failure: Some(error),
		}
	}

	pub fn issue_count(&self) -> usize {
		self.plan.issue_count()
	}

	pub fn changed(&self) -> bool {
		self.applied && !self.plan.edits.is_empty()
	}
}

/// Owns the resolved rules, the source mapping and per document state, and
/// runs synchronization passes against a [`DocumentStore`].
#[derive(Debug)]
pub struct Workspace {
	resolver: RuleResolver,
	options: SyncOptions,
	mapping: SourceMap,
	documents: HashMap<PathBuf, DocumentState>,
	next_token: u64,
}

impl Workspace {
	pub fn new(resolver: RuleResolver, options: SyncOptions) -> Self {
		Self {
			resolver,
			options,
			mapping: SourceMap::new(),
			documents: HashMap::new(),
			next_token: 0,
		}
	}

	pub fn from_config(config: &VincConfig) -> VincResult<Self> {
		Ok(Self::new(RuleResolver::new(config)?, SyncOptions::from_config(config)))
	}

	pub fn resolver(&self) -> &RuleResolver {
		&self.resolver
	}

	pub fn options(&self) -> &SyncOptions {
		&self.options
	}

	pub fn mapping(&self) -> &SourceMap {
		&self.mapping
	}

	pub fn document_state(&self, path: &Path) -> Option<&DocumentState> {
		self.documents.get(&normalize_path(path))
	}

	/// Plan a document and record what the plan found: its sources replace
	/// the document's previous entries in the mapping and its issues replace
	/// the previous issues.
	pub fn plan_document(&mut self, document: &Document) -> VincResult<SyncPlan> {
		let plan = plan(document, &self.resolver, &self.options)?;
		let path = normalize_path(&document.path);

		self.mapping.replace_document(&path, &plan.sources);
		let state = self.documents.entry(path).or_default();
		state.language.clone_from(&document.language);
		state.issues.clone_from(&plan.issues);

		Ok(plan)
	}

	/// Run a full pass over one document: read, plan, check the document is
	/// still live and apply every edit as one batch.
	pub fn process<S: DocumentStore + ?Sized>(&mut self, store: &mut S, path: &Path) -> PassOutcome {
		let path = normalize_path(path);

		let document = match store.read(&path) {
			Ok(document) => document,
			Err(error) => return PassOutcome::failed(path, SyncPlan::default(), error),
		};

		let plan = match self.plan_document(&document) {
			Ok(plan) => plan,
			Err(error) => return PassOutcome::failed(path, SyncPlan::default(), error),
		};

		if plan.edits.is_empty() {
			return PassOutcome {
				path,
				plan,
				applied: false,
				failure: None,
			};
		}

		if !store.is_live(&path) {
			let error = VincError::DocumentUnavailable {
				path: path.display().to_string(),
			};
			return PassOutcome::failed(path, plan, error);
		}

		let Some(token) = self.begin_update(&path) else {
			debug!(document = %path.display(), "update already in progress, skipping pass");
			return PassOutcome {
				path,
				plan,
				applied: false,
				failure: None,
			};
		};

		let result = store.apply(&path, &plan.edits);
		self.finish_update(token);

		match result {
			Ok(()) => {
				debug!(document = %path.display(), edits = plan.edits.len(), "applied edits");
				PassOutcome {
					path,
					plan,
					applied: true,
					failure: None,
				}
			}
			Err(error) => {
				warn!(document = %path.display(), %error, "failed to apply edits");
				PassOutcome::failed(path, plan, error)
			}
		}
	}

	/// Run a pass over every document of `paths`, then over the dependents of
	/// every document a pass changed, until a round changes nothing.
	///
	/// A document included by another is often a document with directives of
	/// its own, and the including document has to be planned again once it
	/// was expanded. Returns one outcome per document: the last one that
	/// changed it, or its only one.
	pub fn process_all<S: DocumentStore + ?Sized>(&mut self, store: &mut S, paths: &[PathBuf]) -> Vec<PassOutcome> {
		let mut outcomes: Vec<PassOutcome> = Vec::with_capacity(paths.len());
		let mut positions: HashMap<PathBuf, usize> = HashMap::new();
		let mut pending: Vec<PathBuf> = paths.iter().map(PathBuf::as_path).map(normalize_path).collect();

		for round in 0..MAX_SYNC_ROUNDS {
			let mut changed = BTreeSet::new();

			for path in pending {
				let outcome = self.process(store, &path);
				if outcome.changed() {
					changed.insert(outcome.path.clone());
				}

				match positions.get(&outcome.path).copied() {
					Some(index) if outcome.changed() || outcome.failure.is_some() => outcomes[index] = outcome,
					Some(_) => {}
					None => {
						positions.insert(outcome.path.clone(), outcomes.len());
						outcomes.push(outcome);
					}
				}
			}

			if changed.is_empty() || !store.writes_through() {
				return outcomes;
			}

			let dependents: BTreeSet<PathBuf> = changed
				.iter()
				.flat_map(|source| self.dependents_of(source))
				.collect();
			if dependents.is_empty() {
				return outcomes;
			}

			debug!(round, documents = dependents.len(), "included documents changed, processing dependents");
			pending = dependents.into_iter().collect();
		}

		warn!(
			rounds = MAX_SYNC_ROUNDS,
			"documents did not settle, they probably include each other"
		);
		outcomes
	}

	/// Mark a document as being updated programmatically. Returns `None`
	/// when an update of the document is already in flight.
	pub fn begin_update(&mut self, path: &Path) -> Option<UpdateToken> {
		let path = normalize_path(path);
		let state = self.documents.entry(path.clone()).or_default();
		if state.updating.is_some() {
			return None;
		}

		self.next_token += 1;
		state.updating = Some(self.next_token);
		Some(UpdateToken {
			path,
			id: self.next_token,
		})
	}

	/// Clear the processing token of a document.
	pub fn finish_update(&mut self, token: UpdateToken) {
		if let Some(state) = self.documents.get_mut(&token.path) {
			if state.updating == Some(token.id) {
				state.updating = None;
			}
		}
	}

	/// Whether changes to the document are currently our own.
	pub fn is_updating(&self, path: &Path) -> bool {
		self.document_state(path)
			.is_some_and(|state| state.updating.is_some())
	}

	/// Documents that include `source` and need a pass when it changes.
	pub fn dependents_of(&self, source: &Path) -> Vec<PathBuf> {
		self.mapping.documents_for(source)
	}

	/// Drop everything known about a document.
	pub fn forget(&mut self, path: &Path) {
		let path = normalize_path(path);
		self.mapping.remove_document(&path);
		self.documents.remove(&path);
	}
}
