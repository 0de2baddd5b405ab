use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

use crate::guard::normalize_path;

/// Which documents include which source files.
///
/// Both directions are kept so that a document can be purged without
/// scanning every source. Paths are lexically normalized before use.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
	by_source: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
	by_document: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
}

impl SourceMap {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record the sources `document` includes now, dropping whatever it
	/// included before.
	pub fn replace_document<I, P>(&mut self, document: &Path, sources: I)
	where
		I: IntoIterator<Item = P>,
		P: AsRef<Path>,
	{
		self.remove_document(document);

		let document = normalize_path(document);
		let sources: BTreeSet<PathBuf> = sources
			.into_iter()
			.map(|source| normalize_path(source.as_ref()))
			.collect();

		if sources.is_empty() {
			return;
		}

		for source in &sources {
			self.by_source
				.entry(source.clone())
				.or_default()
				.insert(document.clone());
		}
		self.by_document.insert(document, sources);
	}

	/// Purge every association of `document`.
	pub fn remove_document(&mut self, document: &Path) {
		let document = normalize_path(document);
		let Some(sources) = self.by_document.remove(&document) else {
			return;
		};

		for source in sources {
			if let Some(documents) = self.by_source.get_mut(&source) {
				documents.remove(&document);
				if documents.is_empty() {
					self.by_source.remove(&source);
				}
			}
		}
	}

	/// Documents currently including `source`.
	pub fn documents_for(&self, source: &Path) -> Vec<PathBuf> {
		self.by_source
			.get(&normalize_path(source))
			.map(|documents| documents.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// Sources currently included by `document`.
	pub fn sources_for(&self, document: &Path) -> Vec<PathBuf> {
		self.by_document
			.get(&normalize_path(document))
			.map(|sources| sources.iter().cloned().collect())
			.unwrap_or_default()
	}

	pub fn is_source(&self, path: &Path) -> bool {
		self.by_source.contains_key(&normalize_path(path))
	}

	/// Every source with at least one including document.
	pub fn sources(&self) -> impl Iterator<Item = &Path> {
		self.by_source.keys().map(PathBuf::as_path)
	}

	pub fn is_empty(&self) -> bool {
		self.by_source.is_empty()
	}
}
