use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tower_lsp_server::Client;
use tower_lsp_server::LanguageServer;
use tower_lsp_server::jsonrpc::Result as LspResult;
use tower_lsp_server::ls_types::*;
use tracing::debug;
use tracing::warn;
use vinc_core::Document;
use vinc_core::EditScript;
use vinc_core::Issue;
use vinc_core::IssueKind;
use vinc_core::LineEdit;
use vinc_core::Region;
use vinc_core::UpdateToken;
use vinc_core::VincConfig;
use vinc_core::VincResult;
use vinc_core::Workspace;
use vinc_core::config::CONFIG_FILE_CANDIDATES;
use vinc_core::document_language;
use vinc_core::guard::normalize_path;
use vinc_core::is_directive_line;
use vinc_core::protected_spans;
use vinc_core::scan;

/// Command synchronizing one document (first argument, a URI) or every open
/// document.
pub const UPDATE_COMMAND: &str = "vinc.update";

/// Delay before a region edited by the user is restored.
const PROTECTION_DELAY: Duration = Duration::from_millis(150);

/// Delay before a pass runs after the user typed on a directive line.
const DIRECTIVE_DELAY: Duration = Duration::from_millis(300);

/// State for a single open document.
#[derive(Debug, Clone)]
struct OpenDocument {
	uri: Uri,
	/// The full text content of the document.
	text: String,
	version: i32,
	language: String,
	/// Bumped on every change; a delayed pass only runs if it is unchanged.
	generation: u64,
}

/// What a content change means for the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeKind {
	/// The document is not open.
	Unknown,
	/// The change is the result of our own edit.
	SelfInflicted,
	/// The user edited a region; restore it after a delay.
	Protected(u64),
	/// The user is typing a directive; wait for them to finish.
	Directive(u64),
	/// Any other change; synchronize right away.
	Edited,
}

/// A pass planned against one snapshot of an open document.
#[derive(Debug)]
struct PreparedPass {
	uri: Uri,
	version: i32,
	diagnostics: Vec<Diagnostic>,
	/// The edit to send to the client and the token guarding it.
	update: Option<(UpdateToken, WorkspaceEdit)>,
}

/// Server state shared across all LSP requests.
#[derive(Debug, Default)]
struct ServerState {
	/// The workspace root path.
	root: Option<PathBuf>,
	/// `None` until the server is initialized.
	workspace: Option<Workspace>,
	/// Open documents keyed by normalized path.
	documents: HashMap<PathBuf, OpenDocument>,
	/// Documents whose pass was skipped while an update was in flight.
	deferred: HashSet<PathBuf>,
}

impl ServerState {
	/// Load the workspace from the config in the root. An invalid config
	/// falls back to the defaults; the error is returned for reporting.
	fn load_workspace(&mut self) -> Option<String> {
		let loaded = match &self.root {
			Some(root) => VincConfig::load_or_default(root),
			None => Ok(VincConfig::default()),
		};

		let (config, failure) = match loaded {
			Ok(config) => (config, None),
			Err(error) => (VincConfig::default(), Some(error.to_string())),
		};

		match Workspace::from_config(&config) {
			Ok(workspace) => {
				self.workspace = Some(workspace);
				failure
			}
			Err(error) => {
				let message = error.to_string();
				match Workspace::from_config(&VincConfig::default()) {
					Ok(workspace) => self.workspace = Some(workspace),
					Err(_) => self.workspace = None,
				}
				Some(message)
			}
		}
	}

	fn is_config_path(&self, path: &Path) -> bool {
		self.root.as_ref().is_some_and(|root| {
			CONFIG_FILE_CANDIDATES
				.iter()
				.any(|candidate| normalize_path(&root.join(candidate)) == path)
		})
	}

	fn open(&mut self, path: PathBuf, uri: Uri, text: String, version: i32, language: String) {
		let language = if language.is_empty() {
			document_language(&path)
		} else {
			language
		};

		self.documents.insert(
			path,
			OpenDocument {
				uri,
				text,
				version,
				language,
				generation: 0,
			},
		);
	}

	fn close(&mut self, path: &Path) -> Option<OpenDocument> {
		if let Some(workspace) = &mut self.workspace {
			workspace.forget(path);
		}
		self.deferred.remove(path);
		self.documents.remove(path)
	}

	fn generation(&self, path: &Path) -> Option<u64> {
		self.documents.get(path).map(|doc| doc.generation)
	}

	fn open_paths(&self) -> Vec<PathBuf> {
		let mut paths: Vec<_> = self.documents.keys().cloned().collect();
		paths.sort();
		paths
	}

	/// Open documents including `source`.
	fn open_dependents(&self, source: &Path) -> Vec<PathBuf> {
		let Some(workspace) = &self.workspace else {
			return Vec::new();
		};

		workspace
			.dependents_of(source)
			.into_iter()
			.filter(|path| self.documents.contains_key(path))
			.collect()
	}

	/// Lines of the document the user must not edit by hand.
	fn protected_lines(&self, path: &Path, doc: &OpenDocument) -> Vec<Region> {
		let Some(workspace) = &self.workspace else {
			return Vec::new();
		};

		let document = Document::from_text(path, doc.language.clone(), &doc.text);
		match scan(&document, workspace.resolver()) {
			Ok(scan) => protected_spans(&document.lines, &scan),
			Err(_) => Vec::new(),
		}
	}

	/// Apply the content changes of a `didChange` notification and classify
	/// them.
	fn apply_changes(
		&mut self,
		path: &Path,
		version: i32,
		changes: Vec<TextDocumentContentChangeEvent>,
	) -> ChangeKind {
		let self_inflicted = self
			.workspace
			.as_ref()
			.is_some_and(|workspace| workspace.is_updating(path));

		let Some(mut doc) = self.documents.get(path).cloned() else {
			return ChangeKind::Unknown;
		};

		let mut protected = false;
		let mut directive = false;

		for change in changes {
			let Some(range) = change.range else {
				doc.text = change.text;
				continue;
			};

			if !self_inflicted && !protected {
				let spans = self.protected_lines(path, &doc);
				protected = touches_any(range, &spans);
			}

			let start = lsp_position_to_offset(&doc.text, range.start);
			let end = lsp_position_to_offset(&doc.text, range.end);
			if let (Some(start), Some(end)) = (start, end) {
				doc.text.replace_range(start..end, &change.text);
			}

			let first = range.start.line as usize;
			let last = first + change.text.matches('\n').count();
			directive |= doc
				.text
				.split('\n')
				.skip(first)
				.take(last - first + 1)
				.any(is_directive_line);
		}

		doc.version = version;
		doc.generation += 1;
		let generation = doc.generation;
		self.documents.insert(path.to_path_buf(), doc);

		if self_inflicted {
			ChangeKind::SelfInflicted
		} else if protected {
			ChangeKind::Protected(generation)
		} else if directive {
			ChangeKind::Directive(generation)
		} else {
			ChangeKind::Edited
		}
	}

	/// Plan a pass over an open document and, when it has edits, take the
	/// document's processing token. Returns `None` when the document is not
	/// open.
	fn prepare_pass(&mut self, path: &Path) -> VincResult<Option<PreparedPass>> {
		let Some(doc) = self.documents.get(path) else {
			return Ok(None);
		};
		let Some(workspace) = &mut self.workspace else {
			return Ok(None);
		};

		let document = Document::from_text(path, doc.language.clone(), &doc.text);
		let plan = workspace.plan_document(&document)?;
		let diagnostics = compute_diagnostics(&plan.issues, &document.lines);

		let update = if plan.edits.is_empty() {
			None
		} else if let Some(token) = workspace.begin_update(path) {
			let edit = workspace_edit(&doc.uri, doc.version, &doc.text, &document.lines, &plan.edits);
			Some((token, edit))
		} else {
			debug!(document = %path.display(), "update in flight, deferring pass");
			self.deferred.insert(path.to_path_buf());
			None
		};

		Ok(Some(PreparedPass {
			uri: doc.uri.clone(),
			version: doc.version,
			diagnostics,
			update,
		}))
	}

	/// Release the processing token. Returns whether a pass was deferred
	/// while it was held.
	fn finish_update(&mut self, token: UpdateToken) -> bool {
		let path = token.path().to_path_buf();
		if let Some(workspace) = &mut self.workspace {
			workspace.finish_update(token);
		}
		self.deferred.remove(&path)
	}
}

/// Build the workspace edit applying `script` to the document as one batch.
/// The document version guards against applying it to a newer snapshot.
fn workspace_edit(uri: &Uri, version: i32, text: &str, lines: &[String], script: &EditScript) -> WorkspaceEdit {
	let eol = if text.contains("\r\n") { "\r\n" } else { "\n" };
	let edits = script
		.edits()
		.iter()
		.map(|edit| OneOf::Left(to_text_edit(lines, edit, eol)))
		.collect();

	WorkspaceEdit {
		document_changes: Some(DocumentChanges::Edits(vec![TextDocumentEdit {
			text_document: OptionalVersionedTextDocumentIdentifier {
				uri: uri.clone(),
				version: Some(version),
			},
			edits,
		}])),
		..Default::default()
	}
}

/// Convert a line edit to a text edit. Positions are in the coordinates of
/// the original snapshot, which is what the protocol expects for every edit
/// of one batch.
fn to_text_edit(lines: &[String], edit: &LineEdit, eol: &str) -> TextEdit {
	let last = lines.len().saturating_sub(1);
	let end_of_document = Position::new(
		last as u32,
		lines.get(last).map_or(0, |line| utf16_len(line)),
	);

	// The replaced lines are followed by a line break that stays in place.
	if edit.end < lines.len() {
		let text: String = edit
			.replacement
			.iter()
			.map(|line| format!("{line}{eol}"))
			.collect();
		return TextEdit::new(
			Range::new(
				Position::new(edit.start as u32, 0),
				Position::new(edit.end as u32, 0),
			),
			text,
		);
	}

	// Appending after the last line.
	if edit.start >= lines.len() {
		let text = format!("{eol}{}", edit.replacement.join(eol));
		return TextEdit::new(Range::new(end_of_document, end_of_document), text);
	}

	// Removing the last lines takes the line break before them too.
	if edit.replacement.is_empty() && edit.start > 0 {
		let previous = edit.start - 1;
		let start = Position::new(previous as u32, utf16_len(&lines[previous]));
		return TextEdit::new(Range::new(start, end_of_document), String::new());
	}

	TextEdit::new(
		Range::new(Position::new(edit.start as u32, 0), end_of_document),
		edit.replacement.join(eol),
	)
}

fn utf16_len(line: &str) -> u32 {
	line.encode_utf16().count() as u32
}

fn touches_any(range: Range, spans: &[Region]) -> bool {
	let first = range.start.line as usize;
	let last = range.end.line as usize;
	spans
		.iter()
		.any(|span| first <= span.end && span.start <= last)
}

/// One diagnostic per unresolved directive, anchored to the directive line.
fn compute_diagnostics(issues: &[Issue], lines: &[String]) -> Vec<Diagnostic> {
	issues
		.iter()
		.map(|issue| {
			let width = lines.get(issue.line).map_or(0, |line| utf16_len(line));
			let (severity, code) = match issue.kind {
				IssueKind::MissingFile => (DiagnosticSeverity::WARNING, "vinc::missing_include"),
				IssueKind::SelfInclude => (DiagnosticSeverity::ERROR, "vinc::self_include"),
				IssueKind::ReadFailed => (DiagnosticSeverity::INFORMATION, "vinc::read_failed"),
			};

			Diagnostic {
				range: Range::new(
					Position::new(issue.line as u32, 0),
					Position::new(issue.line as u32, width),
				),
				severity: Some(severity),
				code: Some(NumberOrString::String(code.to_string())),
				source: Some("vinc".to_string()),
				message: issue.message(),
				..Default::default()
			}
		})
		.collect()
}

/// Convert an LSP `Position` (0-indexed line, character in UTF-16 code units)
/// to a byte offset within `content`. Returns `None` if the position is out of
/// bounds.
fn lsp_position_to_offset(content: &str, position: Position) -> Option<usize> {
	let mut offset = 0;
	for (i, line) in content.split('\n').enumerate() {
		if i == position.line as usize {
			// LSP character offsets are in UTF-16 code units, so we need to
			// walk the line converting from UTF-16 units to byte indices.
			let mut utf16_offset = 0u32;
			for (byte_idx, c) in line.char_indices() {
				if utf16_offset == position.character {
					return Some(offset + byte_idx);
				}
				utf16_offset += c.len_utf16() as u32;
			}
			// Position at end of line (past last character).
			if utf16_offset == position.character {
				return Some(offset + line.len());
			}
			return None;
		}
		offset += line.len() + 1; // +1 for '\n'
	}
	None
}

fn uri_to_path(uri: &Uri) -> Option<PathBuf> {
	uri.to_file_path().map(|path| normalize_path(&path))
}

/// Run passes over a document until none is deferred: plan under the lock,
/// send the edit without it, then release the processing token.
async fn sync_document(client: &Client, state: &Arc<Mutex<ServerState>>, path: &Path) {
	loop {
		let prepared = {
			let mut state = state.lock().await;
			state.prepare_pass(path)
		};

		let pass = match prepared {
			Ok(Some(pass)) => pass,
			Ok(None) => return,
			Err(error) => {
				client
					.log_message(
						MessageType::ERROR,
						format!("vinc: failed to process {}: {error}", path.display()),
					)
					.await;
				return;
			}
		};

		let mut rerun = false;
		if let Some((token, edit)) = pass.update {
			let result = client.apply_edit(edit).await;
			rerun = state.lock().await.finish_update(token);

			match result {
				Ok(response) if response.applied => {
					debug!(document = %path.display(), "applied region edits");
				}
				Ok(response) => {
					let reason = response
						.failure_reason
						.unwrap_or_else(|| "the document changed".to_string());
					client
						.log_message(
							MessageType::ERROR,
							format!("vinc: edits to {} were not applied: {reason}", path.display()),
						)
						.await;
				}
				Err(error) => {
					client
						.log_message(
							MessageType::ERROR,
							format!("vinc: failed to apply edits to {}: {error}", path.display()),
						)
						.await;
				}
			}
		}

		client
			.publish_diagnostics(pass.uri, pass.diagnostics, Some(pass.version))
			.await;

		if !rerun {
			return;
		}
	}
}

/// Run a pass after `delay` unless the document changed in the meantime.
fn schedule_sync(client: &Client, state: &Arc<Mutex<ServerState>>, path: PathBuf, delay: Duration, generation: u64) {
	let client = client.clone();
	let state = Arc::clone(state);

	tokio::spawn(async move {
		tokio::time::sleep(delay).await;

		let current = state.lock().await.generation(&path);
		if current != Some(generation) {
			debug!(document = %path.display(), "delayed pass superseded");
			return;
		}

		sync_document(&client, &state, &path).await;
	});
}

/// The vinc language server.
#[derive(Debug)]
pub struct VincLanguageServer {
	client: Client,
	state: Arc<Mutex<ServerState>>,
}

impl VincLanguageServer {
	pub fn new(client: Client) -> Self {
		Self {
			client,
			state: Arc::new(Mutex::new(ServerState::default())),
		}
	}

	async fn sync(&self, path: &Path) {
		sync_document(&self.client, &self.state, path).await;
	}

	async fn sync_all(&self, paths: &[PathBuf]) {
		for path in paths {
			self.sync(path).await;
		}
	}

	async fn reload(&self) {
		let (failure, paths) = {
			let mut state = self.state.lock().await;
			(state.load_workspace(), state.open_paths())
		};

		if let Some(message) = failure {
			warn!(%message, "invalid configuration, using defaults");
			self.client
				.show_message(
					MessageType::WARNING,
					format!("vinc: invalid configuration, using defaults: {message}"),
				)
				.await;
		}

		self.sync_all(&paths).await;
	}
}

impl LanguageServer for VincLanguageServer {
	async fn initialize(&self, params: InitializeParams) -> LspResult<InitializeResult> {
		// Determine workspace root. Prefer `workspace_folders` (modern LSP),
		// fall back to the deprecated `root_uri` for older clients.
		let root = params
			.workspace_folders
			.as_ref()
			.and_then(|folders| folders.first())
			.and_then(|folder| uri_to_path(&folder.uri))
			.or_else(|| {
				#[allow(deprecated)]
				params.root_uri.as_ref().and_then(uri_to_path)
			});

		let failure = {
			let mut state = self.state.lock().await;
			state.root = root;
			state.load_workspace()
		};

		if let Some(message) = failure {
			warn!(%message, "invalid configuration, using defaults");
		}

		Ok(InitializeResult {
			capabilities: ServerCapabilities {
				text_document_sync: Some(TextDocumentSyncCapability::Options(
					TextDocumentSyncOptions {
						open_close: Some(true),
						change: Some(TextDocumentSyncKind::INCREMENTAL),
						save: Some(TextDocumentSyncSaveOptions::Supported(true)),
						..Default::default()
					},
				)),
				execute_command_provider: Some(ExecuteCommandOptions {
					commands: vec![UPDATE_COMMAND.to_string()],
					..Default::default()
				}),
				..Default::default()
			},
			server_info: Some(ServerInfo {
				name: "vinc-lsp".to_string(),
				version: Some(env!("CARGO_PKG_VERSION").to_string()),
			}),
			offset_encoding: None,
		})
	}

	async fn initialized(&self, _: InitializedParams) {
		// Watch every file: any of them may be included somewhere.
		let options = DidChangeWatchedFilesRegistrationOptions {
			watchers: vec![FileSystemWatcher {
				glob_pattern: GlobPattern::String("**/*".to_string()),
				kind: None,
			}],
		};

		let registered = match serde_json::to_value(options) {
			Ok(register_options) => {
				self.client
					.register_capability(vec![Registration {
						id: "vinc-watched-files".to_string(),
						method: "workspace/didChangeWatchedFiles".to_string(),
						register_options: Some(register_options),
					}])
					.await
					.is_ok()
			}
			Err(_) => false,
		};

		if !registered {
			debug!("client did not accept the file watcher registration");
		}

		self.client
			.log_message(MessageType::INFO, "vinc language server initialized")
			.await;
	}

	async fn shutdown(&self) -> LspResult<()> {
		Ok(())
	}

	async fn did_open(&self, params: DidOpenTextDocumentParams) {
		let item = params.text_document;
		let Some(path) = uri_to_path(&item.uri) else {
			return;
		};

		{
			let mut state = self.state.lock().await;
			state.open(
				path.clone(),
				item.uri,
				item.text,
				item.version,
				item.language_id,
			);
		}

		self.sync(&path).await;
	}

	async fn did_change(&self, params: DidChangeTextDocumentParams) {
		let Some(path) = uri_to_path(&params.text_document.uri) else {
			return;
		};

		let kind = {
			let mut state = self.state.lock().await;
			state.apply_changes(
				&path,
				params.text_document.version,
				params.content_changes,
			)
		};

		match kind {
			ChangeKind::Unknown | ChangeKind::SelfInflicted => {}
			ChangeKind::Protected(generation) => {
				self.client
					.show_message(
						MessageType::WARNING,
						"vinc: included regions are generated; edit the included file instead",
					)
					.await;
				schedule_sync(
					&self.client,
					&self.state,
					path,
					PROTECTION_DELAY,
					generation,
				);
			}
			ChangeKind::Directive(generation) => {
				schedule_sync(&self.client, &self.state, path, DIRECTIVE_DELAY, generation);
			}
			ChangeKind::Edited => self.sync(&path).await,
		}
	}

	async fn did_save(&self, params: DidSaveTextDocumentParams) {
		let Some(path) = uri_to_path(&params.text_document.uri) else {
			return;
		};

		let (is_config, dependents) = {
			let state = self.state.lock().await;
			(state.is_config_path(&path), state.open_dependents(&path))
		};

		if is_config {
			self.reload().await;
			return;
		}

		self.sync(&path).await;
		self.sync_all(&dependents).await;
	}

	async fn did_close(&self, params: DidCloseTextDocumentParams) {
		let uri = params.text_document.uri;
		if let Some(path) = uri_to_path(&uri) {
			let mut state = self.state.lock().await;
			state.close(&path);
		}
		// Clear diagnostics for the closed document.
		self.client.publish_diagnostics(uri, Vec::new(), None).await;
	}

	async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
		let (reload, targets) = {
			let state = self.state.lock().await;
			let mut reload = false;
			let mut targets = BTreeSet::new();

			for change in &params.changes {
				let Some(path) = uri_to_path(&change.uri) else {
					continue;
				};
				reload |= state.is_config_path(&path);
				targets.extend(state.open_dependents(&path));
			}

			(reload, targets.into_iter().collect::<Vec<_>>())
		};

		if reload {
			self.reload().await;
			return;
		}

		debug!(documents = targets.len(), "included files changed");
		self.sync_all(&targets).await;
	}

	async fn execute_command(&self, params: ExecuteCommandParams) -> LspResult<Option<Value>> {
		if params.command != UPDATE_COMMAND {
			return Ok(None);
		}

		let requested = params
			.arguments
			.first()
			.and_then(Value::as_str)
			.and_then(|uri| uri.parse::<Uri>().ok())
			.and_then(|uri| uri_to_path(&uri));

		let paths = match requested {
			Some(path) => vec![path],
			None => self.state.lock().await.open_paths(),
		};

		self.sync_all(&paths).await;

		let issues: usize = {
			let state = self.state.lock().await;
			paths
				.iter()
				.filter_map(|path| {
					state
						.workspace
						.as_ref()
						.and_then(|workspace| workspace.document_state(path))
				})
				.map(|doc| doc.issues.len())
				.sum()
		};

		Ok(Some(serde_json::json!({
			"documents": paths.len(),
			"issues": issues,
		})))
	}
}

/// Start the LSP server on stdin/stdout. This is used by both the `vinc lsp`
/// CLI subcommand and editors embedding the server.
pub async fn run_server() {
	// stdout carries the protocol; logs go to stderr.
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.try_init();

	let stdin = tokio::io::stdin();
	let stdout = tokio::io::stdout();

	let (service, socket) = tower_lsp_server::LspService::new(VincLanguageServer::new);
	tower_lsp_server::Server::new(stdin, stdout, socket)
		.serve(service)
		.await;
}

#[cfg(test)]
mod __tests;
