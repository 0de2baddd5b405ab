use std::path::Path;

use rstest::rstest;
use similar_asserts::assert_eq;
#[allow(unused_imports)]
use tower_lsp_server::ls_types::*;
use vinc_core::AnyEmptyResult;
use vinc_core::EditScript;
use vinc_core::LineEdit;
use vinc_core::VincConfig;
use vinc_core::Workspace;

use super::*;

fn state_with(root: &Path, config: &VincConfig) -> ServerState {
	ServerState {
		root: Some(normalize_path(root)),
		workspace: Workspace::from_config(config).ok(),
		..ServerState::default()
	}
}

fn file_uri(path: &Path) -> Uri {
	Uri::from_file_path(path).unwrap_or_else(|| panic!("invalid test path: {}", path.display()))
}

fn open(state: &mut ServerState, path: &Path, text: &str, language: &str) -> PathBuf {
	let path = normalize_path(path);
	state.open(
		path.clone(),
		file_uri(&path),
		text.to_string(),
		1,
		language.to_string(),
	);
	path
}

fn text_edits(edit: &WorkspaceEdit) -> Vec<TextEdit> {
	match &edit.document_changes {
		Some(DocumentChanges::Edits(documents)) => {
			documents
				.iter()
				.flat_map(|document| &document.edits)
				.map(|edit| {
					match edit {
						OneOf::Left(edit) => edit.clone(),
						OneOf::Right(annotated) => annotated.text_edit.clone(),
					}
				})
				.collect()
		}
		_ => panic!("expected document edits"),
	}
}

/// Apply edits the way a client does: every range refers to the original
/// text.
fn apply_text_edits(text: &str, edits: &[TextEdit]) -> String {
	let mut ranges: Vec<(usize, usize, &str)> = edits
		.iter()
		.map(|edit| {
			let start = lsp_position_to_offset(text, edit.range.start)
				.unwrap_or_else(|| panic!("start out of bounds: {:?}", edit.range));
			let end = lsp_position_to_offset(text, edit.range.end)
				.unwrap_or_else(|| panic!("end out of bounds: {:?}", edit.range));
			(start, end, edit.new_text.as_str())
		})
		.collect();
	ranges.sort_by(|a, b| b.0.cmp(&a.0));

	let mut result = text.to_string();
	for (start, end, new_text) in ranges {
		result.replace_range(start..end, new_text);
	}
	result
}

fn lines_of(text: &str) -> Vec<String> {
	text.split('\n').map(ToString::to_string).collect()
}

fn strings(lines: &[&str]) -> Vec<String> {
	lines.iter().map(ToString::to_string).collect()
}

fn trimmed(text: &str) -> Vec<&str> {
	text.split('\n').map(str::trim_end).collect()
}

/// The text a client ends up with must equal the text of applying the script
/// line by line.
fn assert_edits_match(text: &str, edits: Vec<LineEdit>) {
	let lines = lines_of(text);
	let mut script = EditScript::new();
	for edit in edits {
		script.push(edit);
	}

	let converted: Vec<TextEdit> = script
		.edits()
		.iter()
		.map(|edit| to_text_edit(&lines, edit, "\n"))
		.collect();

	assert_eq!(
		apply_text_edits(text, &converted),
		script.apply(&lines).join("\n")
	);
}

// ---- Position conversion ----

#[rstest]
#[case::start_of_second_line("abc\ndef", 1, 0, Some(4))]
#[case::inside_line("abc\ndef", 1, 2, Some(6))]
#[case::end_of_line("abc\ndef", 0, 3, Some(3))]
#[case::past_end_of_line("abc\ndef", 0, 4, None)]
#[case::missing_line("abc\ndef", 5, 0, None)]
#[case::surrogate_pair("a\u{e9}\u{1F600}b", 0, 4, Some(7))]
fn position_to_offset(
	#[case] content: &str,
	#[case] line: u32,
	#[case] character: u32,
	#[case] expected: Option<usize>,
) {
	assert_eq!(
		lsp_position_to_offset(content, Position::new(line, character)),
		expected
	);
}

// ---- Edit conversion ----

#[test]
fn text_edit_insert_in_middle() {
	assert_edits_match(
		"one\ntwo\nthree\n",
		vec![LineEdit::insert(1, strings(&["a", "b"]))],
	);
}

#[test]
fn text_edit_append_after_last_line() {
	assert_edits_match(
		"one\n# virtualInclude \"x\"",
		vec![LineEdit::insert(2, strings(&["start", "body", "end"]))],
	);
}

#[test]
fn text_edit_replace_in_middle() {
	assert_edits_match(
		"one\nstart\nold\nend\nlast\n",
		vec![LineEdit::replace(1, 4, strings(&["start", "new", "more", "end"]))],
	);
}

#[test]
fn text_edit_replace_through_end_of_document() {
	assert_edits_match(
		"one\nstart\nold\nend",
		vec![LineEdit::replace(1, 4, strings(&["start", "new", "end"]))],
	);
}

#[test]
fn text_edit_removing_last_lines() {
	assert_edits_match("one\ntwo\nthree", vec![LineEdit::replace(1, 3, Vec::new())]);
}

#[test]
fn text_edits_in_one_batch_use_snapshot_coordinates() {
	assert_edits_match(
		"a\nb\nc\nd\ne\n",
		vec![
			LineEdit::insert(1, strings(&["x", "y", "z"])),
			LineEdit::replace(2, 3, strings(&["B"])),
			LineEdit::insert(4, strings(&["w"])),
		],
	);
}

#[test]
fn text_edit_keeps_crlf_line_endings() {
	let lines = lines_of("one\ntwo");
	let edit = to_text_edit(&lines, &LineEdit::insert(1, strings(&["a", "b"])), "\r\n");
	assert_eq!(edit.new_text, "a\r\nb\r\n");
}

// ---- Passes ----

#[test]
fn prepare_pass_inserts_region() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(tmp.path().join("snippet.txt"), "alpha\nbeta\n")?;
	let mut state = state_with(tmp.path(), &VincConfig::default());
	let text = "import os\n# virtualInclude \"snippet.txt\"\n";
	let path = open(&mut state, &tmp.path().join("main.py"), text, "python");

	let pass = state
		.prepare_pass(&path)?
		.unwrap_or_else(|| panic!("document should be open"));
	assert!(pass.diagnostics.is_empty());
	let (token, edit) = pass
		.update
		.unwrap_or_else(|| panic!("expected an update"));

	let updated = apply_text_edits(text, &text_edits(&edit));
	assert_eq!(
		trimmed(&updated),
		vec![
			"import os",
			"# virtualInclude \"snippet.txt\"",
			"# virtualIncludeStart - DO NOT EDIT CONTENT BELOW",
			"alpha",
			"beta",
			"# virtualIncludeEnd - DO NOT EDIT CONTENT ABOVE",
			"",
		]
	);

	assert!(!state.finish_update(token));
	Ok(())
}

#[test]
fn workspace_edit_is_versioned() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(tmp.path().join("snippet.txt"), "alpha\n")?;
	let mut state = state_with(tmp.path(), &VincConfig::default());
	let path = open(
		&mut state,
		&tmp.path().join("main.py"),
		"# virtualInclude \"snippet.txt\"\n",
		"python",
	);

	let pass = state
		.prepare_pass(&path)?
		.unwrap_or_else(|| panic!("document should be open"));
	let (_, edit) = pass
		.update
		.unwrap_or_else(|| panic!("expected an update"));

	match edit.document_changes {
		Some(DocumentChanges::Edits(documents)) => {
			assert_eq!(documents.len(), 1);
			assert_eq!(documents[0].text_document.version, Some(1));
			assert_eq!(documents[0].text_document.uri, file_uri(&path));
		}
		_ => panic!("expected document edits"),
	}

	Ok(())
}

#[test]
fn processing_token_defers_second_pass() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(tmp.path().join("snippet.txt"), "alpha\n")?;
	let mut state = state_with(tmp.path(), &VincConfig::default());
	let path = open(
		&mut state,
		&tmp.path().join("main.py"),
		"# virtualInclude \"snippet.txt\"\n",
		"python",
	);

	let first = state
		.prepare_pass(&path)?
		.and_then(|pass| pass.update)
		.unwrap_or_else(|| panic!("expected an update"));

	let second = state
		.prepare_pass(&path)?
		.unwrap_or_else(|| panic!("document should be open"));
	assert!(second.update.is_none());
	assert!(state.deferred.contains(&path));

	// Our own edit arriving as a change is not a user edit.
	let kind = state.apply_changes(
		&path,
		2,
		vec![TextDocumentContentChangeEvent {
			range: Some(Range::new(Position::new(1, 0), Position::new(1, 0))),
			range_length: None,
			text: "# virtualIncludeStart - DO NOT EDIT CONTENT BELOW\nalpha\n# virtualIncludeEnd - DO \
			       NOT EDIT CONTENT ABOVE\n"
				.to_string(),
		}],
	);
	assert_eq!(kind, ChangeKind::SelfInflicted);

	assert!(state.finish_update(first.0));
	assert!(!state.deferred.contains(&path));

	let workspace = state
		.workspace
		.as_ref()
		.unwrap_or_else(|| panic!("workspace should be loaded"));
	assert!(!workspace.is_updating(&path));

	Ok(())
}

#[test]
fn up_to_date_document_has_no_update() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(tmp.path().join("snippet.txt"), "alpha\n")?;
	let mut state = state_with(tmp.path(), &VincConfig::default());
	let text = "# virtualInclude \"snippet.txt\"\n# virtualIncludeStart - DO NOT EDIT CONTENT \
	            BELOW\nalpha\n# virtualIncludeEnd - DO NOT EDIT CONTENT ABOVE\n";
	let path = open(&mut state, &tmp.path().join("main.py"), text, "python");

	let pass = state
		.prepare_pass(&path)?
		.unwrap_or_else(|| panic!("document should be open"));
	assert!(pass.update.is_none());

	Ok(())
}

#[test]
fn prepare_pass_for_closed_document_is_none() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let mut state = state_with(tmp.path(), &VincConfig::default());
	assert!(state.prepare_pass(&tmp.path().join("main.py"))?.is_none());
	Ok(())
}

// ---- Change classification ----

const SYNCED: &str = "intro\n# virtualInclude \"snippet.txt\"\n# virtualIncludeStart - DO NOT EDIT \
                      CONTENT BELOW\nalpha\n# virtualIncludeEnd - DO NOT EDIT CONTENT \
                      ABOVE\noutro\n";

fn insert_at(line: u32, character: u32, text: &str) -> TextDocumentContentChangeEvent {
	TextDocumentContentChangeEvent {
		range: Some(Range::new(
			Position::new(line, character),
			Position::new(line, character),
		)),
		range_length: None,
		text: text.to_string(),
	}
}

#[rstest]
#[case::inside_region(3, 0, "x", "protected")]
#[case::on_start_marker(2, 0, "x", "protected")]
#[case::on_end_marker(4, 3, "x", "protected")]
#[case::after_region(5, 0, "x", "edited")]
#[case::before_region(0, 5, "!", "edited")]
#[case::on_directive_line(1, 0, " ", "directive")]
#[case::typing_new_directive(6, 0, "# virtualInclude \"other.txt\"", "directive")]
fn classify_user_change(
	#[case] line: u32,
	#[case] character: u32,
	#[case] text: &str,
	#[case] expected: &str,
) -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(tmp.path().join("snippet.txt"), "alpha\n")?;
	let mut state = state_with(tmp.path(), &VincConfig::default());
	let path = open(&mut state, &tmp.path().join("main.py"), SYNCED, "python");

	let kind = state.apply_changes(&path, 2, vec![insert_at(line, character, text)]);
	let label = match kind {
		ChangeKind::Protected(_) => "protected",
		ChangeKind::Directive(_) => "directive",
		ChangeKind::Edited => "edited",
		ChangeKind::SelfInflicted => "self",
		ChangeKind::Unknown => "unknown",
	};
	assert_eq!(label, expected);
	assert_eq!(state.generation(&path), Some(1));

	Ok(())
}

#[test]
fn apply_changes_updates_text_and_version() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let mut state = state_with(tmp.path(), &VincConfig::default());
	let path = open(&mut state, &tmp.path().join("notes.md"), "hello\nworld\n", "markdown");

	let kind = state.apply_changes(
		&path,
		7,
		vec![
			TextDocumentContentChangeEvent {
				range: Some(Range::new(Position::new(1, 0), Position::new(1, 5))),
				range_length: None,
				text: "there".to_string(),
			},
			insert_at(0, 5, ","),
		],
	);
	assert_eq!(kind, ChangeKind::Edited);

	let doc = &state.documents[&path];
	assert_eq!(doc.text, "hello,\nthere\n");
	assert_eq!(doc.version, 7);

	Ok(())
}

#[test]
fn apply_changes_for_unknown_document() {
	let mut state = ServerState::default();
	let kind = state.apply_changes(Path::new("/tmp/none.md"), 1, vec![insert_at(0, 0, "x")]);
	assert_eq!(kind, ChangeKind::Unknown);
}

// ---- Diagnostics ----

#[test]
fn diagnostics_for_unresolved_directives() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let mut state = state_with(tmp.path(), &VincConfig::default());
	let text = "# virtualInclude \"gone.txt\"\n# virtualInclude \"main.py\"\n";
	let path = open(&mut state, &tmp.path().join("main.py"), text, "python");

	let pass = state
		.prepare_pass(&path)?
		.unwrap_or_else(|| panic!("document should be open"));
	assert!(pass.update.is_none());
	assert_eq!(pass.diagnostics.len(), 2);

	let missing = &pass.diagnostics[0];
	assert_eq!(missing.severity, Some(DiagnosticSeverity::WARNING));
	assert_eq!(missing.source.as_deref(), Some("vinc"));
	assert_eq!(missing.range.start, Position::new(0, 0));
	assert_eq!(missing.range.end, Position::new(0, 27));
	assert!(missing.message.contains("not found"));

	let self_include = &pass.diagnostics[1];
	assert_eq!(self_include.severity, Some(DiagnosticSeverity::ERROR));
	assert_eq!(
		self_include.code,
		Some(NumberOrString::String("vinc::self_include".to_string()))
	);
	assert_eq!(self_include.range.start.line, 1);

	Ok(())
}

// ---- Source mapping ----

#[test]
fn dependents_are_open_documents_including_the_source() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(tmp.path().join("snippet.txt"), "alpha\n")?;
	let mut state = state_with(tmp.path(), &VincConfig::default());
	let text = "# virtualInclude \"snippet.txt\"\n";
	let path = open(&mut state, &tmp.path().join("main.py"), text, "python");
	let source = normalize_path(&tmp.path().join("snippet.txt"));

	let pass = state
		.prepare_pass(&path)?
		.unwrap_or_else(|| panic!("document should be open"));
	if let Some((token, _)) = pass.update {
		state.finish_update(token);
	}
	assert_eq!(state.open_dependents(&source), vec![path.clone()]);

	state.close(&path);
	assert!(state.open_dependents(&source).is_empty());
	assert!(state.documents.is_empty());

	Ok(())
}

#[test]
fn missing_sources_are_still_mapped() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let mut state = state_with(tmp.path(), &VincConfig::default());
	let text = "# virtualInclude \"later.txt\"\n";
	let path = open(&mut state, &tmp.path().join("main.py"), text, "python");

	let _ = state.prepare_pass(&path)?;
	let source = normalize_path(&tmp.path().join("later.txt"));
	assert_eq!(state.open_dependents(&source), vec![path]);

	Ok(())
}

// ---- Configuration ----

#[test]
fn config_paths_are_recognized() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let state = state_with(tmp.path(), &VincConfig::default());
	let root = normalize_path(tmp.path());

	assert!(state.is_config_path(&root.join("vinc.toml")));
	assert!(state.is_config_path(&root.join(".config/vinc.toml")));
	assert!(!state.is_config_path(&root.join("other.toml")));

	Ok(())
}

#[test]
fn invalid_config_falls_back_to_defaults() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(
		tmp.path().join("vinc.toml"),
		"[languages.python]\npattern = \"(unclosed\"\n",
	)?;
	let mut state = ServerState {
		root: Some(normalize_path(tmp.path())),
		..ServerState::default()
	};

	let failure = state.load_workspace();
	assert!(failure.is_some_and(|message| message.contains("invalid pattern")));
	assert!(state.workspace.is_some());

	Ok(())
}

#[test]
fn language_falls_back_to_extension() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let mut state = state_with(tmp.path(), &VincConfig::default());
	let path = open(&mut state, &tmp.path().join("notes.md"), "", "");
	assert_eq!(state.documents[&path].language, "markdown");
	Ok(())
}
