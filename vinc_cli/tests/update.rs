mod common;

use std::path::Path;

use similar_asserts::assert_eq;
use vinc_core::AnyEmptyResult;

fn write(root: &Path, name: &str, content: &str) -> AnyEmptyResult {
	let path = root.join(name);
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	std::fs::write(path, content)?;
	Ok(())
}

fn trimmed_lines(content: &str) -> Vec<&str> {
	content.lines().map(str::trim_end).collect()
}

#[test]
fn update_inserts_missing_region() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	write(tmp.path(), "snippet.inc", "alpha\nbeta\n")?;
	write(
		tmp.path(),
		"main.py",
		"import os\n# virtualInclude \"snippet.inc\"\nprint(os)\n",
	)?;

	common::vinc_cmd()
		.arg("update")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout(predicates::str::contains("Updated 1 region(s) in 1 file(s)."));

	let content = std::fs::read_to_string(tmp.path().join("main.py"))?;
	assert_eq!(
		trimmed_lines(&content),
		vec![
			"import os",
			"# virtualInclude \"snippet.inc\"",
			"# virtualIncludeStart - DO NOT EDIT CONTENT BELOW",
			"alpha",
			"beta",
			"# virtualIncludeEnd - DO NOT EDIT CONTENT ABOVE",
			"print(os)",
		]
	);
	assert!(content.ends_with('\n'));

	Ok(())
}

#[test]
fn update_is_idempotent() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	write(tmp.path(), "snippet.inc", "alpha\n")?;
	write(tmp.path(), "main.py", "# virtualInclude \"snippet.inc\"\n")?;

	common::vinc_cmd()
		.arg("update")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success();
	let first = std::fs::read_to_string(tmp.path().join("main.py"))?;

	common::vinc_cmd()
		.arg("update")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout(predicates::str::contains("already up to date"));
	let second = std::fs::read_to_string(tmp.path().join("main.py"))?;

	assert_eq!(first, second);

	Ok(())
}

#[test]
fn update_replaces_stale_region() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	write(tmp.path(), "snippet.inc", "new content\n")?;
	write(
		tmp.path(),
		"readme.md",
		"# Readme\n\n<!-- virtualInclude \"snippet.inc\" -->\n<!-- virtualIncludeStart - DO NOT \
		 EDIT CONTENT BELOW -->\nold content\n<!-- virtualIncludeEnd - DO NOT EDIT CONTENT ABOVE \
		 -->\n\nFooter\n",
	)?;

	common::vinc_cmd()
		.arg("update")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout(predicates::str::contains("Updated 1 region(s)"));

	let content = std::fs::read_to_string(tmp.path().join("readme.md"))?;
	assert!(content.contains("new content"));
	assert!(!content.contains("old content"));
	assert!(content.contains("Footer"));

	Ok(())
}

#[test]
fn update_dry_run_does_not_write() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	write(tmp.path(), "snippet.inc", "alpha\n")?;
	let original = "# virtualInclude \"snippet.inc\"\n";
	write(tmp.path(), "main.py", original)?;

	common::vinc_cmd()
		.arg("update")
		.arg("--dry-run")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout(predicates::str::contains(
			"Dry run: would update 1 region(s) in 1 file(s):",
		))
		.stdout(predicates::str::contains("main.py"));

	let content = std::fs::read_to_string(tmp.path().join("main.py"))?;
	assert_eq!(content, original);

	Ok(())
}

#[test]
fn update_reports_missing_file_and_continues() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	write(tmp.path(), "snippet.inc", "alpha\n")?;
	write(
		tmp.path(),
		"main.py",
		"# virtualInclude \"gone.inc\"\n# virtualInclude \"snippet.inc\"\n",
	)?;

	common::vinc_cmd()
		.arg("update")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stderr(predicates::str::contains("included file not found"))
		.stderr(predicates::str::contains("1 directive(s) could not be resolved"));

	let content = std::fs::read_to_string(tmp.path().join("main.py"))?;
	assert!(content.contains("alpha"));

	Ok(())
}

#[test]
fn update_rejects_self_include() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	let original = "# virtualInclude \"./main.py\"\n";
	write(tmp.path(), "main.py", original)?;

	common::vinc_cmd()
		.arg("update")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stderr(predicates::str::contains("includes itself"));

	let content = std::fs::read_to_string(tmp.path().join("main.py"))?;
	assert_eq!(content, original);

	Ok(())
}

#[test]
fn update_neutralizes_nested_directives() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	write(
		tmp.path(),
		"snippet.inc",
		"first\n# virtualInclude \"other.inc\"\n",
	)?;
	write(tmp.path(), "main.py", "# virtualInclude \"snippet.inc\"\n")?;

	common::vinc_cmd()
		.arg("update")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success();

	let content = std::fs::read_to_string(tmp.path().join("main.py"))?;
	assert!(content.contains(
		"# virtualInclude-nested (edit the source file instead) \"other.inc\""
	));

	// The neutralized line is not a directive, so a second run is a no-op.
	common::vinc_cmd()
		.arg("update")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout(predicates::str::contains("already up to date"));

	Ok(())
}

#[test]
fn update_only_processes_given_files() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	write(tmp.path(), "snippet.inc", "alpha\n")?;
	write(tmp.path(), "one.py", "# virtualInclude \"snippet.inc\"\n")?;
	let untouched = "# virtualInclude \"snippet.inc\"\n";
	write(tmp.path(), "two.py", untouched)?;

	common::vinc_cmd()
		.arg("update")
		.arg("--path")
		.arg(tmp.path())
		.arg("one.py")
		.assert()
		.success();

	assert!(std::fs::read_to_string(tmp.path().join("one.py"))?.contains("alpha"));
	assert_eq!(std::fs::read_to_string(tmp.path().join("two.py"))?, untouched);

	Ok(())
}

#[test]
fn update_resolves_paths_from_document_directory() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	write(tmp.path(), "shared/snippet.inc", "from shared\n")?;
	write(
		tmp.path(),
		"src/lib.rs",
		"// virtualInclude \"../shared/snippet.inc\"\n",
	)?;

	common::vinc_cmd()
		.arg("update")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success();

	let content = std::fs::read_to_string(tmp.path().join("src/lib.rs"))?;
	assert!(content.contains("// virtualIncludeStart - DO NOT EDIT CONTENT BELOW"));
	assert!(content.contains("from shared"));

	Ok(())
}

#[test]
fn update_uses_configured_comment_for_unknown_files() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	write(
		tmp.path(),
		"vinc.toml",
		"default_comment = { start = \";\" }\n\n[include]\npatterns = [\"*.cfgx\"]\n",
	)?;
	write(tmp.path(), "snippet.inc", "key = value\n")?;
	write(tmp.path(), "app.cfgx", "; virtualInclude \"snippet.inc\"\n")?;

	common::vinc_cmd()
		.arg("update")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success();

	let content = std::fs::read_to_string(tmp.path().join("app.cfgx"))?;
	assert!(content.contains("; virtualIncludeStart - DO NOT EDIT CONTENT BELOW"));
	assert!(content.contains("key = value"));

	Ok(())
}

#[test]
fn update_fails_on_invalid_config_pattern() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	write(
		tmp.path(),
		"vinc.toml",
		"[languages.python]\npattern = \"(unclosed\"\n",
	)?;

	common::vinc_cmd()
		.arg("update")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.code(2)
		.stderr(predicates::str::contains("invalid pattern"));

	Ok(())
}

#[test]
fn update_watch_flag_is_accepted_by_cli_parser() {
	use clap::Parser;
	use vinc_cli::Commands;
	use vinc_cli::VincCli;

	let cli = VincCli::parse_from(["vinc", "update", "--watch", "a.md", "b.md"]);
	match cli.command {
		Some(Commands::Update {
			watch,
			dry_run,
			files,
		}) => {
			assert!(watch);
			assert!(!dry_run);
			assert_eq!(files.len(), 2);
		}
		_ => panic!("expected Update command"),
	}
}

#[test]
fn update_settles_documents_that_include_documents() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	write(tmp.path(), "d.txt", "DEEP\n")?;
	write(tmp.path(), "b.txt", "# virtualInclude \"d.txt\"\n")?;
	write(tmp.path(), "a.txt", "# virtualInclude \"b.txt\"\n")?;

	common::vinc_cmd()
		.arg("update")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout(predicates::str::contains("in 2 file(s)."));

	common::vinc_cmd()
		.arg("check")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success();

	let content = std::fs::read_to_string(tmp.path().join("a.txt"))?;
	assert_eq!(
		trimmed_lines(&content),
		vec![
			"# virtualInclude \"b.txt\"",
			"# virtualIncludeStart - DO NOT EDIT CONTENT BELOW",
			"# virtualInclude-nested (edit the source file instead) \"d.txt\"",
			"# virtualIncludeStart - DO NOT EDIT CONTENT BELOW",
			"DEEP",
			"# virtualIncludeEnd - DO NOT EDIT CONTENT ABOVE",
			"# virtualIncludeEnd - DO NOT EDIT CONTENT ABOVE",
		]
	);

	common::vinc_cmd()
		.arg("update")
		.arg("--path")
		.arg(tmp.path())
		.assert()
		.success()
		.stdout(predicates::str::contains("All included regions are already up to date."));

	Ok(())
}
