use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;

#[derive(Parser)]
#[command(
	author,
	version,
	about = "Keep regions of your files in sync with the files they include.",
	long_about = "vinc (virtual include) mirrors the content of one file inside another.\n\nWrite a \
	              directive in the comment syntax of the including file:\n\n  # virtualInclude \
	              \"shared/header.txt\"\n\nand vinc expands it into a marked region that always \
	              holds the current content of the included file.\n\nQuick start:\n  vinc init    \
	              Create a vinc.toml config\n  vinc update  Synchronize every region\n  vinc check   \
	              Verify every region is up to date\n  vinc list    Show every directive"
)]
pub struct VincCli {
	#[command(subcommand)]
	pub command: Option<Commands>,

	/// Path to the project root directory.
	#[arg(long, short, global = true)]
	pub path: Option<PathBuf>,

	/// Enable verbose output.
	#[arg(long, short, global = true, default_value_t = false)]
	pub verbose: bool,

	/// Disable colored output.
	#[arg(long, global = true, default_value_t = false)]
	pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Initialize vinc in a project by creating a sample `vinc.toml`.
	///
	/// The config is commented out and documents every option. If a config
	/// file already exists, this command is a no-op and exits successfully.
	Init,
	/// Synchronize every included region with its source file.
	///
	/// Scans the project for `virtualInclude` directives, inserts missing
	/// regions, replaces stale ones and repairs regions whose end marker was
	/// lost. Missing files and self includes are reported as warnings.
	///
	/// Use `--dry-run` to preview which files would change, or `--watch` to
	/// re-synchronize whenever an included file changes.
	Update {
		/// Preview changes without writing files.
		#[arg(long, default_value_t = false)]
		dry_run: bool,

		/// Watch for file changes and re-synchronize the documents that
		/// include the changed files.
		#[arg(long, default_value_t = false)]
		watch: bool,

		/// Only process these documents instead of scanning the project.
		files: Vec<PathBuf>,
	},
	/// Check that every included region is up to date.
	///
	/// Nothing is written. Exits with a non-zero status code when a region is
	/// stale or a directive points at a missing file or at its own document.
	Check {
		/// Show a unified diff for each file that would change.
		#[arg(long, default_value_t = false)]
		diff: bool,

		/// Output format for check results. Use `text` for human-readable
		/// output, `json` for programmatic consumption, or `github` for
		/// GitHub Actions annotations that appear inline on PRs.
		#[arg(long, value_enum, default_value_t = OutputFormat::Text)]
		format: OutputFormat,
	},
	/// List every directive in the project and the state of its region.
	List,
	/// Start the vinc language server (LSP).
	///
	/// Communicates over stdin/stdout using the Language Server Protocol.
	/// The server keeps regions of open documents in sync as you type,
	/// protects them from direct edits and reports missing files.
	Lsp,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
	/// Human-readable text output with colors and formatting.
	Text,
	/// JSON output for programmatic consumption.
	Json,
	/// GitHub Actions annotation format.
	Github,
}
