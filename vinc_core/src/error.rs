use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum VincError {
	#[error(transparent)]
	#[diagnostic(code(vinc::io_error))]
	Io(#[from] std::io::Error),

	#[error("failed to parse config file: {0}")]
	#[diagnostic(
		code(vinc::config_parse),
		help("check that vinc.toml is valid TOML with optional [languages] and [[sections]] tables")
	)]
	ConfigParse(String),

	#[error("invalid pattern `{pattern}` in {origin}: {reason}")]
	#[diagnostic(
		code(vinc::invalid_pattern),
		help("patterns use rust `regex` syntax; escape literal metacharacters with a backslash")
	)]
	InvalidPattern {
		origin: String,
		pattern: String,
		reason: String,
	},

	#[error("included file not found: `{path}`")]
	#[diagnostic(
		code(vinc::missing_include),
		help("paths are resolved relative to the directory of the including file")
	)]
	MissingInclude { path: String },

	#[error("`{path}` includes itself")]
	#[diagnostic(
		code(vinc::self_include),
		help("remove the directive or point it at a different file")
	)]
	SelfInclude { path: String },

	#[error("failed to read included file `{path}`: {reason}")]
	#[diagnostic(code(vinc::read_failed))]
	ReadFailed { path: String, reason: String },

	#[error("file too large: `{path}` is {size} bytes (limit: {limit} bytes)")]
	#[diagnostic(
		code(vinc::file_too_large),
		help("increase `max_file_size` in vinc.toml or exclude this file")
	)]
	FileTooLarge { path: String, size: u64, limit: u64 },

	#[error("document `{path}` is no longer available")]
	#[diagnostic(
		code(vinc::document_unavailable),
		help("the document was closed or changed while its regions were being synchronized")
	)]
	DocumentUnavailable { path: String },

	#[error("{count} region(s) in {file} are out of date")]
	#[diagnostic(
		code(vinc::stale_region),
		help("run `vinc update` to synchronize included regions")
	)]
	StaleRegions { file: String, count: usize },
}

pub type VincResult<T> = Result<T, VincError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
