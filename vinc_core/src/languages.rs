use std::path::Path;

/// Language identifiers keyed by lowercase file extension. The identifiers
/// follow the names editors use for their language modes so that a language
/// id received from an editor and one detected from a path resolve to the
/// same comment style.
const EXTENSION_LANGUAGES: &[(&str, &str)] = &[
	("bash", "shellscript"),
	("bat", "bat"),
	("c", "c"),
	("cc", "cpp"),
	("cjs", "javascript"),
	("clj", "clojure"),
	("cmd", "bat"),
	("cpp", "cpp"),
	("cs", "csharp"),
	("css", "css"),
	("dart", "dart"),
	("erl", "erlang"),
	("ex", "elixir"),
	("exs", "elixir"),
	("go", "go"),
	("h", "c"),
	("hpp", "cpp"),
	("hs", "haskell"),
	("htm", "html"),
	("html", "html"),
	("ini", "ini"),
	("java", "java"),
	("js", "javascript"),
	("jsonc", "jsonc"),
	("jsx", "javascriptreact"),
	("kt", "kotlin"),
	("less", "less"),
	("lisp", "lisp"),
	("lua", "lua"),
	("markdown", "markdown"),
	("md", "markdown"),
	("mdx", "markdown"),
	("mjs", "javascript"),
	("php", "php"),
	("pl", "perl"),
	("properties", "properties"),
	("ps1", "powershell"),
	("py", "python"),
	("r", "r"),
	("rb", "ruby"),
	("rs", "rust"),
	("scala", "scala"),
	("scm", "scheme"),
	("scss", "scss"),
	("sh", "shellscript"),
	("sql", "sql"),
	("svelte", "svelte"),
	("swift", "swift"),
	("tex", "latex"),
	("toml", "toml"),
	("ts", "typescript"),
	("tsx", "typescriptreact"),
	("txt", "plaintext"),
	("vb", "vb"),
	("vue", "vue"),
	("xml", "xml"),
	("yaml", "yaml"),
	("yml", "yaml"),
	("zsh", "shellscript"),
];

/// Language identifiers for well-known extensionless file names.
const FILE_NAME_LANGUAGES: &[(&str, &str)] = &[
	("Dockerfile", "dockerfile"),
	("Makefile", "makefile"),
	("Gemfile", "ruby"),
	("Rakefile", "ruby"),
];

/// Default comment tokens per language id: `(language, start, end)`. An empty
/// end token means the language only has a line comment.
const LANGUAGE_COMMENTS: &[(&str, &str, &str)] = &[
	("bat", "REM", ""),
	("c", "//", ""),
	("clojure", ";", ""),
	("cpp", "//", ""),
	("csharp", "//", ""),
	("css", "/*", "*/"),
	("dart", "//", ""),
	("dockerfile", "#", ""),
	("elixir", "#", ""),
	("erlang", "%", ""),
	("go", "//", ""),
	("haskell", "--", ""),
	("html", "<!--", "-->"),
	("ini", ";", ""),
	("java", "//", ""),
	("javascript", "//", ""),
	("javascriptreact", "//", ""),
	("jsonc", "//", ""),
	("kotlin", "//", ""),
	("latex", "%", ""),
	("less", "//", ""),
	("lisp", ";", ""),
	("lua", "--", ""),
	("makefile", "#", ""),
	("markdown", "<!--", "-->"),
	("perl", "#", ""),
	("php", "//", ""),
	("plaintext", "#", ""),
	("powershell", "#", ""),
	("properties", "#", ""),
	("python", "#", ""),
	("r", "#", ""),
	("ruby", "#", ""),
	("rust", "//", ""),
	("scala", "//", ""),
	("scheme", ";", ""),
	("scss", "//", ""),
	("shellscript", "#", ""),
	("sql", "--", ""),
	("svelte", "<!--", "-->"),
	("swift", "//", ""),
	("toml", "#", ""),
	("typescript", "//", ""),
	("typescriptreact", "//", ""),
	("vb", "'", ""),
	("vue", "<!--", "-->"),
	("xml", "<!--", "-->"),
	("yaml", "#", ""),
];

/// Detect the language id of a file from its name or extension.
pub fn language_for_path(path: &Path) -> Option<&'static str> {
	if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
		if let Some((_, language)) = FILE_NAME_LANGUAGES.iter().find(|(file, _)| *file == name) {
			return Some(*language);
		}
	}

	let ext = path.extension()?.to_str()?.to_ascii_lowercase();
	EXTENSION_LANGUAGES
		.iter()
		.find(|(candidate, _)| *candidate == ext)
		.map(|(_, language)| *language)
}

/// The built-in `(start, end)` comment tokens for a language id.
pub fn default_comment_tokens(language: &str) -> Option<(&'static str, &'static str)> {
	LANGUAGE_COMMENTS
		.iter()
		.find(|(candidate, ..)| *candidate == language)
		.map(|(_, start, end)| (*start, *end))
}

/// Every language id with a built-in comment style.
pub fn known_languages() -> impl Iterator<Item = &'static str> {
	LANGUAGE_COMMENTS.iter().map(|(language, ..)| *language)
}
