use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

/// Lexically normalize a path: drop `.` segments and fold `..` into the
/// preceding normal segment. The file system is never consulted, so symlinks
/// are not resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
	let mut components: Vec<Component<'_>> = Vec::new();

	for component in path.components() {
		match component {
			Component::CurDir => {}
			Component::ParentDir => {
				match components.last() {
					Some(Component::Normal(_)) => {
						components.pop();
					}
					Some(Component::RootDir | Component::Prefix(_)) => {}
					_ => components.push(component),
				}
			}
			other => components.push(other),
		}
	}

	components.iter().collect()
}

/// Resolve an include path against the directory of the including document.
/// Absolute include paths are kept as they are.
pub fn resolve_include(document: &Path, include: &str) -> PathBuf {
	let include = Path::new(include);
	if include.is_absolute() || has_drive_prefix(&include.to_string_lossy()) {
		return normalize_path(include);
	}

	let base = document.parent().unwrap_or_else(|| Path::new(""));
	normalize_path(&base.join(include))
}

/// A platform independent key for comparing paths: separators unified to
/// `/`, `.` and `..` folded, and lowercased when the path is case
/// insensitive.
pub fn comparison_key(path: &Path) -> String {
	let unified = path.to_string_lossy().replace('\\', "/");
	let absolute = unified.starts_with('/');
	let mut parts: Vec<&str> = Vec::new();

	for part in unified.split('/') {
		match part {
			"" | "." => {}
			".." => {
				match parts.last() {
					Some(last) if *last != ".." && !has_drive_prefix(last) => {
						parts.pop();
					}
					Some(last) if has_drive_prefix(last) => {}
					_ if absolute => {}
					_ => parts.push(".."),
				}
			}
			_ => parts.push(part),
		}
	}

	let joined = parts.join("/");
	let key = if absolute { format!("/{joined}") } else { joined };

	if is_case_insensitive(&key) {
		key.to_lowercase()
	} else {
		key
	}
}

/// Whether a directive resolving to `include` points back at `document`.
pub fn is_self_include(document: &Path, include: &Path) -> bool {
	comparison_key(document) == comparison_key(include)
}

fn is_case_insensitive(path: &str) -> bool {
	cfg!(windows) || has_drive_prefix(path)
}

/// `C:` style drive prefixes mark a windows path even on other platforms.
fn has_drive_prefix(path: &str) -> bool {
	let bytes = path.as_bytes();
	bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
