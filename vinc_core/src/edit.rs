/// Replace the snapshot lines `start..end` with `replacement`. An edit with
/// `start == end` inserts before line `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEdit {
	pub start: usize,
	pub end: usize,
	pub replacement: Vec<String>,
}

impl LineEdit {
	pub fn insert(at: usize, lines: Vec<String>) -> Self {
		Self {
			start: at,
			end: at,
			replacement: lines,
		}
	}

	pub fn replace(start: usize, end: usize, lines: Vec<String>) -> Self {
		Self {
			start,
			end,
			replacement: lines,
		}
	}

	/// Change in line count caused by this edit.
	pub fn delta(&self) -> isize {
		self.replacement.len() as isize - (self.end - self.start) as isize
	}

	fn shifted(&self, offset: isize) -> Self {
		Self {
			start: shift(self.start, offset),
			end: shift(self.end, offset),
			replacement: self.replacement.clone(),
		}
	}
}

fn shift(line: usize, offset: isize) -> usize {
	line.saturating_add_signed(offset)
}

/// A batch of line edits against one immutable snapshot.
///
/// Edits are kept in snapshot coordinates, ascending and non-overlapping, so
/// the whole batch can be handed to an editor as a single change. Callers
/// that apply edits one at a time use [`EditScript::sequential`], which
/// carries the running offset of earlier edits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditScript {
	edits: Vec<LineEdit>,
}

impl EditScript {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append an edit. It must start at or after the end of the previous one.
	pub fn push(&mut self, edit: LineEdit) {
		debug_assert!(edit.start <= edit.end, "edit span is reversed");
		debug_assert!(
			self.edits.last().is_none_or(|last| last.end <= edit.start),
			"edits must be ascending and non-overlapping"
		);
		self.edits.push(edit);
	}

	pub fn edits(&self) -> &[LineEdit] {
		&self.edits
	}

	pub fn len(&self) -> usize {
		self.edits.len()
	}

	pub fn is_empty(&self) -> bool {
		self.edits.is_empty()
	}

	/// Total change in line count.
	pub fn delta(&self) -> isize {
		self.edits.iter().map(LineEdit::delta).sum()
	}

	/// The edits in the coordinates of the document as it is after every
	/// earlier edit has been applied.
	pub fn sequential(&self) -> Vec<LineEdit> {
		let mut offset = 0;
		self.edits
			.iter()
			.map(|edit| {
				let shifted = edit.shifted(offset);
				offset += edit.delta();
				shifted
			})
			.collect()
	}

	/// Where snapshot `line` ends up once the script is applied, or `None`
	/// when the line is replaced.
	pub fn remap(&self, line: usize) -> Option<usize> {
		let mut offset = 0;
		for edit in &self.edits {
			if edit.start <= line && line < edit.end {
				return None;
			}
			if edit.end <= line {
				offset += edit.delta();
			}
		}

		Some(shift(line, offset))
	}

	/// Build the edited document from the snapshot.
	pub fn apply(&self, lines: &[String]) -> Vec<String> {
		let capacity = lines.len().saturating_add_signed(self.delta());
		let mut output = Vec::with_capacity(capacity);
		let mut cursor = 0;

		for edit in &self.edits {
			let start = edit.start.min(lines.len());
			output.extend_from_slice(&lines[cursor.min(start)..start]);
			output.extend(edit.replacement.iter().cloned());
			cursor = edit.end.min(lines.len());
		}

		output.extend_from_slice(&lines[cursor.min(lines.len())..]);
		output
	}

	/// Apply the script to `lines` one edit at a time.
	pub fn apply_in_place(&self, lines: &mut Vec<String>) {
		for edit in self.sequential() {
			let end = edit.end.min(lines.len());
			let start = edit.start.min(end);
			lines.splice(start..end, edit.replacement);
		}
	}
}
