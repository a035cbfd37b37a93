use core::{
	fmt::{self, Debug, Display, Formatter},
	hash::{BuildHasher, Hash, Hasher},
	sync::atomic::{AtomicU64, Ordering},
};
use hashbrown::hash_map::DefaultHashBuilder;

static NEXT_NONCE: AtomicU64 = AtomicU64::new(1);

/// An opaque executable snippet carried through the wire format by raw
/// substitution instead of value encoding.
///
/// The encoder emits a quoted placeholder token in place of the snippet and
/// replaces the whole quoted token with the literal source text after JSON
/// encoding, so the snippet reaches the receiver unquoted. The token is keyed
/// on a content hash mixed with a process-unique nonce, so it cannot collide
/// with legitimate payload content.
#[derive(Clone)]
pub struct ExprSnippet {
	source: String,
	token: u64,
}

impl ExprSnippet {
	#[must_use]
	pub fn new(source: impl Into<String>) -> Self {
		let source = source.into();
		let mut hasher = DefaultHashBuilder::default().build_hasher();
		source.hash(&mut hasher);
		let nonce = NEXT_NONCE.fetch_add(1, Ordering::Relaxed);
		Self {
			token: hasher.finish() ^ nonce.rotate_left(32),
			source,
		}
	}

	/// Joins multiple statements into one snippet.
	#[must_use]
	pub fn from_lines<I, S>(lines: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let joined = lines.into_iter().map(|line| line.as_ref().to_owned()).collect::<Vec<_>>().join(";\n");
		Self::new(joined)
	}

	#[must_use]
	pub fn source(&self) -> &str {
		&self.source
	}

	/// The bare token this snippet encodes as inside the JSON document.
	pub(crate) fn placeholder(&self) -> String {
		format!("@expr[{:016x}]@", self.token)
	}

	/// The token as it appears in encoded output, quotes included.
	pub(crate) fn quoted_placeholder(&self) -> String {
		format!("\"{}\"", self.placeholder())
	}
}

impl Debug for ExprSnippet {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ExprSnippet").field("token", &format_args!("{:016x}", self.token)).field("source", &self.source).finish()
	}
}

impl Display for ExprSnippet {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(&self.source)
	}
}

#[cfg(test)]
mod tests {
	use super::ExprSnippet;

	#[test]
	fn tokens_differ_for_identical_source() {
		let a = ExprSnippet::new("function(){ return 1; }");
		let b = ExprSnippet::new("function(){ return 1; }");
		assert_ne!(a.placeholder(), b.placeholder());
	}

	#[test]
	fn lines_join_with_statement_breaks() {
		let snippet = ExprSnippet::from_lines(&["a()", "b()"]);
		assert_eq!(snippet.source(), "a();\nb()");
	}
}
