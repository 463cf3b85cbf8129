//! String interning for identifiers and mangled symbol names.
//!
//! Interning avoids cloning the same identifier text repeatedly as it flows
//! from the lexer through the AST into the emitter, and lets two `StringId`s
//! be compared with a single integer equality check instead of a string
//! comparison.

use ahash::AHashMap;

/// Index into the interner's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Builds an id out of thin air for tests that only care about a node's
    /// shape, not the text behind it.
    #[cfg(test)]
    #[must_use]
    pub fn from_raw_for_test(raw: u32) -> Self {
        Self(raw)
    }
}

/// Owns the unique strings seen during lexing and gives out `StringId`s.
#[derive(Debug, Default)]
pub struct Interner {
    strings: Vec<String>,
    lookup: AHashMap<String, StringId>,
}

impl Interner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `text`, returning the existing id if it was already seen.
    pub fn intern(&mut self, text: &str) -> StringId {
        if let Some(&id) = self.lookup.get(text) {
            return id;
        }
        let id = StringId(self.strings.len().try_into().expect("too many interned strings"));
        self.strings.push(text.to_owned());
        self.lookup.insert(text.to_owned(), id);
        id
    }

    /// Looks up the text for a previously interned id.
    ///
    /// # Panics
    /// Panics if `id` was not produced by this interner.
    #[must_use]
    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_returns_same_id() {
        let mut interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("foo");
        assert_eq!(a, b);
        assert_eq!(interner.get(a), "foo");
    }

    #[test]
    fn distinct_text_returns_distinct_ids() {
        let mut interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("bar");
        assert_ne!(a, b);
    }
}
