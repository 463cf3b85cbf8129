//! The runtime library's symbol contract (§6).
//!
//! The runtime library itself — `putchar`, `getchar`, `putstr`, etc. — is an
//! external collaborator this crate does not implement. What lives here is
//! just the agreed-upon mangled names and arities, so `extrn`-ing one of
//! these from B source resolves to a deterministic external declaration
//! instead of failing `UndefinedName` purely because no B source defines it
//! (see [`crate::scope::DeferredName`] and [`crate::emitter::EmitContext`]'s
//! handling of `extrn`).

use strum::{EnumIter, IntoStaticStr};

/// One of the runtime's required entries (§6 "Runtime library contract").
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
pub enum RuntimeExtern {
    #[strum(serialize = "main")]
    Main,
    #[strum(serialize = "putchar")]
    Putchar,
    #[strum(serialize = "getchar")]
    Getchar,
    #[strum(serialize = "putnumb")]
    Putnumb,
    #[strum(serialize = "putstr")]
    Putstr,
    #[strum(serialize = "char")]
    Char,
    #[strum(serialize = "lchar")]
    Lchar,
    #[strum(serialize = "exit")]
    Exit,
}

impl RuntimeExtern {
    /// The unmangled B-visible name, e.g. `"putchar"`.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Argument count the runtime declares this entry with (§6: "each
    /// runtime function is declared with word parameters and a word
    /// return").
    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            Self::Main => 0,
            Self::Putchar => 1,
            Self::Getchar => 0,
            Self::Putnumb => 1,
            Self::Putstr => 1,
            Self::Char => 2,
            Self::Lchar => 3,
            Self::Exit => 0,
        }
    }

    /// Looks up a runtime entry by its unmangled B-visible name.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        use strum::IntoEnumIterator;
        Self::iter().find(|entry| entry.name() == name)
    }
}

/// The pseudo-extern exposing the target's word width to B source (§8, E5).
/// Not a runtime function — `extrn`-ing it binds directly to a constant
/// word, never a call.
pub const BYTES_PER_WORD_EXTERN: &str = "__bytes_per_word";

/// The byte that terminates a B string in place of C's NUL (§3 "EOT
/// terminator").
pub const EOT: u8 = 0x04;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_known_runtime_externs_by_name() {
        assert_eq!(RuntimeExtern::lookup("putstr"), Some(RuntimeExtern::Putstr));
        assert_eq!(RuntimeExtern::lookup("putnumb").unwrap().arity(), 1);
        assert_eq!(RuntimeExtern::lookup("not_a_runtime_fn"), None);
    }

    #[test]
    fn mangled_names_are_stable() {
        assert_eq!(RuntimeExtern::Putchar.name(), "putchar");
        assert_eq!(RuntimeExtern::Lchar.arity(), 3);
    }
}
