//! The compiler's error taxonomy.
//!
//! Every fallible operation in this crate returns a [`CompileError`]. There is
//! no recovery and no partial emission: the first error aborts compilation of
//! the current translation unit, matching the propagation policy a
//! terse-diagnostics, no-preprocessor compiler is allowed to have.

use std::fmt;

/// A line/column position in the source text.
///
/// Lines and columns are both 1-based, matching what editors show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub const START: Self = Self { line: 1, column: 1 };

    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The taxonomy of errors this crate can raise, per the error handling design.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Input does not match the grammar.
    ParseError { position: Position, message: String },
    /// Unknown `*X` escape in a character or string literal.
    EscapeError { position: Position, escape: char },
    /// A character literal expanded to more bytes than fit in one word.
    LiteralTooWide { position: Position, bytes: usize, max: usize },
    /// The same name was defined twice in one scope.
    DuplicateDefinition { position: Position, name: String },
    /// A lazy lookup could not resolve a name at emit time.
    UndefinedName { position: Position, name: String },
    /// `&` or assignment was applied to an expression with no lvalue form.
    NotAnLValue { position: Position },
    /// `break` appeared with no enclosing loop or switch.
    BreakOutsideLoop { position: Position },
    /// `goto` named a label that does not exist in the enclosing function.
    GotoTargetUnknown { position: Position, label: String },
    /// A call site's argument count could not possibly match the callee.
    ArityMismatch { position: Position, expected: usize, found: usize },
    /// The emitter's own invariants were violated; this indicates a bug in
    /// this crate, not in the input program.
    InternalError { message: String },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseError { position, message } => write!(f, "{position}: parse error: {message}"),
            Self::EscapeError { position, escape } => {
                write!(f, "{position}: unknown escape '*{escape}'")
            }
            Self::LiteralTooWide { position, bytes, max } => {
                write!(f, "{position}: character literal has {bytes} bytes, max is {max}")
            }
            Self::DuplicateDefinition { position, name } => {
                write!(f, "{position}: '{name}' is already defined in this scope")
            }
            Self::UndefinedName { position, name } => {
                write!(f, "{position}: '{name}' is not defined")
            }
            Self::NotAnLValue { position } => write!(f, "{position}: expression is not an lvalue"),
            Self::BreakOutsideLoop { position } => {
                write!(f, "{position}: 'break' outside a loop or switch")
            }
            Self::GotoTargetUnknown { position, label } => {
                write!(f, "{position}: goto target '{label}' is not a label in this function")
            }
            Self::ArityMismatch { position, expected, found } => {
                write!(f, "{position}: call has {found} arguments, expected {expected}")
            }
            Self::InternalError { message } => write!(f, "internal compiler error: {message}"),
        }
    }
}

impl std::error::Error for CompileError {}

pub type CompileResult<T> = Result<T, CompileError>;
