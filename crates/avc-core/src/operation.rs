//! Fine-grained per-operation decisions.
//!
//! Beyond the 32 coarse permission bits of an object class, a single
//! permission (typically an ioctl-style command dispatch) can be refined
//! per command. A command is `(type, number)`, 256 values of each; the
//! policy answers with one 256-bit bitmap per command type, computed
//! lazily type by type.
//!
//! An [`OperationNode`] hangs off a cache entry and owns the decisions
//! computed so far for that entry. It is exclusively owned by its parent
//! entry and is deep-copied whenever the entry is cloned for replacement,
//! so no bitmap is ever shared between two live entries.

use bitflags::bitflags;

/// Number of 32-bit words in a per-type permission bitmap (256 bits).
const PERM_WORDS: usize = 8;

/// A command identifier, packed as `type:8, number:8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationCommand(u16);

impl OperationCommand {
    /// Builds a command from its type and number.
    #[must_use]
    pub const fn new(ty: u8, number: u8) -> Self {
        Self(((ty as u16) << 8) | number as u16)
    }

    /// Wraps an already-packed raw command.
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the packed raw value.
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// The operation type (high byte).
    #[must_use]
    pub const fn ty(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// The operation number within the type (low byte).
    #[must_use]
    pub const fn number(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    /// Index of the 32-bit word holding this command's bit.
    pub(crate) const fn word_index(self) -> usize {
        (self.number() >> 5) as usize
    }
}

bitflags! {
    /// Which bitmaps of an [`OperationDecision`] are meaningful.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Specified: u8 {
        /// The `allowed` bitmap is populated.
        const ALLOWED = 1;
        /// The `auditallow` bitmap is populated.
        const AUDITALLOW = 1 << 1;
        /// The `dontaudit` bitmap is populated.
        const DONTAUDIT = 1 << 2;
    }
}

/// A 256-bit set, one bit per operation number (or per operation type
/// when used as a type mask).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationPermSet {
    words: [u32; PERM_WORDS],
}

impl OperationPermSet {
    /// The empty set.
    pub const EMPTY: Self = Self {
        words: [0; PERM_WORDS],
    };

    /// The full set (all 256 bits).
    pub const ALL: Self = Self {
        words: [u32::MAX; PERM_WORDS],
    };

    /// Sets the bit for `n`.
    pub fn set(&mut self, n: u8) {
        self.words[(n >> 5) as usize] |= 1 << (n & 0x1f);
    }

    /// Returns true if the bit for `n` is set.
    #[must_use]
    pub const fn contains(&self, n: u8) -> bool {
        self.words[(n >> 5) as usize] & (1 << (n & 0x1f)) != 0
    }

    /// Returns true if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Returns the 32-bit word at `index`.
    #[must_use]
    pub const fn word(&self, index: usize) -> u32 {
        self.words[index]
    }

    /// Overwrites the 32-bit word at `index`.
    pub fn set_word(&mut self, index: usize, word: u32) {
        self.words[index] = word;
    }
}

/// Fine-grained decisions for one operation type.
///
/// Only the bitmaps named by `specified` carry meaning; the others are
/// absent. A decision is immutable once attached to a cache entry except
/// through the entry's clone-modify-replace update path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperationDecision {
    /// The operation type this decision covers.
    pub ty: u8,
    /// Which of the three bitmaps below are meaningful.
    pub specified: Specified,
    /// Commands the policy allows.
    pub allowed: Option<OperationPermSet>,
    /// Commands audited when granted.
    pub auditallow: Option<OperationPermSet>,
    /// Commands whose denials are not audited.
    pub dontaudit: Option<OperationPermSet>,
}

impl OperationDecision {
    /// Creates a decision for `ty` with empty bitmaps allocated for each
    /// map named in `specified`.
    #[must_use]
    pub fn new(ty: u8, specified: Specified) -> Self {
        let map = |flag| specified.contains(flag).then_some(OperationPermSet::EMPTY);
        Self {
            ty,
            specified,
            allowed: map(Specified::ALLOWED),
            auditallow: map(Specified::AUDITALLOW),
            dontaudit: map(Specified::DONTAUDIT),
        }
    }

    /// Tests the bit for `number` in the bitmap selected by `kind`.
    ///
    /// Returns false when `kind` is not specified for this decision.
    #[must_use]
    pub fn has_perm(&self, kind: Specified, number: u8) -> bool {
        if !self.specified.contains(kind) {
            return false;
        }
        let map = if kind == Specified::ALLOWED {
            &self.allowed
        } else if kind == Specified::AUDITALLOW {
            &self.auditallow
        } else if kind == Specified::DONTAUDIT {
            &self.dontaudit
        } else {
            return false;
        };
        map.is_some_and(|m| m.contains(number))
    }
}

/// Stack-local projection of the single 32-command window of an
/// [`OperationDecision`] that contains one command.
///
/// Copying one word per bitmap is enough to answer allow and audit
/// queries for that command without holding a reference into the cache.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OperationWindow {
    specified: Specified,
    allowed: u32,
    auditallow: u32,
    dontaudit: u32,
}

impl OperationWindow {
    /// Copies the window containing `cmd` out of `od`.
    pub(crate) fn from_decision(od: &OperationDecision, cmd: OperationCommand) -> Self {
        let i = cmd.word_index();
        let word = |m: &Option<OperationPermSet>| m.as_ref().map_or(0, |m| m.word(i));
        Self {
            specified: od.specified,
            allowed: word(&od.allowed),
            auditallow: word(&od.auditallow),
            dontaudit: word(&od.dontaudit),
        }
    }

    /// Tests the bit for `number` in the window selected by `kind`.
    ///
    /// `number` must fall inside the window this value was copied from.
    pub(crate) fn permits(&self, kind: Specified, number: u8) -> bool {
        if !self.specified.contains(kind) {
            return false;
        }
        let word = if kind == Specified::ALLOWED {
            self.allowed
        } else if kind == Specified::AUDITALLOW {
            self.auditallow
        } else if kind == Specified::DONTAUDIT {
            self.dontaudit
        } else {
            return false;
        };
        word & (1 << (number & 0x1f)) != 0
    }
}

/// The per-entry store of fine-grained decisions.
///
/// `type_mask` holds the types for which decisions have been (or may be)
/// computed; `len` is seeded by the security server with the number of
/// types carrying rules and grows as decisions attach. `len == 0` means
/// the entry has no fine-grained constraints at all.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperationNode {
    /// Types for which decisions apply.
    pub type_mask: OperationPermSet,
    /// Non-zero when fine-grained constraints exist for the entry.
    pub len: u16,
    /// Decisions computed so far, unordered, keyed by type.
    pub decisions: Vec<OperationDecision>,
}

impl OperationNode {
    /// Returns true when fine-grained constraints exist for the entry.
    #[must_use]
    pub const fn has_constraints(&self) -> bool {
        self.len > 0
    }

    /// Finds the decision for `ty`, if one has been attached.
    #[must_use]
    pub fn decision(&self, ty: u8) -> Option<&OperationDecision> {
        self.decisions.iter().find(|od| od.ty == ty)
    }

    /// Appends a deep copy of `od`, bumping `len`.
    pub fn add_decision(&mut self, od: &OperationDecision) {
        self.len += 1;
        self.decisions.push(od.clone());
    }

    /// Patches the allow bit for `cmd` after a grant: marks the type as
    /// covered and, if a decision with an allow bitmap is attached, sets
    /// the command's bit in it.
    pub fn allow_perm(&mut self, cmd: OperationCommand) {
        self.type_mask.set(cmd.ty());
        if let Some(od) = self.decisions.iter_mut().find(|od| od.ty == cmd.ty()) {
            if let Some(allowed) = od.allowed.as_mut() {
                allowed.set(cmd.number());
            }
        }
    }
}
