//! Core triple model — facts, orderings, and query patterns.
//!
//! This module defines:
//!
//! - [`Triple`] — a fact as three 32-bit dictionary ids
//!   `(subject, predicate, object)`.
//! - [`Order`] — the three index orderings (SPO, POS, OSP).  Each ordering
//!   is a permutation of the triple deciding which component groups pages
//!   (the *primary*) and how the remaining two components sort within a
//!   page chain.
//! - [`TriplePattern`] — a partially-bound query pattern with an optional
//!   ordering hint, used by `query` and `stream_query`.
//!
//! Triples are `Copy` and totally ordered by their canonical SPO key, so
//! they can live in `BTreeSet`s and be compared without allocation.

#[cfg(test)]
mod tests;

use crate::encoding::{self, EncodingError};

// ------------------------------------------------------------------------------------------------
// Triple
// ------------------------------------------------------------------------------------------------

/// A fact: `(subject, predicate, object)`, each a 32-bit dictionary id.
///
/// The canonical key of a triple is the concatenation of its three ids in
/// SPO order, which is exactly the derived `Ord` on this field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Triple {
    /// Subject id.
    pub s: u32,

    /// Predicate id.
    pub p: u32,

    /// Object id.
    pub o: u32,
}

impl Triple {
    /// Creates a triple from its three ids.
    pub fn new(s: u32, p: u32, o: u32) -> Self {
        Self { s, p, o }
    }
}

impl From<Triple> for [u32; 3] {
    fn from(t: Triple) -> Self {
        [t.s, t.p, t.o]
    }
}

impl From<[u32; 3]> for Triple {
    fn from(k: [u32; 3]) -> Self {
        Self {
            s: k[0],
            p: k[1],
            o: k[2],
        }
    }
}

impl encoding::Encode for Triple {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.s, buf)?;
        encoding::Encode::encode_to(&self.p, buf)?;
        encoding::Encode::encode_to(&self.o, buf)?;
        Ok(())
    }
}

impl encoding::Decode for Triple {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (s, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (p, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (o, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Self { s, p, o }, offset))
    }
}

// ------------------------------------------------------------------------------------------------
// Order
// ------------------------------------------------------------------------------------------------

/// One of the three index orderings.
///
/// The first letter names the *primary* — the component that groups
/// triples into page chains.  The remaining two components form the sort
/// key within a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Order {
    /// Primary = subject; pages sort by `(predicate, object)`.
    Spo,

    /// Primary = predicate; pages sort by `(object, subject)`.
    Pos,

    /// Primary = object; pages sort by `(subject, predicate)`.
    Osp,
}

impl Order {
    /// All three orderings, in canonical iteration order.
    pub const ALL: [Order; 3] = [Order::Spo, Order::Pos, Order::Osp];

    /// One-byte tag stored in page headers.
    pub fn tag(self) -> u8 {
        match self {
            Order::Spo => 0,
            Order::Pos => 1,
            Order::Osp => 2,
        }
    }

    /// Inverse of [`Order::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Order::Spo),
            1 => Some(Order::Pos),
            2 => Some(Order::Osp),
            _ => None,
        }
    }

    /// Uppercase name used in the manifest document and page file names.
    pub fn name(self) -> &'static str {
        match self {
            Order::Spo => "SPO",
            Order::Pos => "POS",
            Order::Osp => "OSP",
        }
    }

    /// File name of this ordering's page file, e.g. `pages.SPO`.
    pub fn file_name(self) -> String {
        format!("pages.{}", self.name())
    }

    /// Parses an uppercase ordering name (`"SPO"` etc.).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SPO" => Some(Order::Spo),
            "POS" => Some(Order::Pos),
            "OSP" => Some(Order::Osp),
            _ => None,
        }
    }

    /// Returns this ordering's primary component of `t`.
    pub fn primary(self, t: Triple) -> u32 {
        match self {
            Order::Spo => t.s,
            Order::Pos => t.p,
            Order::Osp => t.o,
        }
    }

    /// Permutes `t` into `(primary, a, b)` where `(a, b)` is the in-chain
    /// sort key for this ordering.
    pub fn permute(self, t: Triple) -> (u32, u32, u32) {
        match self {
            Order::Spo => (t.s, t.p, t.o),
            Order::Pos => (t.p, t.o, t.s),
            Order::Osp => (t.o, t.s, t.p),
        }
    }

    /// Inverse of [`Order::permute`]: reassembles a triple from its
    /// permuted components.
    pub fn restore(self, primary: u32, a: u32, b: u32) -> Triple {
        match self {
            Order::Spo => Triple::new(primary, a, b),
            Order::Pos => Triple::new(b, primary, a),
            Order::Osp => Triple::new(a, b, primary),
        }
    }

    /// In-chain sort key of `t` under this ordering.
    pub fn sort_key(self, t: Triple) -> (u32, u32) {
        let (_, a, b) = self.permute(t);
        (a, b)
    }
}

// ------------------------------------------------------------------------------------------------
// TriplePattern
// ------------------------------------------------------------------------------------------------

/// A partially-bound triple pattern with an optional ordering hint.
///
/// `None` components are wildcards.  The pattern chooses the index
/// ordering whose primary is bound; a hint is honoured only when its
/// primary is actually bound (an unbound primary would force a full scan
/// of the hinted ordering for no benefit).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriplePattern {
    /// Subject id, or wildcard.
    pub s: Option<u32>,

    /// Predicate id, or wildcard.
    pub p: Option<u32>,

    /// Object id, or wildcard.
    pub o: Option<u32>,

    /// Preferred ordering for the scan.
    pub order_hint: Option<Order>,
}

impl TriplePattern {
    /// Pattern matching every triple.
    pub fn any() -> Self {
        Self::default()
    }

    /// Returns `true` when `t` satisfies every bound component.
    pub fn matches(&self, t: Triple) -> bool {
        self.s.is_none_or(|s| s == t.s)
            && self.p.is_none_or(|p| p == t.p)
            && self.o.is_none_or(|o| o == t.o)
    }

    /// Returns the bound primary value for `order`, if any.
    pub fn bound_primary(&self, order: Order) -> Option<u32> {
        match order {
            Order::Spo => self.s,
            Order::Pos => self.p,
            Order::Osp => self.o,
        }
    }

    /// Selects the ordering to scan for this pattern.
    ///
    /// Preference: an honoured hint, then subject, predicate, object; a
    /// fully-unbound pattern scans SPO (or the hint, which costs the same).
    pub fn scan_order(&self) -> Order {
        if let Some(hint) = self.order_hint
            && (self.bound_primary(hint).is_some() || self.is_unbound())
        {
            return hint;
        }
        if self.s.is_some() {
            Order::Spo
        } else if self.p.is_some() {
            Order::Pos
        } else if self.o.is_some() {
            Order::Osp
        } else {
            Order::Spo
        }
    }

    /// Returns `true` when no component is bound.
    pub fn is_unbound(&self) -> bool {
        self.s.is_none() && self.p.is_none() && self.o.is_none()
    }
}
