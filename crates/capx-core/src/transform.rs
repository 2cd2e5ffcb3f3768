//! Payload normalization stages: Align and Fold
//!
//! Every payload entering the store passes through this pipeline. Two
//! stages exist:
//!
//! - **Align**: applied on ingest and on final emission. Byte payloads get
//!   the fixed 8-byte pad marker appended; numeric payloads pass through an
//!   identity rescale (`v * 8 / 8`) that only routes them through the shared
//!   field-vector convention.
//! - **Fold**: applied before persistence. Byte payloads are pad-stamped
//!   (bytes are never numerically folded); numeric payloads are scaled by
//!   [`FOLD_MULTIPLIER`], a lossy compression with **no corresponding
//!   expansion stage**. Callers must not expect numeric payloads to
//!   round-trip through Fold.
//!
//! Both stages are total: there is no malformed input, and empty input is
//! safe (empty numeric sequence stays empty; empty bytes become the pad
//! marker alone). The only side effect is growth of the shared
//! [`SymbolSet`] with previously-unseen characters.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Fixed 8-byte pad marker stamped onto byte payloads by both stages.
///
/// Doubles as the record-boundary marker in ad-hoc key/value blobs
/// (distinct usage from the record-table row separator).
pub const PAD_MARKER: [u8; 8] = *b"XXXXXXXX";

/// Shared 5-element field vector describing the normalization and
/// quantization ratios. Read-only, process-wide configuration; attached to
/// every capsule.
pub const FIELD_VECTOR: [u16; 5] = [8, 8, 8, 8, 16];

/// Multiplier applied by Fold to numeric payloads:
/// `(8 * 8 * 8 * 1e-8) / 64`.
pub const FOLD_MULTIPLIER: f64 = (8.0 * 8.0 * 8.0 * 1e-8) / 64.0;

/// Seed alphabet for the symbol set. New characters encountered in byte
/// payloads are appended after these; nothing is ever removed.
const DEFAULT_ALPHABET: &str = " ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789.,;:!?-_/`\\@#%&*(^)+=[|]}<>•{ →'←↔~↑↓⇄⇆⇋⇌⟷⟺≈≠≤≥±∞∴∵ ⚛︎⊕⊗⊙∑∏√πΩµλφψΔΣΘαβγδεζηθρτχω ©®™€£¥₹§¶° ○●◉◯□■▢△▲▽▼◆◇▷◁⊿⌘ ║═╔╗╚╝╠╣╦╩╬░▒▓█▌▐▀▄▖▗▘▙▚▛▜▝▞▟ ⨀⨂⨁⟡⋈⋇⋯⋮⋱∷∎ Ġ あいうえおアイウエオабвгдΑΒΓΔΕ";

/// A payload on its way through the pipeline: raw bytes or a numeric
/// sequence. Structured payloads (record tables, blobs) are always bytes;
/// only the fallback numeric form is subject to the lossy fold formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// An ordered sequence of bytes
    Bytes(Vec<u8>),
    /// A numeric sequence routed through the field-vector convention
    Values(Vec<f64>),
}

impl Payload {
    /// Extract the byte form, if this is a byte payload.
    #[must_use]
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::Values(_) => None,
        }
    }

    /// Length in elements (bytes or values).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Bytes(bytes) => bytes.len(),
            Self::Values(values) => values.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Append-only ordered set of characters observed across all capsules.
///
/// Shared by the whole store, guarded by a mutex, injected rather than
/// global. Adding an already-present character is a no-op, so concurrent
/// appends from the foreground and the mirror queue are tolerated.
#[derive(Debug)]
pub struct SymbolSet {
    order: Vec<char>,
    seen: HashSet<char>,
}

impl SymbolSet {
    /// Empty set, no seed alphabet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Set seeded with the default alphabet, the normal store configuration.
    #[must_use]
    pub fn with_default_alphabet() -> Self {
        let mut set = Self::new();
        set.observe_chars(DEFAULT_ALPHABET.chars());
        set
    }

    /// Append every previously-unseen character, preserving first-seen
    /// order. Returns how many were new.
    pub fn observe_chars(&mut self, chars: impl Iterator<Item = char>) -> usize {
        let mut added = 0;
        for c in chars {
            if self.seen.insert(c) {
                self.order.push(c);
                added += 1;
            }
        }
        added
    }

    /// Observe the characters of a byte payload (lossy UTF-8 decode;
    /// undecodable bytes map to the replacement character).
    pub fn observe_bytes(&mut self, bytes: &[u8]) -> usize {
        self.observe_chars(String::from_utf8_lossy(bytes).chars())
    }

    #[must_use]
    pub fn contains(&self, c: char) -> bool {
        self.seen.contains(&c)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Characters in first-seen order.
    #[must_use]
    pub fn ordered(&self) -> &[char] {
        &self.order
    }
}

impl Default for SymbolSet {
    fn default() -> Self {
        Self::with_default_alphabet()
    }
}

/// The two-stage normalization pipeline. Cheap to clone; clones share the
/// same symbol set.
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    symbols: Arc<Mutex<SymbolSet>>,
}

impl TransformPipeline {
    #[must_use]
    pub fn new(symbols: Arc<Mutex<SymbolSet>>) -> Self {
        Self { symbols }
    }

    /// Handle to the shared symbol set.
    #[must_use]
    pub fn symbols(&self) -> Arc<Mutex<SymbolSet>> {
        Arc::clone(&self.symbols)
    }

    /// Align stage: pad-stamp bytes, identity-rescale numbers.
    #[must_use]
    pub fn align(&self, input: Payload) -> Payload {
        self.index_symbols(&input);
        match input {
            Payload::Bytes(mut bytes) => {
                bytes.extend_from_slice(&PAD_MARKER);
                Payload::Bytes(bytes)
            }
            Payload::Values(values) => {
                Payload::Values(values.into_iter().map(|v| (v * 8.0) / 8.0).collect())
            }
        }
    }

    /// Fold stage: pad-stamp bytes, lossily scale numbers. One-way; there
    /// is no decode path anywhere in the system.
    #[must_use]
    pub fn fold(&self, input: Payload) -> Payload {
        self.index_symbols(&input);
        match input {
            Payload::Bytes(mut bytes) => {
                bytes.extend_from_slice(&PAD_MARKER);
                Payload::Bytes(bytes)
            }
            Payload::Values(values) => {
                Payload::Values(values.into_iter().map(|v| v * FOLD_MULTIPLIER).collect())
            }
        }
    }

    /// Numeric payloads carry no characters; only bytes grow the set.
    fn index_symbols(&self, input: &Payload) {
        if let Payload::Bytes(bytes) = input {
            let mut set = self
                .symbols
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            set.observe_bytes(bytes);
        }
    }
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::new(Arc::new(Mutex::new(SymbolSet::with_default_alphabet())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn align_stamps_bytes_with_pad() {
        let pipeline = TransformPipeline::default();
        let out = pipeline.align(Payload::Bytes(b"hello".to_vec()));
        assert_eq!(out, Payload::Bytes(b"helloXXXXXXXX".to_vec()));
    }

    #[test]
    fn align_of_empty_bytes_is_pad_only() {
        let pipeline = TransformPipeline::default();
        let out = pipeline.align(Payload::Bytes(Vec::new()));
        assert_eq!(out, Payload::Bytes(PAD_MARKER.to_vec()));
    }

    #[test]
    fn align_is_identity_on_values() {
        let pipeline = TransformPipeline::default();
        let values = vec![0.0, 1.5, -3.0, 255.0];
        let out = pipeline.align(Payload::Values(values.clone()));
        assert_eq!(out, Payload::Values(values));
    }

    #[test]
    fn fold_never_numerically_folds_bytes() {
        let pipeline = TransformPipeline::default();
        let out = pipeline.fold(Payload::Bytes(b"table row".to_vec()));
        assert_eq!(out, Payload::Bytes(b"table rowXXXXXXXX".to_vec()));
    }

    #[test]
    fn fold_scales_values_by_the_fold_multiplier() {
        let pipeline = TransformPipeline::default();
        let out = pipeline.fold(Payload::Values(vec![64.0]));
        let Payload::Values(values) = out else {
            panic!("expected values");
        };
        assert!((values[0] - 64.0 * FOLD_MULTIPLIER).abs() < f64::EPSILON);
    }

    #[test]
    fn fold_of_empty_values_is_empty() {
        let pipeline = TransformPipeline::default();
        assert_eq!(
            pipeline.fold(Payload::Values(Vec::new())),
            Payload::Values(Vec::new())
        );
    }

    #[test]
    fn symbol_set_grows_with_unseen_characters_only() {
        let symbols = Arc::new(Mutex::new(SymbolSet::new()));
        let pipeline = TransformPipeline::new(Arc::clone(&symbols));

        let _ = pipeline.align(Payload::Bytes(b"abc".to_vec()));
        assert_eq!(symbols.lock().unwrap().len(), 3);

        // Re-observing the same characters is a no-op.
        let _ = pipeline.fold(Payload::Bytes(b"cba".to_vec()));
        assert_eq!(symbols.lock().unwrap().len(), 3);

        let _ = pipeline.align(Payload::Bytes("résumé".as_bytes().to_vec()));
        let set = symbols.lock().unwrap();
        assert!(set.contains('é'));
        assert_eq!(set.ordered()[0], 'a');
    }

    #[test]
    fn default_alphabet_covers_plain_text() {
        let set = SymbolSet::with_default_alphabet();
        let mut probe = SymbolSet::with_default_alphabet();
        let added = probe.observe_bytes(b"Hello, world! A == A");
        assert_eq!(added, 0);
        assert!(set.contains('A'));
        assert!(set.contains('9'));
    }

    #[test]
    fn field_vector_is_the_documented_descriptor() {
        assert_eq!(FIELD_VECTOR, [8, 8, 8, 8, 16]);
        assert_eq!(PAD_MARKER.len(), 8);
    }

    proptest! {
        #[test]
        fn aligned_bytes_end_with_pad_and_grow_by_eight(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let pipeline = TransformPipeline::default();
            let original_len = payload.len();
            let out = pipeline.align(Payload::Bytes(payload));
            let Payload::Bytes(bytes) = out else { panic!("expected bytes") };
            prop_assert_eq!(bytes.len(), original_len + 8);
            prop_assert_eq!(&bytes[original_len..], &PAD_MARKER[..]);
        }

        #[test]
        fn align_rescale_is_identity(values in proptest::collection::vec(-1e6_f64..1e6, 0..64)) {
            let pipeline = TransformPipeline::default();
            let out = pipeline.align(Payload::Values(values.clone()));
            prop_assert_eq!(out, Payload::Values(values));
        }
    }
}
