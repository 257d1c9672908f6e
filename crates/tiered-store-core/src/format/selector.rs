//! Choosing a serializer for a configured format.
//!
//! Resolution happens once, when a store is built. The preferred format is
//! used when its serializer is available. Otherwise the store falls back to
//! the generic format, which never depends on optional features.

use std::sync::Arc;

use log::warn;

use super::{GenericSerializer, Serializer, SerializerOptions, StorageFormat};

/// Outcome of resolving a preferred format against the available serializers.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The format that was asked for.
    pub requested: StorageFormat,
    /// The serializer that will actually be used.
    pub serializer: Arc<dyn Serializer>,
}

impl Resolution {
    /// Format of the chosen serializer.
    pub fn resolved(&self) -> StorageFormat {
        self.serializer.format()
    }

    /// Whether the chosen format differs from the requested one.
    pub fn fell_back(&self) -> bool {
        self.resolved() != self.requested
    }
}

/// Pick the serializer for `preferred` out of `candidates`.
///
/// The first available candidate whose format matches wins. When none does,
/// the first available generic candidate is used, and when the candidates
/// hold no usable generic serializer a fresh [`GenericSerializer`] built from
/// `options` is returned. A fallback is logged at `warn` level.
pub fn resolve_format(
    preferred: StorageFormat,
    candidates: &[Arc<dyn Serializer>],
    options: SerializerOptions,
) -> Resolution {
    let find = |format: StorageFormat| {
        candidates
            .iter()
            .find(|s| s.format() == format && s.is_available())
            .cloned()
    };

    if let Some(serializer) = find(preferred) {
        return Resolution {
            requested: preferred,
            serializer,
        };
    }

    let serializer = find(StorageFormat::GenericBinary)
        .unwrap_or_else(|| Arc::new(GenericSerializer::new(options)));
    warn!(
        "Storage format {preferred} is unavailable; falling back to {}",
        serializer.format()
    );
    Resolution {
        requested: preferred,
        serializer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{DecodeOptions, FormatResult, default_serializers};
    use crate::storage::OutputSink;
    use crate::table::Table;
    use std::path::Path;

    /// A serializer that claims a format but reports itself missing.
    #[derive(Debug)]
    struct Missing(StorageFormat);

    impl Serializer for Missing {
        fn format(&self) -> StorageFormat {
            self.0
        }

        fn is_available(&self) -> bool {
            false
        }

        fn encode(&self, _table: &Table, _sink: &mut OutputSink) -> FormatResult<()> {
            unreachable!("unavailable serializer is never selected")
        }

        fn decode(&self, _path: &Path, _options: &DecodeOptions) -> FormatResult<Table> {
            unreachable!("unavailable serializer is never selected")
        }
    }

    #[test]
    fn preferred_format_wins_when_available() {
        let options = SerializerOptions::default();
        let candidates = default_serializers(options);
        let resolution = resolve_format(StorageFormat::GenericBinary, &candidates, options);
        assert_eq!(resolution.resolved(), StorageFormat::GenericBinary);
        assert!(!resolution.fell_back());
    }

    #[test]
    fn unavailable_format_falls_back_to_generic() {
        let options = SerializerOptions::default();
        let candidates: Vec<Arc<dyn Serializer>> = vec![
            Arc::new(Missing(StorageFormat::ColumnarCompressed)),
            Arc::new(GenericSerializer::new(options)),
        ];
        let resolution = resolve_format(StorageFormat::ColumnarCompressed, &candidates, options);
        assert_eq!(resolution.requested, StorageFormat::ColumnarCompressed);
        assert_eq!(resolution.resolved(), StorageFormat::GenericBinary);
        assert!(resolution.fell_back());
    }

    #[test]
    fn generic_is_supplied_when_no_candidate_works() {
        let options = SerializerOptions::default();
        let candidates: Vec<Arc<dyn Serializer>> = vec![
            Arc::new(Missing(StorageFormat::Hierarchical)),
            Arc::new(Missing(StorageFormat::GenericBinary)),
        ];
        let resolution = resolve_format(StorageFormat::Hierarchical, &candidates, options);
        assert_eq!(resolution.resolved(), StorageFormat::GenericBinary);
        assert!(resolution.serializer.is_available());
    }

    #[cfg(all(feature = "columnar", feature = "hierarchical"))]
    #[test]
    fn every_format_resolves_to_itself_with_all_features() {
        let options = SerializerOptions::default();
        let candidates = default_serializers(options);
        for format in StorageFormat::ALL {
            assert!(!resolve_format(format, &candidates, options).fell_back());
        }
    }
}
