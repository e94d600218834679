//! Declarative field-path matcher for nested payloads.

use crate::payload::{NodeKind, PayloadReader};

/// Ordered list of field names leading to a nested node.
///
/// Seeking scans the siblings at each level, skipping any field whose name
/// does not match, and descends into the matching one. Intermediate
/// segments must be objects; the last one may be any node.
#[derive(Debug, Clone, Copy)]
pub struct FieldPath<'a> {
    segments: &'a [&'a str],
}

impl<'a> FieldPath<'a> {
    /// Creates a path from its segments.
    #[must_use]
    pub const fn new(segments: &'a [&'a str]) -> Self {
        Self { segments }
    }

    /// Advances `reader` to the node named by the path, starting with the
    /// siblings that follow the current node. Returns `false` (with the
    /// reader somewhere past the search range) if the path does not exist.
    pub fn seek(&self, reader: &mut PayloadReader) -> bool {
        let Some((last, parents)) = self.segments.split_last() else {
            return false;
        };
        for segment in parents {
            if !Self::find(reader, segment, true) {
                return false;
            }
        }
        Self::find(reader, last, false)
    }

    fn find(reader: &mut PayloadReader, segment: &str, descend: bool) -> bool {
        while reader.read() {
            let kind = reader.kind();
            if kind == NodeKind::EndProperty {
                return false;
            }
            if reader.name() == Some(segment) {
                if !descend || (kind == NodeKind::StartProperty && !reader.is_array()) {
                    return true;
                }
                return false;
            }
            reader.skip();
        }
        false
    }
}
