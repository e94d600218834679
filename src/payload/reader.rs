//! Pull-cursor over a JSON payload.
//!
//! [`PayloadReader`] flattens a parsed document into a token sequence and
//! walks it one node at a time. Scalars are [`NodeKind::Property`] nodes;
//! objects and arrays open with a [`NodeKind::StartProperty`] and close
//! with a matching [`NodeKind::EndProperty`]. The fields of the root object
//! sit at depth 0 with no surrounding start/end pair.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::SupervisorError;

/// Kind of the node under the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Scalar value (string, number, bool or null).
    Property,
    /// Opening of an object or array.
    StartProperty,
    /// Closing of the innermost open object or array.
    EndProperty,
}

#[derive(Debug, Clone)]
enum Token {
    Scalar {
        name: Option<String>,
        value: Value,
    },
    Start {
        name: Option<String>,
        is_array: bool,
        end: usize,
    },
    End,
}

/// Forward-only reader over a tree-shaped payload.
///
/// The cursor starts before the first node; call [`PayloadReader::read`]
/// to advance. `read` on a start node moves into its first child, so a
/// caller that is not interested in a subtree calls
/// [`PayloadReader::skip`] first.
#[derive(Debug, Clone)]
pub struct PayloadReader {
    tokens: Vec<Token>,
    depths: Vec<usize>,
    cursor: Option<usize>,
}

impl PayloadReader {
    /// Parses `text` and positions the cursor before the first node.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Format`] if `text` is not valid JSON or
    /// its root is not an object or array.
    pub fn parse(text: &str) -> Result<Self, SupervisorError> {
        let root: Value = serde_json::from_str(text)?;
        Self::from_value(root)
    }

    /// Builds a reader over an already parsed document.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Format`] if the root is a scalar.
    pub fn from_value(root: Value) -> Result<Self, SupervisorError> {
        let mut reader = Self {
            tokens: Vec::new(),
            depths: Vec::new(),
            cursor: None,
        };
        match root {
            Value::Object(map) => {
                for (name, value) in map {
                    reader.flatten(Some(name), value, 0);
                }
            }
            Value::Array(items) => {
                for value in items {
                    reader.flatten(None, value, 0);
                }
            }
            _ => {
                return Err(SupervisorError::format(
                    "payload root must be an object or array",
                    "root",
                ));
            }
        }
        Ok(reader)
    }

    fn flatten(&mut self, name: Option<String>, value: Value, depth: usize) {
        match value {
            Value::Object(map) => {
                let start = self.open(name, false, depth);
                for (field, child) in map {
                    self.flatten(Some(field), child, depth + 1);
                }
                self.close(start, depth);
            }
            Value::Array(items) => {
                let start = self.open(name, true, depth);
                for child in items {
                    self.flatten(None, child, depth + 1);
                }
                self.close(start, depth);
            }
            scalar => {
                self.tokens.push(Token::Scalar {
                    name,
                    value: scalar,
                });
                self.depths.push(depth);
            }
        }
    }

    fn open(&mut self, name: Option<String>, is_array: bool, depth: usize) -> usize {
        self.tokens.push(Token::Start {
            name,
            is_array,
            end: 0,
        });
        self.depths.push(depth);
        self.tokens.len() - 1
    }

    fn close(&mut self, start: usize, depth: usize) {
        let end = self.tokens.len();
        if let Some(Token::Start { end: slot, .. }) = self.tokens.get_mut(start) {
            *slot = end;
        }
        self.tokens.push(Token::End);
        self.depths.push(depth);
    }

    fn current(&self) -> Option<&Token> {
        self.cursor.and_then(|index| self.tokens.get(index))
    }

    /// Advances to the next node. Returns `false` once the payload is
    /// exhausted.
    pub fn read(&mut self) -> bool {
        let next = self.cursor.map_or(0, |index| index + 1);
        if next < self.tokens.len() {
            self.cursor = Some(next);
            true
        } else {
            self.cursor = Some(self.tokens.len());
            false
        }
    }

    /// Kind of the current node. Outside the token range the reader
    /// reports [`NodeKind::EndProperty`].
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self.current() {
            Some(Token::Scalar { .. }) => NodeKind::Property,
            Some(Token::Start { .. }) => NodeKind::StartProperty,
            Some(Token::End) | None => NodeKind::EndProperty,
        }
    }

    /// Field name of the current node; `None` for array elements and end
    /// nodes.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self.current() {
            Some(Token::Scalar { name, .. } | Token::Start { name, .. }) => name.as_deref(),
            _ => None,
        }
    }

    /// Nesting depth of the current node. A start node and its end node
    /// share the same depth; their children are one level deeper.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.cursor
            .and_then(|index| self.depths.get(index).copied())
            .unwrap_or(0)
    }

    /// Returns `true` if the current node is an array start.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.current(), Some(Token::Start { is_array: true, .. }))
    }

    /// Returns `true` if the current node is a `null` scalar.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(
            self.current(),
            Some(Token::Scalar {
                value: Value::Null,
                ..
            })
        )
    }

    /// Returns `true` if the current node is an end node at `depth`.
    #[must_use]
    pub fn is_end_of(&self, depth: usize) -> bool {
        self.kind() == NodeKind::EndProperty && self.depth() == depth
    }

    /// Deserializes the current scalar.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Format`] if the node is not a scalar or
    /// does not deserialize into `T`.
    pub fn value<T: DeserializeOwned>(&self) -> Result<T, SupervisorError> {
        match self.current() {
            Some(Token::Scalar { value, .. }) => T::deserialize(value).map_err(|err| {
                SupervisorError::format(format!("invalid value: {err}"), self.position())
            }),
            _ => Err(SupervisorError::format("expected a scalar value", self.position())),
        }
    }

    /// Returns the current scalar as a string slice.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Format`] if the node is not a string.
    pub fn str_value(&self) -> Result<&str, SupervisorError> {
        match self.current() {
            Some(Token::Scalar {
                value: Value::String(text),
                ..
            }) => Ok(text),
            _ => Err(SupervisorError::format("expected a string value", self.position())),
        }
    }

    /// Skips the subtree of the current start node, leaving the cursor on
    /// its end node. Does nothing for other nodes.
    pub fn skip(&mut self) {
        if let Some(Token::Start { end, .. }) = self.current() {
            self.cursor = Some(*end);
        }
    }

    /// Reads forward until the end node at `depth`, consuming whatever the
    /// caller left unread inside that container.
    pub fn drain_to_end(&mut self, depth: usize) {
        while !self.is_end_of(depth) {
            if !self.read() {
                break;
            }
        }
    }

    /// Advances to the next node and requires it to be a field named
    /// `name` (scalar or container).
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Format`] if the payload ends or the next
    /// node has a different name or is an end node.
    pub fn expect_field(&mut self, name: &str) -> Result<(), SupervisorError> {
        if !self.read() {
            return Err(SupervisorError::format(
                format!("expected `{name}`, found end of payload"),
                self.position(),
            ));
        }
        if self.kind() == NodeKind::EndProperty || self.name() != Some(name) {
            return Err(SupervisorError::format(
                format!("expected `{name}`"),
                self.position(),
            ));
        }
        Ok(())
    }

    /// Rebuilds the current node as a [`Value`]. For a start node the
    /// cursor ends on its matching end node.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Format`] if the cursor is on an end node.
    pub fn to_value(&mut self) -> Result<Value, SupervisorError> {
        let Some(index) = self.cursor else {
            return Err(SupervisorError::format("no current node", self.position()));
        };
        match self.build(index) {
            Some((value, last)) => {
                self.cursor = Some(last);
                Ok(value)
            }
            None => Err(SupervisorError::format("expected a value", self.position())),
        }
    }

    fn build(&self, index: usize) -> Option<(Value, usize)> {
        match self.tokens.get(index)? {
            Token::Scalar { value, .. } => Some((value.clone(), index)),
            Token::Start { is_array, end, .. } => {
                let mut child = index + 1;
                let mut items = Vec::new();
                let mut fields = Map::new();
                while child < *end {
                    let (value, last) = self.build(child)?;
                    if *is_array {
                        items.push(value);
                    } else if let Some(Token::Scalar { name: Some(name), .. })
                    | Some(Token::Start { name: Some(name), .. }) = self.tokens.get(child)
                    {
                        fields.insert(name.clone(), value);
                    }
                    child = last + 1;
                }
                let value = if *is_array {
                    Value::Array(items)
                } else {
                    Value::Object(fields)
                };
                Some((value, *end))
            }
            Token::End => None,
        }
    }

    /// Human-readable cursor position used in format errors, e.g.
    /// `#7 event.variables.trigger`.
    #[must_use]
    pub fn position(&self) -> String {
        let Some(index) = self.cursor else {
            return "before first node".to_string();
        };
        if index >= self.tokens.len() {
            return "end of payload".to_string();
        }
        let mut path: Vec<String> = Vec::new();
        let mut counters: Vec<usize> = vec![0];
        let mut leaf = String::new();
        for (at, token) in self.tokens.iter().enumerate().take(index + 1) {
            match token {
                Token::Scalar { name, .. } => {
                    let label = segment(name, &mut counters);
                    if at == index {
                        leaf = label;
                    }
                }
                Token::Start { name, .. } => {
                    let label = segment(name, &mut counters);
                    if at == index {
                        leaf = label;
                    } else {
                        path.push(label);
                        counters.push(0);
                    }
                }
                Token::End => {
                    if at == index {
                        leaf = "<end>".to_string();
                    } else {
                        path.pop();
                        counters.pop();
                    }
                }
            }
        }
        path.push(leaf);
        format!("#{index} {}", path.join("."))
    }
}

fn segment(name: &Option<String>, counters: &mut [usize]) -> String {
    match name {
        Some(name) => name.clone(),
        None => {
            let Some(slot) = counters.last_mut() else {
                return "[?]".to_string();
            };
            let position = *slot;
            *slot += 1;
            format!("[{position}]")
        }
    }
}
