//! Captured argument values
//!
//! Hook points capture raw argument bytes together with a layout describing
//! them. Turning those bytes into a [`RuntimeArgumentList`] is the job of an
//! [`ArgumentParser`]. The engine ships [`PackedArgumentParser`], which reads
//! the compact layout produced by [`PackedArguments`].

use crate::core::types::{MethodToken, ModuleId, TrackedObjectId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single captured value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeArgumentValue {
    Bool(bool),
    UInt32(u32),
    UInt64(u64),
    /// Reference-typed argument, resolved to its tracked identity
    Object(TrackedObjectId),
}

/// A captured value together with its parameter index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeArgument {
    pub index: u16,
    pub value: RuntimeArgumentValue,
}

/// Ordered list of parsed arguments captured at a hook point
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeArgumentList {
    arguments: Vec<RuntimeArgument>,
}

impl RuntimeArgumentList {
    pub fn new(arguments: Vec<RuntimeArgument>) -> Self {
        RuntimeArgumentList { arguments }
    }

    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&RuntimeArgument> {
        self.arguments.get(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuntimeArgument> {
        self.arguments.iter()
    }

    /// Tracked object id at `position`, if that argument is a reference
    pub fn object(&self, position: usize) -> Option<TrackedObjectId> {
        match self.get(position)?.value {
            RuntimeArgumentValue::Object(id) => Some(id),
            _ => None,
        }
    }

    /// Boolean at `position`, if that argument is a bool
    pub fn flag(&self, position: usize) -> Option<bool> {
        match self.get(position)?.value {
            RuntimeArgumentValue::Bool(value) => Some(value),
            _ => None,
        }
    }

    /// Whether any argument refers to the given tracked object
    pub fn references(&self, object_id: TrackedObjectId) -> bool {
        self.arguments
            .iter()
            .any(|a| a.value == RuntimeArgumentValue::Object(object_id))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Argument layout has odd length {0}")]
    OddLayout(usize),

    #[error("Unknown argument kind {kind} at position {position}")]
    UnknownKind { kind: u8, position: usize },

    #[error("Argument at position {position} needs {needed} bytes but only {remaining} remain")]
    Truncated {
        position: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("{0} trailing bytes after the last argument")]
    TrailingBytes(usize),
}

/// Turns captured argument bytes into a [`RuntimeArgumentList`]
pub trait ArgumentParser: Send + Sync {
    fn parse_arguments(
        &self,
        module_id: ModuleId,
        method_token: MethodToken,
        values: &[u8],
        layout: &[u8],
    ) -> Result<RuntimeArgumentList, ParseError>;
}

const KIND_BOOL: u8 = 0;
const KIND_UINT32: u8 = 1;
const KIND_UINT64: u8 = 2;
const KIND_OBJECT: u8 = 3;

/// Parser for the packed layout: one `(index, kind)` byte pair per argument,
/// values concatenated little-endian in layout order
#[derive(Debug, Clone, Copy, Default)]
pub struct PackedArgumentParser;

impl ArgumentParser for PackedArgumentParser {
    fn parse_arguments(
        &self,
        _module_id: ModuleId,
        _method_token: MethodToken,
        values: &[u8],
        layout: &[u8],
    ) -> Result<RuntimeArgumentList, ParseError> {
        if layout.len() % 2 != 0 {
            return Err(ParseError::OddLayout(layout.len()));
        }

        let mut arguments = Vec::with_capacity(layout.len() / 2);
        let mut rest = values;
        for (position, pair) in layout.chunks_exact(2).enumerate() {
            let (index, kind) = (pair[0] as u16, pair[1]);
            let needed = match kind {
                KIND_BOOL => 1,
                KIND_UINT32 => 4,
                KIND_UINT64 | KIND_OBJECT => 8,
                _ => return Err(ParseError::UnknownKind { kind, position }),
            };
            if rest.len() < needed {
                return Err(ParseError::Truncated {
                    position,
                    needed,
                    remaining: rest.len(),
                });
            }
            let (bytes, tail) = rest.split_at(needed);
            rest = tail;

            let value = match kind {
                KIND_BOOL => RuntimeArgumentValue::Bool(bytes[0] != 0),
                KIND_UINT32 => RuntimeArgumentValue::UInt32(u32::from_le_bytes(
                    bytes.try_into().map_err(|_| ParseError::Truncated {
                        position,
                        needed,
                        remaining: bytes.len(),
                    })?,
                )),
                _ => {
                    let raw = u64::from_le_bytes(bytes.try_into().map_err(|_| {
                        ParseError::Truncated {
                            position,
                            needed,
                            remaining: bytes.len(),
                        }
                    })?);
                    if kind == KIND_OBJECT {
                        RuntimeArgumentValue::Object(raw)
                    } else {
                        RuntimeArgumentValue::UInt64(raw)
                    }
                }
            };
            arguments.push(RuntimeArgument { index, value });
        }

        if !rest.is_empty() {
            return Err(ParseError::TrailingBytes(rest.len()));
        }
        Ok(RuntimeArgumentList::new(arguments))
    }
}

/// Builder for payloads understood by [`PackedArgumentParser`]
///
/// # Example
///
/// ```rust
/// use syncshadow::PackedArguments;
///
/// let (values, layout) = PackedArguments::new().object(0x1000).flag(true).build();
/// assert_eq!(layout, vec![0, 3, 1, 0]);
/// assert_eq!(values.len(), 9);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PackedArguments {
    values: Vec<u8>,
    layout: Vec<u8>,
    next_index: u8,
}

impl PackedArguments {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, kind: u8, bytes: &[u8]) -> Self {
        self.layout.push(self.next_index);
        self.layout.push(kind);
        self.values.extend_from_slice(bytes);
        self.next_index = self.next_index.wrapping_add(1);
        self
    }

    pub fn object(self, object_id: TrackedObjectId) -> Self {
        self.push(KIND_OBJECT, &object_id.to_le_bytes())
    }

    pub fn flag(self, value: bool) -> Self {
        self.push(KIND_BOOL, &[value as u8])
    }

    pub fn uint32(self, value: u32) -> Self {
        self.push(KIND_UINT32, &value.to_le_bytes())
    }

    pub fn uint64(self, value: u64) -> Self {
        self.push(KIND_UINT64, &value.to_le_bytes())
    }

    /// Returns `(values, layout)`
    pub fn build(self) -> (Vec<u8>, Vec<u8>) {
        (self.values, self.layout)
    }
}
