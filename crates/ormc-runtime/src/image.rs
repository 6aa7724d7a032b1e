//! Images: the fixed buffers a statement binds its parameters and results to.
//!
//! One buffer per slot, in plan order. Fixed-size columns hold their value
//! inline; variable-length columns hold a byte buffer with a capacity, the
//! length the database reported, and a truncation flag. Any change to a
//! buffer's capacity bumps the image version so bindings know to re-bind.

use ormc_core::SqlType;
use ormc_plan::Slot;

use crate::error::RuntimeError;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum Buffer {
    Int(i64),
    Double(f64),
    /// `data.len()` is the capacity, `len` the full length of the value.
    Bytes { data: Vec<u8>, len: usize },
}

#[derive(Debug, Clone)]
pub struct SlotBuffer {
    column: String,
    sql_type: SqlType,
    null: bool,
    truncated: bool,
    buffer: Buffer,
}

impl SlotBuffer {
    fn new(slot: &Slot, initial_capacity: usize) -> Self {
        let buffer = match slot.sql_type {
            SqlType::Double => Buffer::Double(0.0),
            SqlType::Text | SqlType::VarChar(_) | SqlType::Blob => Buffer::Bytes {
                data: vec![0; initial_capacity],
                len: 0,
            },
            _ => Buffer::Int(0),
        };
        SlotBuffer {
            column: slot.column.clone(),
            sql_type: slot.sql_type,
            null: true,
            truncated: false,
            buffer,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Capacity of a variable-length buffer; zero for fixed-size ones.
    pub fn capacity(&self) -> usize {
        match &self.buffer {
            Buffer::Bytes { data, .. } => data.len(),
            _ => 0,
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    fn value(&self) -> Value {
        if self.null {
            return Value::Null;
        }
        match &self.buffer {
            Buffer::Int(n) if self.sql_type == SqlType::Boolean => Value::Bool(*n != 0),
            Buffer::Int(n) => Value::Int(*n),
            Buffer::Double(d) => Value::Double(*d),
            Buffer::Bytes { data, len } => {
                let bytes = &data[..(*len).min(data.len())];
                if self.sql_type == SqlType::Blob {
                    Value::Blob(bytes.to_vec())
                } else {
                    Value::Text(String::from_utf8_lossy(bytes).into_owned())
                }
            }
        }
    }
}

fn as_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::Null => Vec::new(),
        Value::Bool(b) => if *b { b"1".to_vec() } else { b"0".to_vec() },
        Value::Int(n) => n.to_string().into_bytes(),
        Value::Double(d) => d.to_string().into_bytes(),
        Value::Text(s) => s.as_bytes().to_vec(),
        Value::Blob(b) => b.clone(),
    }
}

/// `None` when the value has no integer reading. A null leaves the
/// buffer unused, so it reads as zero.
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Null => Some(0),
        Value::Int(n) => Some(*n),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Double(d) => Some(*d as i64),
        Value::Text(s) => s.trim().parse().ok(),
        Value::Blob(_) => None,
    }
}

fn as_double(value: &Value) -> Option<f64> {
    match value {
        Value::Null => Some(0.0),
        Value::Double(d) => Some(*d),
        Value::Int(n) => Some(*n as f64),
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        Value::Text(s) => s.trim().parse().ok(),
        Value::Blob(_) => None,
    }
}

fn mismatch(slot: &SlotBuffer, value: &Value) -> RuntimeError {
    RuntimeError::InvalidParameter {
        column: slot.column.clone(),
        reason: format!("{value:?} cannot be stored as {:?}", slot.sql_type),
    }
}

#[derive(Debug, Clone)]
pub struct Image {
    slots: Vec<SlotBuffer>,
    version: u64,
}

impl Image {
    pub fn new(slots: &[Slot], initial_capacity: usize) -> Self {
        Image {
            slots: slots
                .iter()
                .map(|s| SlotBuffer::new(s, initial_capacity))
                .collect(),
            version: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bumped whenever a buffer is reallocated.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn slots(&self) -> &[SlotBuffer] {
        &self.slots
    }

    pub fn capacities(&self) -> Vec<usize> {
        self.slots.iter().map(SlotBuffer::capacity).collect()
    }

    pub fn value(&self, index: usize) -> Value {
        self.slots.get(index).map_or(Value::Null, SlotBuffer::value)
    }

    pub fn values(&self) -> Vec<Value> {
        self.slots.iter().map(SlotBuffer::value).collect()
    }

    /// Stores a parameter value, growing its buffer if it does not fit.
    pub fn set(&mut self, index: usize, value: &Value, max: usize) -> Result<(), RuntimeError> {
        let slots = self.slots.len();
        let Some(slot) = self.slots.get_mut(index) else {
            return Err(RuntimeError::InvalidParameter {
                column: format!("#{index}"),
                reason: format!("statement has {slots} parameter(s)"),
            });
        };
        match &slot.buffer {
            Buffer::Int(_) if as_int(value).is_none() => return Err(mismatch(slot, value)),
            Buffer::Double(_) if as_double(value).is_none() => return Err(mismatch(slot, value)),
            _ => {}
        }
        slot.null = value.is_null();
        slot.truncated = false;
        match &mut slot.buffer {
            Buffer::Int(n) => *n = as_int(value).unwrap_or_default(),
            Buffer::Double(d) => *d = as_double(value).unwrap_or_default(),
            Buffer::Bytes { data, len } => {
                let bytes = as_bytes(value);
                if bytes.len() > data.len() {
                    if bytes.len() > max {
                        return Err(RuntimeError::BufferLimit {
                            column: slot.column.clone(),
                            required: bytes.len(),
                            max,
                        });
                    }
                    data.resize(bytes.len(), 0);
                    self.version += 1;
                }
                data[..bytes.len()].copy_from_slice(&bytes);
                *len = bytes.len();
            }
        }
        Ok(())
    }

    /// Stores a fetched value the way a driver writes into bound memory:
    /// at most `bound` bytes land in a variable-length buffer, the full
    /// length is recorded, and the slot is flagged if that was not enough.
    /// Returns whether the slot was truncated.
    pub fn write(&mut self, index: usize, value: &Value, bound: usize) -> bool {
        let Some(slot) = self.slots.get_mut(index) else {
            return false;
        };
        // The database already typed the value; an unreadable number is
        // reported as null rather than zero.
        let number = match &slot.buffer {
            Buffer::Int(_) => as_int(value).is_some(),
            Buffer::Double(_) => as_double(value).is_some(),
            Buffer::Bytes { .. } => true,
        };
        slot.null = value.is_null() || !number;
        slot.truncated = false;
        match &mut slot.buffer {
            Buffer::Int(n) => *n = as_int(value).unwrap_or_default(),
            Buffer::Double(d) => *d = as_double(value).unwrap_or_default(),
            Buffer::Bytes { data, len } => {
                let bytes = as_bytes(value);
                let room = bound.min(data.len());
                let written = bytes.len().min(room);
                data[..written].copy_from_slice(&bytes[..written]);
                *len = bytes.len();
                slot.truncated = bytes.len() > room;
            }
        }
        slot.truncated
    }

    pub fn is_truncated(&self) -> bool {
        self.slots.iter().any(SlotBuffer::is_truncated)
    }

    /// Grows every truncated buffer to the length the database reported.
    /// Returns whether anything grew.
    pub fn grow_truncated(&mut self, max: usize) -> Result<bool, RuntimeError> {
        let mut grew = false;
        for slot in self.slots.iter_mut().filter(|s| s.truncated) {
            if let Buffer::Bytes { data, len } = &mut slot.buffer {
                if *len > max {
                    return Err(RuntimeError::BufferLimit {
                        column: slot.column.clone(),
                        required: *len,
                        max,
                    });
                }
                if *len > data.len() {
                    data.resize(*len, 0);
                    grew = true;
                }
            }
            slot.truncated = false;
        }
        if grew {
            self.version += 1;
        }
        Ok(grew)
    }
}
