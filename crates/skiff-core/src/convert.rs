//! Per-field value converters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::HookResult;
use crate::types::{Record, Value};

/// Converts one raw field value to its target representation.
///
/// Errors raised by the wrapped function are returned as-is; nothing here
/// catches or rewrites them.
pub struct ValueConverter {
    converter: Box<dyn Fn(Value) -> HookResult<Value>>,
}

impl ValueConverter {
    /// Wrap a conversion function.
    pub fn new<F>(converter: F) -> Self
    where
        F: Fn(Value) -> HookResult<Value> + 'static,
    {
        Self {
            converter: Box::new(converter),
        }
    }

    /// Run the conversion.
    pub fn convert(&self, value: Value) -> HookResult<Value> {
        (self.converter)(value)
    }
}

impl fmt::Debug for ValueConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueConverter").finish_non_exhaustive()
    }
}

/// How an import definition declares the converter for one field.
pub enum ConverterDecl<D> {
    /// A closure taking the raw value.
    Function(Box<dyn Fn(Value) -> HookResult<Value>>),
    /// An already-built converter.
    Converter(ValueConverter),
    /// A method on the import definition, called with the raw value.
    Method(fn(&D, Value) -> HookResult<Value>),
    /// Explicitly no converter for this field.
    None,
}

impl<D> ConverterDecl<D> {
    /// Declare a closure converter.
    pub fn function<F>(converter: F) -> Self
    where
        F: Fn(Value) -> HookResult<Value> + 'static,
    {
        Self::Function(Box::new(converter))
    }
}

impl<D> fmt::Debug for ConverterDecl<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Function"),
            Self::Converter(_) => f.write_str("Converter"),
            Self::Method(_) => f.write_str("Method"),
            Self::None => f.write_str("None"),
        }
    }
}

/// Target field name to converter, built once per run.
#[derive(Debug, Default)]
pub struct ValueConverterMap {
    converters: HashMap<String, ValueConverter>,
}

impl ValueConverterMap {
    /// Resolve declarations against the definition that owns them.
    ///
    /// `None` declarations are dropped. Method declarations are bound to
    /// `definition`.
    pub fn build<D, I>(declarations: I, definition: &Arc<D>) -> Self
    where
        D: 'static,
        I: IntoIterator<Item = (String, ConverterDecl<D>)>,
    {
        let mut converters = HashMap::new();
        for (field, declaration) in declarations {
            let converter = match declaration {
                ConverterDecl::Function(f) => ValueConverter { converter: f },
                ConverterDecl::Converter(converter) => converter,
                ConverterDecl::Method(method) => {
                    let owner = Arc::clone(definition);
                    ValueConverter::new(move |value| method(&owner, value))
                }
                ConverterDecl::None => continue,
            };
            converters.insert(field, converter);
        }
        Self { converters }
    }

    /// Converter for `field`, if one is declared.
    pub fn get(&self, field: &str) -> Option<&ValueConverter> {
        self.converters.get(field)
    }

    /// Whether a converter is declared for `field`.
    pub fn contains(&self, field: &str) -> bool {
        self.converters.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Convert every field of `record` that has a converter, in place.
    ///
    /// Stops at the first converter error.
    pub fn apply(&self, record: &mut Record) -> HookResult<()> {
        if self.converters.is_empty() {
            return Ok(());
        }
        for (field, slot) in record.iter_mut() {
            if let Some(converter) = self.converters.get(field) {
                let raw = std::mem::take(slot);
                *slot = converter.convert(raw)?;
            }
        }
        Ok(())
    }
}
