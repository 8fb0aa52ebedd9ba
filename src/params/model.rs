use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;

use super::attribute::Attribute;
use super::value::NullableValue;

/// A declared request parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub attribute: Attribute,
    pub required: bool,
}

impl Parameter {
    pub const fn required(attribute: Attribute) -> Self {
        Self {
            attribute,
            required: true,
        }
    }

    pub const fn optional(attribute: Attribute) -> Self {
        Self {
            attribute,
            required: false,
        }
    }
}

/// Ordered parameters accepted by one operation. The optional `help` flag is always last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterModel {
    parameters: Vec<Parameter>,
}

impl ParameterModel {
    pub fn new(parameters: impl IntoIterator<Item = Parameter>) -> Self {
        let mut parameters: Vec<Parameter> = parameters
            .into_iter()
            .filter(|p| p.attribute != Attribute::Help)
            .collect();
        parameters.push(Parameter::optional(Attribute::Help));
        Self { parameters }
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn get(&self, attribute: Attribute) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.attribute == attribute)
    }

    /// `{name: {"type": kind, "required": bool}}` for every declared parameter except help
    pub fn help(&self) -> JsonValue {
        let mut out = Map::new();
        for p in self.parameters.iter().filter(|p| p.attribute != Attribute::Help) {
            out.insert(
                p.attribute.as_str().to_string(),
                json!({ "type": p.attribute.kind(), "required": p.required }),
            );
        }
        JsonValue::Object(out)
    }
}

impl Default for ParameterModel {
    fn default() -> Self {
        Self::new([])
    }
}

/// Bound request parameters, one entry per declared attribute
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Input {
    values: HashMap<Attribute, NullableValue>,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `attribute`; absent when it was never bound
    pub fn get(&self, attribute: Attribute) -> NullableValue {
        self.values
            .get(&attribute)
            .cloned()
            .unwrap_or_else(|| NullableValue::new(attribute))
    }

    pub fn get_mut(&mut self, attribute: Attribute) -> &mut NullableValue {
        self.values
            .entry(attribute)
            .or_insert_with(|| NullableValue::new(attribute))
    }

    /// Replace the value stored for the value's own attribute
    pub fn set(&mut self, value: NullableValue) -> &mut Self {
        self.values.insert(value.attribute(), value);
        self
    }

    /// Builder form used when one handler prepares input for another
    pub fn with(mut self, value: NullableValue) -> Self {
        self.set(value);
        self
    }

    pub fn contains(&self, attribute: Attribute) -> bool {
        self.values.contains_key(&attribute)
    }

    pub fn wants_help(&self) -> bool {
        self.values
            .get(&Attribute::Help)
            .map(NullableValue::is_valid)
            .unwrap_or(false)
    }
}
