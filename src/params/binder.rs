use std::collections::HashMap;

use super::attribute::Kind;
use super::model::{Input, ParameterModel};
use super::value::NullableValue;
use crate::error::ApiError;

/// Result of binding a query string against a model
#[derive(Debug, Clone, Default)]
pub struct Binding {
    pub input: Input,
    pub errors: Vec<ApiError>,
}

impl Binding {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Bind a raw query string against `model`.
///
/// Errors accumulate: every declared parameter is examined and every unknown key is
/// reported. The help flag is bound like any other parameter so callers can honour
/// it before treating the errors as fatal.
pub fn bind(raw_query: &str, model: &ParameterModel) -> Binding {
    // first value wins for repeated keys; order kept for unknown-key reporting
    let mut raw: HashMap<String, String> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for (key, value) in url::form_urlencoded::parse(raw_query.as_bytes()) {
        if !raw.contains_key(key.as_ref()) {
            order.push(key.to_string());
            raw.insert(key.into_owned(), value.into_owned());
        }
    }

    let mut binding = Binding::default();

    for parameter in model.parameters() {
        let attribute = parameter.attribute;
        let mut value = NullableValue::new(attribute);
        let supplied = raw.remove(attribute.as_str());

        if let Some(text) = supplied.as_deref().map(str::trim) {
            if !text.is_empty() || attribute.kind() == Kind::Flag {
                if let Err(e) = value.scan(text) {
                    binding.errors.push(e.into());
                    binding.input.set(value);
                    continue;
                }
            }
        }

        if parameter.required && value.is_absent() {
            binding
                .errors
                .push(ApiError::invalid_data(format!("required parameter {} not provided", attribute)));
        }

        binding.input.set(value);
    }

    for key in order.into_iter().filter(|k| raw.contains_key(k)) {
        binding
            .errors
            .push(ApiError::invalid_data(format!("{} is not a valid parameter for this api", key)));
    }

    binding
}
