use futures::future::BoxFuture;
use serde_json::Value;

use super::context::ApiContext;
use crate::auth::AccessRole;
use crate::error::ApiError;
use crate::params::{Input, Parameter, ParameterModel};

/// Handler output, or every problem found
pub type HandlerResult = Result<Value, Vec<ApiError>>;

/// Business logic behind an endpoint. Handlers may call each other directly with the
/// same context; they then share its transaction.
pub type Handler = for<'a> fn(&'a ApiContext, Input) -> BoxFuture<'a, HandlerResult>;

/// One API operation: path name, parameters, required role and handler
pub struct Endpoint {
    pub name: &'static str,
    pub model: ParameterModel,
    pub role: AccessRole,
    pub handler: Handler,
}

impl Endpoint {
    pub fn new(
        name: &'static str,
        parameters: impl IntoIterator<Item = Parameter>,
        role: AccessRole,
        handler: Handler,
    ) -> Self {
        Self {
            name,
            model: ParameterModel::new(parameters),
            role,
            handler,
        }
    }

    pub fn path(&self) -> String {
        format!("/{}", self.name)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("model", &self.model)
            .finish()
    }
}
