// Typed, null-aware request parameters
pub mod attribute;
pub mod binder;
pub mod model;
pub mod value;

pub use attribute::{Attribute, Kind, UnknownAttribute};
pub use binder::{bind, Binding};
pub use model::{Input, Parameter, ParameterModel};
pub use value::{NullableValue, Scalar, ScanError, Value};
