pub mod accessors;
pub mod misc;
pub mod wrapper;

use crate::api::Endpoint;
use crate::auth::AccessRole;
use crate::params::{Attribute, Parameter};

/// Every operation the server exposes
pub fn endpoints() -> Vec<Endpoint> {
    use Parameter as P;

    vec![
        Endpoint::new("ping", Vec::<P>::new(), AccessRole::Public, misc::ping),
        Endpoint::new(
            "getAccessors",
            [P::optional(Attribute::AccessorType)],
            AccessRole::Read,
            accessors::get_accessors,
        ),
        Endpoint::new(
            "createAccessor",
            [
                P::required(Attribute::Accessor),
                P::required(Attribute::AccessorType),
                P::optional(Attribute::Write),
                P::optional(Attribute::UserName),
                P::optional(Attribute::Comments),
            ],
            AccessRole::Write,
            accessors::create_accessor,
        ),
        Endpoint::new(
            "setAccessorInfo",
            [
                P::required(Attribute::Accessor),
                P::optional(Attribute::Write),
                P::optional(Attribute::Status),
                P::optional(Attribute::Comments),
            ],
            AccessRole::Write,
            accessors::set_accessor_info,
        ),
        Endpoint::new(
            "dropAccessor",
            [P::required(Attribute::Accessor)],
            AccessRole::Write,
            accessors::drop_accessor,
        ),
        Endpoint::new(
            "addHostAccessors",
            [
                P::required(Attribute::Accessor),
                P::required(Attribute::Dn),
                P::optional(Attribute::Write),
                P::optional(Attribute::Comments),
            ],
            AccessRole::Write,
            wrapper::add_host_accessors,
        ),
    ]
}
