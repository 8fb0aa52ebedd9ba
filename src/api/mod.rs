pub mod context;
pub mod dispatcher;
pub mod endpoint;
pub mod response;
pub mod routes;

pub use context::{ApiContext, AppState};
pub use dispatcher::{dispatch, Call};
pub use endpoint::{Endpoint, Handler, HandlerResult};
pub use response::{ApiResponse, Status};
pub use routes::router;
